// crates/tascade-core/tests/coordinator_flow.rs
// ============================================================================
// Module: Coordinator Flow Tests
// Description: Claims, heartbeats, fencing, reservations, and expiry sweeps.
// ============================================================================
//! ## Overview
//! Validates the lease manager and reservation manager against the memory
//! store: exclusivity, monotone heartbeats, fencing counters, directed
//! assignment, and the expiry sweep returning tasks to ready.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

mod common;

use common::agent;
use common::assert_code;
use common::claim;
use common::create_task;
use common::draft;
use common::fixture;
use common::implement;
use common::integrate_success;
use common::t;
use common::task_state;
use common::to_integrated;
use common::to_state;
use common::transition;
use tascade_core::ErrorCode;
use tascade_core::HeartbeatRequest;
use tascade_core::LeaseStatus;
use tascade_core::LeaseToken;
use tascade_core::PlanStaleAdvisory;
use tascade_core::PlanVersion;
use tascade_core::TaskRef;
use tascade_core::TaskState;

// ============================================================================
// SECTION: Claims
// ============================================================================

/// Tests a claim moves the task, creates the lease, and captures the
/// snapshot bound to that lease.
#[test]
fn test_claim_creates_lease_and_snapshot() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    let result = claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");

    assert_eq!(result.task.state, TaskState::Claimed);
    assert_eq!(result.lease.fencing.get(), 1);
    assert_eq!(result.snapshot.task_id, task.id);
    assert_eq!(result.snapshot.lease_id, result.lease.id);
    assert_eq!(result.snapshot.plan_version, PlanVersion::INITIAL);
    assert_eq!(result.snapshot.work_spec.objective, "implement one");
}

/// Tests a second claim while the lease is active is rejected.
#[test]
fn test_double_claim_rejected() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("first claim");
    let error = claim(&fx, task.id, "bob", "token-2", t(21)).expect_err("second claim");
    assert_code(&error, ErrorCode::InvariantViolation);
}

/// Tests a claim on a dependency-locked task is rejected even if the state
/// was forced ready.
#[test]
fn test_claim_requires_ready_state() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");
    transition(&fx, task.id, &to_state(TaskState::InProgress, "alice"), Some("token-1"), t(21))
        .expect("start");
    let error = claim(&fx, task.id, "bob", "token-2", t(22)).expect_err("claim in-progress");
    assert_code(&error, ErrorCode::InvariantViolation);
}

// ============================================================================
// SECTION: Heartbeats and Fencing
// ============================================================================

/// Heartbeats with the live token.
fn heartbeat_at(
    fx: &common::Fixture,
    task: tascade_core::TaskId,
    token: &str,
    seen: Option<u64>,
    now: i64,
) -> Result<tascade_core::HeartbeatResult, tascade_core::CoordinatorError> {
    fx.store.with_tx(|tx| {
        fx.coordinator.heartbeat(tx, &HeartbeatRequest {
            task: TaskRef::by_id(task),
            agent_id: agent("alice"),
            token: LeaseToken::new(token),
            seen_plan_version: seen.map(PlanVersion::new),
            now: t(now),
        })
    })
}

/// Tests heartbeat extension is monotone and replays are no-ops.
#[test]
fn test_heartbeat_is_monotone_and_idempotent() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");

    let first = heartbeat_at(&fx, task.id, "token-1", None, 30_000).expect("heartbeat");
    let replay = heartbeat_at(&fx, task.id, "token-1", None, 30_000).expect("replay");
    assert_eq!(first.expires_at, replay.expires_at);

    // An earlier heartbeat never rolls the deadline back.
    let stale = heartbeat_at(&fx, task.id, "token-1", None, 25_000).expect("early");
    assert_eq!(stale.expires_at, first.expires_at);
}

/// Tests a wrong token fails with the stable code.
#[test]
fn test_heartbeat_with_wrong_token_rejected() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");
    let error = heartbeat_at(&fx, task.id, "token-wrong", None, 30).expect_err("must fail");
    assert_code(&error, ErrorCode::LeaseStale);
}

/// Tests a transition write without the active lease token is fenced.
#[test]
fn test_stale_token_write_fenced() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");

    let missing = transition(&fx, task.id, &to_state(TaskState::InProgress, "alice"), None, t(21))
        .expect_err("missing token");
    assert_code(&missing, ErrorCode::LeaseFenced);

    let wrong = transition(
        &fx,
        task.id,
        &to_state(TaskState::InProgress, "alice"),
        Some("token-old"),
        t(22),
    )
    .expect_err("wrong token");
    assert_code(&wrong, ErrorCode::LeaseFenced);
}

/// Tests fencing counters grow strictly across successive leases.
#[test]
fn test_fencing_counters_strictly_increase() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    let first = claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");

    // Lease lapses and the sweep re-queues the task.
    let report = fx
        .store
        .with_tx(|tx| fx.coordinator.sweep_expired(tx, t(2_000_000)))
        .expect("sweep");
    assert_eq!(report.leases_expired, 1);
    assert_eq!(task_state(&fx, task.id), TaskState::Ready);

    let second = claim(&fx, task.id, "bob", "token-2", t(2_000_100)).expect("reclaim");
    assert!(second.lease.fencing > first.lease.fencing);
}

// ============================================================================
// SECTION: Reservations
// ============================================================================

/// Tests only the assignee may claim a reserved task, and the claim
/// consumes the reservation.
#[test]
fn test_reservation_excludes_other_claimers() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    let reservation = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.assign_task(
                tx,
                &TaskRef::by_id(task.id),
                &agent("bob"),
                Some(600),
                &agent("operator"),
                t(20),
            )
        })
        .expect("assign");
    assert_eq!(task_state(&fx, task.id), TaskState::Reserved);

    let error = claim(&fx, task.id, "alice", "token-a", t(21)).expect_err("non-assignee");
    assert_code(&error, ErrorCode::ReservationConflict);

    claim(&fx, task.id, "bob", "token-b", t(22)).expect("assignee claim");
    let status = fx
        .store
        .with_tx(|tx| {
            Ok::<_, tascade_core::CoordinatorError>(
                tx.reservation(reservation.id)?.expect("reservation").status,
            )
        })
        .expect("load");
    assert_eq!(status, tascade_core::ReservationStatus::Consumed);
}

/// Tests reservation expiry returns the task to ready atomically.
#[test]
fn test_reservation_expiry_requeues() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.assign_task(
                tx,
                &TaskRef::by_id(task.id),
                &agent("bob"),
                Some(60),
                &agent("operator"),
                t(20),
            )
        })
        .expect("assign");

    let report = fx
        .store
        .with_tx(|tx| fx.coordinator.sweep_expired(tx, t(20).plus_secs(61)))
        .expect("sweep");
    assert_eq!(report.reservations_expired, 1);
    assert_eq!(task_state(&fx, task.id), TaskState::Ready);
    claim(&fx, task.id, "alice", "token-a", t(200_000)).expect("open claim");
}

/// Tests double reservation is rejected.
#[test]
fn test_double_reservation_rejected() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.assign_task(
                tx,
                &TaskRef::by_id(task.id),
                &agent("bob"),
                None,
                &agent("operator"),
                t(20),
            )
        })
        .expect("assign");
    let error = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.assign_task(
                tx,
                &TaskRef::by_id(task.id),
                &agent("carol"),
                None,
                &agent("operator"),
                t(21),
            )
        })
        .expect_err("second assign");
    assert_code(&error, ErrorCode::ReservationConflict);
}

// ============================================================================
// SECTION: Lease Lifecycle Through Completion
// ============================================================================

/// Tests the lease is consumed at `implemented` and the full walk reaches
/// `integrated`.
#[test]
fn test_full_walk_consumes_lease() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    let claimed = implement(&fx, task.id, "alice", "token-1", 20);

    let lease_status = fx
        .store
        .with_tx(|tx| {
            Ok::<_, tascade_core::CoordinatorError>(
                tx.lease(claimed.lease.id)?.expect("lease").status,
            )
        })
        .expect("load lease");
    assert_eq!(lease_status, LeaseStatus::Consumed);

    integrate_success(&fx, task.id, 30);
    transition(&fx, task.id, &to_integrated("alice", "bob"), None, t(40)).expect("integrate");
    assert_eq!(task_state(&fx, task.id), TaskState::Integrated);
}

/// Tests explicit release parks the task in abandoned and an operator
/// re-queue makes it claimable again.
#[test]
fn test_release_then_requeue() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");
    fx.store
        .with_tx(|tx| {
            fx.coordinator.release_lease(
                tx,
                &TaskRef::by_id(task.id),
                &agent("alice"),
                &LeaseToken::new("token-1"),
                t(30),
            )
        })
        .expect("release");
    assert_eq!(task_state(&fx, task.id), TaskState::Abandoned);

    transition(&fx, task.id, &to_state(TaskState::Ready, "operator"), None, t(31))
        .expect("requeue");
    claim(&fx, task.id, "bob", "token-2", t(32)).expect("reclaim");
}

// ============================================================================
// SECTION: Plan Advisories
// ============================================================================

/// Tests heartbeats carrying a stale plan version get an advisory and are
/// never aborted.
#[test]
fn test_stale_plan_advisory() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");

    // Apply a priority-only changeset to bump the plan version.
    let changeset = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::INITIAL,
                vec![tascade_core::ChangeOp::ModifyTask {
                    task_id: task.id,
                    patch: tascade_core::TaskPatch {
                        priority: Some(1),
                        ..tascade_core::TaskPatch::default()
                    },
                }],
                &agent("planner"),
                t(30),
            )
        })
        .expect("changeset");
    fx.store
        .with_tx(|tx| {
            fx.coordinator.apply_changeset(tx, changeset.id, false, &agent("planner"), t(31))
        })
        .expect("apply");

    let result = heartbeat_at(&fx, task.id, "token-1", Some(1), 40_000).expect("heartbeat");
    assert_eq!(result.plan_version, PlanVersion::new(2));
    assert_eq!(result.advisory, Some(PlanStaleAdvisory::ContinueWithNotice));

    let current = heartbeat_at(&fx, task.id, "token-1", Some(2), 41_000).expect("heartbeat");
    assert_eq!(current.advisory, None);
}
