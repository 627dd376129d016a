// crates/tascade-core/tests/event_replay.rs
// ============================================================================
// Module: Event Replay Tests
// Description: Rebuilding projections from the append-only log.
// ============================================================================
//! ## Overview
//! Replaying the event log from sequence zero must reproduce the live
//! store's task states, lease and reservation statuses, and plan versions.
//! The same property holds mid-history: cursors are resumable and
//! re-application is idempotent.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

mod common;

use common::agent;
use common::claim;
use common::create_task;
use common::draft;
use common::fixture;
use common::implement;
use common::integrate_success;
use common::t;
use common::to_integrated;
use common::transition;
use tascade_core::ChangeOp;
use tascade_core::CoordinatorError;
use tascade_core::EventRecord;
use tascade_core::EventSeq;
use tascade_core::PlanVersion;
use tascade_core::Projection;
use tascade_core::TaskPatch;
use tascade_core::TaskRef;

/// Reads the full project log.
fn full_log(fx: &common::Fixture) -> Vec<EventRecord> {
    fx.store
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(tx.events_after(fx.project.id, EventSeq::ORIGIN, 100_000)?)
        })
        .expect("events")
}

/// Builds the projection the live store should match.
fn live_projection(fx: &common::Fixture) -> Projection {
    fx.store
        .with_tx(|tx| {
            let mut projection = Projection::default();
            let project = tx.project(fx.project.id)?.expect("project");
            projection.plan_versions.insert(project.id, project.current_plan_version);
            for task in tx.list_tasks(project.id)? {
                projection.task_states.insert(task.id, task.state);
                if let Some(lease) = tx.active_lease_for_task(task.id)? {
                    projection.lease_statuses.insert(lease.id, lease.status);
                }
            }
            Ok::<_, CoordinatorError>(projection)
        })
        .expect("live projection")
}

// ============================================================================
// SECTION: Replay Equivalence
// ============================================================================

/// Tests sequences are gap-free and strictly monotonic per project.
#[test]
fn test_event_sequences_are_monotonic() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");

    let log = full_log(&fx);
    assert!(!log.is_empty());
    for (index, event) in log.iter().enumerate() {
        assert_eq!(event.seq.get(), (index as u64) + 1, "gap at {index}");
    }
}

/// Tests a full lifecycle replays to the live task states and plan version.
#[test]
fn test_replay_reproduces_lifecycle() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    let locked = create_task(&fx, &draft(&fx, "two"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.create_dependency(
                tx,
                &TaskRef::by_id(task.id),
                &TaskRef::by_id(locked.id),
                tascade_core::UnlockOn::Integrated,
                &agent("planner"),
                t(12),
            )
        })
        .expect("edge");
    implement(&fx, task.id, "alice", "token-1", 20);
    integrate_success(&fx, task.id, 30);
    transition(&fx, task.id, &to_integrated("alice", "bob"), None, t(40)).expect("integrate");

    let replayed = Projection::replay(full_log(&fx).iter());
    let live = live_projection(&fx);

    assert_eq!(replayed.task_states, live.task_states);
    assert_eq!(replayed.plan_versions, live.plan_versions);
}

/// Tests replan invalidation events reproduce lease release and re-queue.
#[test]
fn test_replay_covers_claim_invalidation() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    let claimed = claim(&fx, task.id, "bob", "token-1", t(20)).expect("claim");
    let changeset = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::INITIAL,
                vec![ChangeOp::ModifyTask {
                    task_id: task.id,
                    patch: TaskPatch {
                        work_spec: Some(common::work_spec("rescoped")),
                        ..TaskPatch::default()
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

    let replayed = Projection::replay(full_log(&fx).iter());
    assert_eq!(
        replayed.lease_statuses.get(&claimed.lease.id),
        Some(&tascade_core::LeaseStatus::Released),
    );
    assert_eq!(
        replayed.task_states.get(&task.id),
        Some(&tascade_core::TaskState::Ready),
    );
    assert_eq!(
        replayed.plan_versions.get(&fx.project.id),
        Some(&PlanVersion::new(2)),
    );
}

/// Tests cursor resumption: replaying a prefix then the suffix equals
/// replaying the whole log.
#[test]
fn test_cursor_resumption_is_equivalent() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    implement(&fx, task.id, "alice", "token-1", 20);

    let log = full_log(&fx);
    let whole = Projection::replay(log.iter());

    let split = log.len() / 2;
    let mut resumed = Projection::replay(log.iter().take(split));
    for event in log.iter().skip(split) {
        resumed.apply(event);
    }
    assert_eq!(whole, resumed);
}

/// Tests consumers may re-apply events idempotently.
#[test]
fn test_duplicate_application_is_idempotent() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "one"), t(10));
    claim(&fx, task.id, "alice", "token-1", t(20)).expect("claim");

    let log = full_log(&fx);
    let once = Projection::replay(log.iter());
    let mut twice = Projection::replay(log.iter());
    for event in &log {
        twice.apply(event);
    }
    assert_eq!(once, twice);
}
