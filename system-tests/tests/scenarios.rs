// system-tests/tests/scenarios.rs
// ============================================================================
// Module: End-to-End Scenarios
// Description: Full-kernel walks over the durable store.
// ============================================================================
//! ## Overview
//! The canonical end-to-end scenarios: dependency unlock through the happy
//! path, cycle rejection, self-review refusal, material replan
//! invalidation, in-progress scope protection, and the gate path.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use system_tests::Harness;
use system_tests::agent;
use system_tests::plain_transition;
use system_tests::reviewed_integration;
use system_tests::t;
use tascade_core::ChangeOp;
use tascade_core::ErrorCode;
use tascade_core::GateDecisionDraft;
use tascade_core::GateKind;
use tascade_core::GateOutcome;
use tascade_core::GateRuleDraft;
use tascade_core::GateScope;
use tascade_core::PlanVersion;
use tascade_core::TaskPatch;
use tascade_core::TaskRef;
use tascade_core::TaskState;
use tascade_core::UnlockOn;
use tascade_core::WorkSpec;

/// Asserts a coordinator error carries the expected domain code.
fn assert_code(error: &tascade_core::CoordinatorError, code: ErrorCode) {
    assert_eq!(error.code(), Some(code), "unexpected error: {error}");
}

// ============================================================================
// SECTION: Scenario 1 — Happy Path
// ============================================================================

/// T2 stays locked until T1 reaches integrated through the full review
/// pipeline; then it becomes ready.
#[test]
fn scenario_happy_path_dependency_unlock() {
    let harness = Harness::new();
    let t1 = harness.create_task("T1", 10).expect("t1");
    let t2 = harness.create_task("T2", 11).expect("t2");
    assert_eq!(t1.short_id.to_string(), "P1.M1.T1");
    assert_eq!(t2.short_id.to_string(), "P1.M1.T2");

    harness.link(t1.id, t2.id, UnlockOn::Integrated, 12).expect("edge");
    assert_eq!(harness.ready_ids("alice").expect("ready"), vec!["P1.M1.T1"]);

    harness.implement(t1.id, "alice", "token-1", 20).expect("implement");
    // Implemented is not enough for an integrated-unlock edge.
    assert!(harness.ready_ids("alice").expect("ready").is_empty());

    harness.integrate_success(t1.id, 30).expect("integration");
    harness
        .transition(t1.id, &reviewed_integration("alice", "bob"), None, 40)
        .expect("integrate");
    assert_eq!(harness.task_state(t1.id).expect("state"), TaskState::Integrated);
    assert_eq!(harness.ready_ids("alice").expect("ready"), vec!["P1.M1.T2"]);
}

// ============================================================================
// SECTION: Scenario 2 — Cycle Rejection
// ============================================================================

/// With A -> B and B -> C in place, C -> A fails and the graph is
/// unchanged.
#[test]
fn scenario_cycle_rejection() {
    let harness = Harness::new();
    let a = harness.create_task("A", 10).expect("a");
    let b = harness.create_task("B", 11).expect("b");
    let c = harness.create_task("C", 12).expect("c");
    harness.link(a.id, b.id, UnlockOn::Implemented, 13).expect("a->b");
    harness.link(b.id, c.id, UnlockOn::Implemented, 14).expect("b->c");

    let error = harness
        .link(c.id, a.id, UnlockOn::Implemented, 15)
        .expect_err("cycle");
    assert_code(&error, ErrorCode::DependencyCycle);

    // Graph state is unchanged: A remains the only ready task.
    assert_eq!(harness.ready_ids("alice").expect("ready"), vec!["P1.M1.T1"]);
}

// ============================================================================
// SECTION: Scenario 3 — Self-Review Blocked
// ============================================================================

/// alice cannot integrate her own work with herself as reviewer.
#[test]
fn scenario_self_review_blocked() {
    let harness = Harness::new();
    let task = harness.create_task("solo", 10).expect("task");
    harness.implement(task.id, "alice", "token-1", 20).expect("implement");
    harness.integrate_success(task.id, 30).expect("integration");

    let error = harness
        .transition(task.id, &reviewed_integration("alice", "alice"), None, 40)
        .expect_err("self review");
    assert_code(&error, ErrorCode::InvariantViolation);
    assert_eq!(harness.task_state(task.id).expect("state"), TaskState::Implemented);
}

// ============================================================================
// SECTION: Scenario 4 — Material Replan Invalidates Claim
// ============================================================================

/// A work-spec change releases bob's lease, re-queues the task, records the
/// invalidation event, and the next claim is fenced above the old lease.
#[test]
fn scenario_material_replan_invalidates_claim() {
    let harness = Harness::new();
    let task = harness.create_task("T", 10).expect("task");
    let first = harness.claim(task.id, "bob", "token-1", 20).expect("claim");

    let changeset = harness
        .store
        .with_tx(|tx| {
            harness.coordinator.create_changeset(
                tx,
                harness.project.id,
                PlanVersion::INITIAL,
                vec![ChangeOp::ModifyTask {
                    task_id: task.id,
                    patch: TaskPatch {
                        work_spec: Some(WorkSpec {
                            objective: "changed objective".to_string(),
                            ..WorkSpec::default()
                        }),
                        ..TaskPatch::default()
                    },
                }],
                &agent("planner"),
                t(30),
            )
        })
        .expect("changeset");
    harness
        .store
        .with_tx(|tx| {
            harness.coordinator.apply_changeset(tx, changeset.id, false, &agent("planner"), t(31))
        })
        .expect("apply");

    assert_eq!(harness.task_state(task.id).expect("state"), TaskState::Ready);
    let lease = harness
        .store
        .with_tx(|tx| {
            Ok::<_, tascade_core::CoordinatorError>(
                tx.lease(first.lease.id)?.expect("lease").status,
            )
        })
        .expect("lease status");
    assert_eq!(lease, tascade_core::LeaseStatus::Released);

    let invalidated = harness
        .store
        .with_tx(|tx| {
            Ok::<_, tascade_core::CoordinatorError>(tx.events_after(
                harness.project.id,
                tascade_core::EventSeq::ORIGIN,
                10_000,
            )?)
        })
        .expect("events")
        .iter()
        .any(|event| event.kind == tascade_core::EventKind::TaskClaimInvalidated);
    assert!(invalidated, "task.claim_invalidated event missing");

    let second = harness.claim(task.id, "carol", "token-2", 40).expect("reclaim");
    assert!(second.lease.fencing > first.lease.fencing);
}

// ============================================================================
// SECTION: Scenario 5 — In-Progress Scope Protection
// ============================================================================

/// A replan touching an in-progress task does not abort it; bob finishes
/// under the snapshot captured at claim time.
#[test]
fn scenario_in_progress_scope_protection() {
    let harness = Harness::new();
    let task = harness.create_task("T", 10).expect("task");
    let claimed = harness.claim(task.id, "bob", "token-1", 20).expect("claim");
    harness
        .transition(task.id, &plain_transition(TaskState::InProgress, "bob"), Some("token-1"), 21)
        .expect("start");

    let changeset = harness
        .store
        .with_tx(|tx| {
            harness.coordinator.create_changeset(
                tx,
                harness.project.id,
                PlanVersion::INITIAL,
                vec![ChangeOp::ModifyTask {
                    task_id: task.id,
                    patch: TaskPatch {
                        work_spec: Some(WorkSpec {
                            objective: "rewritten mid-flight".to_string(),
                            ..WorkSpec::default()
                        }),
                        ..TaskPatch::default()
                    },
                }],
                &agent("planner"),
                t(30),
            )
        })
        .expect("changeset");
    harness
        .store
        .with_tx(|tx| {
            harness.coordinator.apply_changeset(tx, changeset.id, false, &agent("planner"), t(31))
        })
        .expect("apply");

    assert_eq!(harness.task_state(task.id).expect("state"), TaskState::InProgress);
    let snapshot = harness
        .store
        .with_tx(|tx| {
            Ok::<_, tascade_core::CoordinatorError>(
                tx.snapshot_for_lease(claimed.lease.id)?.expect("snapshot"),
            )
        })
        .expect("snapshot");
    assert_eq!(snapshot.work_spec.objective, "implement T");

    harness.passed_artifact(task.id, "bob", "token-1", 32).expect("artifact");
    harness
        .transition(
            task.id,
            &plain_transition(TaskState::Implemented, "bob"),
            Some("token-1"),
            33,
        )
        .expect("finish under old contract");
}

// ============================================================================
// SECTION: Scenario 6 — Gate Path
// ============================================================================

/// A review-gate rule over the milestone batches implemented tasks behind
/// one gate task; an approved decision by a distinct reviewer unblocks
/// their integration.
#[test]
fn scenario_gate_path() {
    let harness = Harness::new();
    harness
        .store
        .with_tx(|tx| {
            harness.coordinator.create_gate_rule(
                tx,
                &GateRuleDraft {
                    project_id: harness.project.id,
                    scope: GateScope {
                        phase_id: None,
                        milestone_id: Some(harness.milestone.id),
                        task_classes: Vec::new(),
                    },
                    kind: GateKind::ReviewGate,
                    pending_threshold: 2,
                    age_threshold_secs: None,
                    max_batch: 10,
                    require_distinct_reviewer: true,
                },
                &agent("operator"),
                t(5),
            )
        })
        .expect("rule");

    let a = harness.create_task("A", 10).expect("a");
    let b = harness.create_task("B", 11).expect("b");
    harness.implement(a.id, "alice", "token-a", 20).expect("implement a");
    harness.implement(b.id, "alice", "token-b", 30).expect("implement b");

    let generated = harness
        .store
        .with_tx(|tx| {
            harness.coordinator.evaluate_gate_rules(
                tx,
                harness.project.id,
                &agent("operator"),
                t(40),
            )
        })
        .expect("evaluate");
    assert_eq!(generated.len(), 1, "one gate task per fired scope");
    let gate_id = generated[0];

    let links = harness
        .store
        .with_tx(|tx| {
            Ok::<_, tascade_core::CoordinatorError>(tx.links_for_gate(gate_id)?)
        })
        .expect("links");
    assert_eq!(
        links.iter().map(|link| link.candidate_task_id).collect::<Vec<_>>(),
        vec![a.id, b.id],
    );

    // Gated: integration is refused before a decision exists.
    harness.integrate_success(a.id, 50).expect("integration");
    let gated = harness
        .transition(a.id, &reviewed_integration("alice", "rex"), None, 55)
        .expect_err("gated");
    assert_code(&gated, ErrorCode::InvariantViolation);

    harness
        .store
        .with_tx(|tx| {
            harness.coordinator.record_gate_decision(tx, &GateDecisionDraft {
                gate_task: TaskRef::by_id(gate_id),
                outcome: GateOutcome::Approved,
                actor: agent("rex"),
                reason: "batch verified".to_string(),
                evidence_refs: vec!["review://batch/1".to_string()],
                now: t(60),
            })
        })
        .expect("decision");

    harness
        .transition(a.id, &reviewed_integration("alice", "rex"), None, 70)
        .expect("a integrates");
    harness.integrate_success(b.id, 80).expect("integration b");
    harness
        .transition(b.id, &reviewed_integration("alice", "rex"), None, 90)
        .expect("b integrates");
}
