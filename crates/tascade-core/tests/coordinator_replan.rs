// crates/tascade-core/tests/coordinator_replan.rs
// ============================================================================
// Module: Replanning Tests
// Description: Changeset validation, apply atomicity, and claim invalidation.
// ============================================================================
//! ## Overview
//! Validates the plan changeset engine: material replans invalidate
//! reservations and claims, in-progress work is protected behind its
//! snapshot, priority-only changes touch nothing, and a failed apply rolls
//! back completely.

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
use common::t;
use common::task_state;
use common::to_state;
use common::transition;
use common::work_spec;
use tascade_core::ChangeOp;
use tascade_core::ChangeSetId;
use tascade_core::CoordinatorError;
use tascade_core::ErrorCode;
use tascade_core::EventKind;
use tascade_core::EventSeq;
use tascade_core::LeaseStatus;
use tascade_core::PlanVersion;
use tascade_core::TaskPatch;
use tascade_core::TaskRef;
use tascade_core::TaskState;

/// Creates and applies a changeset in one step.
fn apply_ops(
    fx: &common::Fixture,
    base: PlanVersion,
    operations: Vec<ChangeOp>,
    now: i64,
) -> Result<tascade_core::ApplyResult, CoordinatorError> {
    let changeset = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                base,
                operations,
                &agent("planner"),
                t(now),
            )
        })
        .expect("create changeset");
    fx.store.with_tx(|tx| {
        fx.coordinator.apply_changeset(tx, changeset.id, false, &agent("planner"), t(now + 1))
    })
}

/// Patch changing only the work spec objective.
fn objective_patch(objective: &str) -> TaskPatch {
    TaskPatch {
        work_spec: Some(work_spec(objective)),
        ..TaskPatch::default()
    }
}

/// Loads the active lease status history entry for a lease id.
fn lease_status(fx: &common::Fixture, lease: tascade_core::LeaseId) -> LeaseStatus {
    fx.store
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(tx.lease(lease)?.expect("lease").status)
        })
        .expect("load lease")
}

/// Returns true when an event of the kind exists for the project.
fn has_event(fx: &common::Fixture, kind: EventKind) -> bool {
    fx.store
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(tx.events_after(fx.project.id, EventSeq::ORIGIN, 10_000)?)
        })
        .expect("events")
        .iter()
        .any(|event| event.kind == kind)
}

// ============================================================================
// SECTION: Material Replans
// ============================================================================

/// Material change to a claimed task: lease released, task ready, a new
/// claim gets a strictly greater fencing counter.
#[test]
fn test_material_replan_invalidates_claim() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "target"), t(10));
    let first = claim(&fx, task.id, "bob", "token-1", t(20)).expect("claim");

    let result = apply_ops(
        &fx,
        PlanVersion::INITIAL,
        vec![ChangeOp::ModifyTask {
            task_id: task.id,
            patch: objective_patch("redefined objective"),
        }],
        30,
    )
    .expect("apply");

    assert_eq!(task_state(&fx, task.id), TaskState::Ready);
    assert_eq!(lease_status(&fx, first.lease.id), LeaseStatus::Released);
    assert!(has_event(&fx, EventKind::TaskClaimInvalidated));
    assert_eq!(result.project.current_plan_version, PlanVersion::new(2));

    let second = claim(&fx, task.id, "carol", "token-2", t(40)).expect("reclaim");
    assert!(second.lease.fencing > first.lease.fencing);
}

/// Material change to a reserved task: reservation released, task ready.
#[test]
fn test_material_replan_releases_reservation() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "target"), t(10));
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
    assert_eq!(task_state(&fx, task.id), TaskState::Reserved);

    apply_ops(
        &fx,
        PlanVersion::INITIAL,
        vec![ChangeOp::ModifyTask {
            task_id: task.id,
            patch: objective_patch("new scope"),
        }],
        30,
    )
    .expect("apply");
    assert_eq!(task_state(&fx, task.id), TaskState::Ready);
}

/// In-progress scope protection: the task keeps running and finishes under
/// the snapshot captured at claim time.
#[test]
fn test_in_progress_protected_from_replan() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "protected"), t(10));
    let claimed = claim(&fx, task.id, "bob", "token-1", t(20)).expect("claim");
    transition(&fx, task.id, &to_state(TaskState::InProgress, "bob"), Some("token-1"), t(21))
        .expect("start");

    apply_ops(
        &fx,
        PlanVersion::INITIAL,
        vec![ChangeOp::ModifyTask {
            task_id: task.id,
            patch: objective_patch("rewritten while running"),
        }],
        30,
    )
    .expect("apply");

    assert_eq!(task_state(&fx, task.id), TaskState::InProgress);
    assert_eq!(lease_status(&fx, claimed.lease.id), LeaseStatus::Active);

    // The execution snapshot still reflects the original contract.
    let snapshot = fx
        .store
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(
                tx.snapshot_for_lease(claimed.lease.id)?.expect("snapshot"),
            )
        })
        .expect("load snapshot");
    assert_eq!(snapshot.work_spec.objective, "implement protected");

    // bob may still advance to implemented.
    common::passed_artifact(&fx, task.id, "bob", "token-1", t(31));
    transition(&fx, task.id, &to_state(TaskState::Implemented, "bob"), Some("token-1"), t(32))
        .expect("finish under old contract");
}

/// Priority-only changesets leave holds and tokens untouched.
#[test]
fn test_priority_only_change_is_non_material() {
    let fx = fixture();
    let reserved = create_task(&fx, &draft(&fx, "reserved"), t(10));
    let claimed = create_task(&fx, &draft(&fx, "claimed"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.assign_task(
                tx,
                &TaskRef::by_id(reserved.id),
                &agent("bob"),
                None,
                &agent("operator"),
                t(12),
            )
        })
        .expect("assign");
    let lease = claim(&fx, claimed.id, "carol", "token-1", t(13)).expect("claim");

    let result = apply_ops(
        &fx,
        PlanVersion::INITIAL,
        vec![
            ChangeOp::ModifyTask {
                task_id: reserved.id,
                patch: TaskPatch {
                    priority: Some(1),
                    ..TaskPatch::default()
                },
            },
            ChangeOp::ModifyTask {
                task_id: claimed.id,
                patch: TaskPatch {
                    priority: Some(2),
                    ..TaskPatch::default()
                },
            },
        ],
        20,
    )
    .expect("apply");

    assert!(result.impact.material_changes.is_empty());
    assert_eq!(task_state(&fx, reserved.id), TaskState::Reserved);
    assert_eq!(task_state(&fx, claimed.id), TaskState::Claimed);
    assert_eq!(lease_status(&fx, lease.lease.id), LeaseStatus::Active);
}

// ============================================================================
// SECTION: Version Discipline
// ============================================================================

/// Two changesets on the same base: the first applies, the second fails
/// `PLAN_STALE` until rebase is requested.
#[test]
fn test_plan_stale_on_concurrent_base() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "target"), t(10));

    apply_ops(
        &fx,
        PlanVersion::INITIAL,
        vec![ChangeOp::ModifyTask {
            task_id: task.id,
            patch: TaskPatch {
                priority: Some(5),
                ..TaskPatch::default()
            },
        }],
        20,
    )
    .expect("first apply");

    let stale = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::INITIAL,
                vec![ChangeOp::ModifyTask {
                    task_id: task.id,
                    patch: TaskPatch {
                        priority: Some(7),
                        ..TaskPatch::default()
                    },
                }],
                &agent("planner"),
                t(30),
            )
        })
        .expect("create");
    let error = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.apply_changeset(tx, stale.id, false, &agent("planner"), t(31))
        })
        .expect_err("stale apply");
    assert_code(&error, ErrorCode::PlanStale);

    let rebased = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.apply_changeset(tx, stale.id, true, &agent("planner"), t(32))
        })
        .expect("rebased apply");
    assert_eq!(rebased.project.current_plan_version, PlanVersion::new(3));
}

/// A failing operation mid-apply leaves the graph and plan version
/// untouched.
#[test]
fn test_failed_apply_rolls_back_completely() {
    let fx = fixture();
    let a = create_task(&fx, &draft(&fx, "a"), t(10));
    let b = create_task(&fx, &draft(&fx, "b"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.create_dependency(
                tx,
                &TaskRef::by_id(a.id),
                &TaskRef::by_id(b.id),
                tascade_core::UnlockOn::Implemented,
                &agent("planner"),
                t(12),
            )
        })
        .expect("edge");

    // Second operation closes a cycle; the first must not stick.
    let error = apply_ops(
        &fx,
        PlanVersion::INITIAL,
        vec![
            ChangeOp::ModifyTask {
                task_id: a.id,
                patch: objective_patch("poisoned batch"),
            },
            ChangeOp::AddDependency {
                from: b.id,
                to: a.id,
                unlock_on: tascade_core::UnlockOn::Implemented,
            },
        ],
        20,
    )
    .expect_err("cycle rejected");
    assert_code(&error, ErrorCode::DependencyCycle);

    let project = fx
        .store
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(tx.project(fx.project.id)?.expect("project"))
        })
        .expect("load project");
    assert_eq!(project.current_plan_version, PlanVersion::INITIAL);
    let objective = fx
        .store
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(tx.task(a.id)?.expect("task").work_spec.objective)
        })
        .expect("load task");
    assert_eq!(objective, "implement a");
}

/// Validation and apply agree on duplicate edges: a same-criterion
/// re-insert applies as a no-op, a differing criterion fails both paths
/// with `CONFLICT` and leaves the edge untouched.
#[test]
fn test_duplicate_dependency_paths_agree() {
    let fx = fixture();
    let a = create_task(&fx, &draft(&fx, "a"), t(10));
    let b = create_task(&fx, &draft(&fx, "b"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.create_dependency(
                tx,
                &TaskRef::by_id(a.id),
                &TaskRef::by_id(b.id),
                tascade_core::UnlockOn::Integrated,
                &agent("planner"),
                t(12),
            )
        })
        .expect("edge");

    let replayed = apply_ops(
        &fx,
        PlanVersion::INITIAL,
        vec![ChangeOp::AddDependency {
            from: a.id,
            to: b.id,
            unlock_on: tascade_core::UnlockOn::Integrated,
        }],
        20,
    )
    .expect("idempotent re-insert applies");
    assert!(replayed.impact.material_changes.is_empty());

    let conflicting = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::new(2),
                vec![ChangeOp::AddDependency {
                    from: a.id,
                    to: b.id,
                    unlock_on: tascade_core::UnlockOn::Implemented,
                }],
                &agent("planner"),
                t(30),
            )
        })
        .expect("create");
    let validate_error = fx
        .store
        .with_tx(|tx| fx.coordinator.validate_changeset_by_id(tx, conflicting.id))
        .expect_err("validation rejects");
    assert_code(&validate_error, ErrorCode::Conflict);
    let apply_error = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.apply_changeset(tx, conflicting.id, false, &agent("planner"), t(31))
        })
        .expect_err("apply rejects identically");
    assert_code(&apply_error, ErrorCode::Conflict);

    let edge = fx
        .store
        .with_tx(|tx| Ok::<_, CoordinatorError>(tx.edge(a.id, b.id)?.expect("edge")))
        .expect("load edge");
    assert_eq!(edge.unlock_on, tascade_core::UnlockOn::Integrated);
}

/// Removing a task deprecates it; dependents are re-examined.
#[test]
fn test_remove_task_deprecates_and_unblocks() {
    let fx = fixture();
    let a = create_task(&fx, &draft(&fx, "a"), t(10));
    let b = create_task(&fx, &draft(&fx, "b"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.create_dependency(
                tx,
                &TaskRef::by_id(a.id),
                &TaskRef::by_id(b.id),
                tascade_core::UnlockOn::Integrated,
                &agent("planner"),
                t(12),
            )
        })
        .expect("edge");
    assert_eq!(task_state(&fx, b.id), TaskState::Backlog);

    apply_ops(&fx, PlanVersion::INITIAL, vec![ChangeOp::RemoveTask {
        task_id: a.id,
    }], 20)
    .expect("apply");

    assert_eq!(task_state(&fx, a.id), TaskState::Cancelled);
    // The dependent's only blocker is gone with its edges.
    assert_eq!(task_state(&fx, b.id), TaskState::Ready);
}

/// Unknown changeset ids fail `NOT_FOUND`.
#[test]
fn test_apply_unknown_changeset() {
    let fx = fixture();
    let error = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.apply_changeset(
                tx,
                ChangeSetId::from_raw(999).expect("id"),
                false,
                &agent("planner"),
                t(10),
            )
        })
        .expect_err("unknown changeset");
    assert_code(&error, ErrorCode::NotFound);
}
