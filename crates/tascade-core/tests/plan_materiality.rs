// crates/tascade-core/tests/plan_materiality.rs
// ============================================================================
// Module: Materiality and Impact Preview Tests
// Description: Patch classification and pure changeset validation.
// ============================================================================
//! ## Overview
//! Validates the material-field enumeration and the impact preview:
//! newly-ready and newly-blocked sets, invalidation actions, and the
//! idempotence of validation.

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
use common::t;
use common::work_spec;
use tascade_core::ChangeOp;
use tascade_core::Materiality;
use tascade_core::PlanVersion;
use tascade_core::TaskClass;
use tascade_core::TaskPatch;
use tascade_core::TaskRef;
use tascade_core::UnlockOn;
use tascade_core::core::plan::InvalidationAction;
use tascade_core::core::plan::classify_patch;

/// Creates a draft changeset and validates it, returning the preview.
fn preview(
    fx: &common::Fixture,
    operations: Vec<ChangeOp>,
) -> tascade_core::ImpactPreview {
    let changeset = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::INITIAL,
                operations,
                &agent("planner"),
                t(100),
            )
        })
        .expect("create");
    fx.store
        .with_tx(|tx| fx.coordinator.validate_changeset_by_id(tx, changeset.id))
        .expect("validate")
}

// ============================================================================
// SECTION: Patch Classification
// ============================================================================

/// Tests the material field set exactly.
#[test]
fn test_material_fields() {
    let material_patches = [
        TaskPatch {
            work_spec: Some(work_spec("new")),
            ..TaskPatch::default()
        },
        TaskPatch {
            capability_tags: Some(vec!["sql".to_string()]),
            ..TaskPatch::default()
        },
        TaskPatch {
            task_class: Some(TaskClass::Security),
            ..TaskPatch::default()
        },
        TaskPatch {
            exclusive_paths: Some(vec!["src/**".to_string()]),
            ..TaskPatch::default()
        },
        TaskPatch {
            shared_paths: Some(vec!["proto/**".to_string()]),
            ..TaskPatch::default()
        },
    ];
    for patch in material_patches {
        assert_eq!(classify_patch(&patch), Materiality::Material, "{patch:?}");
    }
}

/// Tests priority, title, description, and expected-touch changes stay
/// non-material.
#[test]
fn test_non_material_fields() {
    let cosmetic = [
        TaskPatch {
            priority: Some(1),
            ..TaskPatch::default()
        },
        TaskPatch {
            title: Some("retitled".to_string()),
            ..TaskPatch::default()
        },
        TaskPatch {
            description: Some("reworded".to_string()),
            ..TaskPatch::default()
        },
        TaskPatch {
            expected_touches: Some(vec!["src/new.rs".to_string()]),
            ..TaskPatch::default()
        },
    ];
    for patch in cosmetic {
        assert_eq!(classify_patch(&patch), Materiality::NonMaterial, "{patch:?}");
    }
}

// ============================================================================
// SECTION: Impact Preview
// ============================================================================

/// Tests removing a blocking dependency previews the dependent as newly
/// ready.
#[test]
fn test_newly_ready_preview() {
    let fx = fixture();
    let a = create_task(&fx, &draft(&fx, "a"), t(10));
    let b = create_task(&fx, &draft(&fx, "b"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.create_dependency(
                tx,
                &TaskRef::by_id(a.id),
                &TaskRef::by_id(b.id),
                UnlockOn::Integrated,
                &agent("planner"),
                t(12),
            )
        })
        .expect("edge");

    let impact = preview(&fx, vec![ChangeOp::RemoveDependency {
        from: a.id,
        to: b.id,
    }]);
    assert_eq!(impact.newly_ready, vec![b.id]);
    assert!(impact.newly_blocked.is_empty());
    // Readiness flips are material for the affected task.
    assert_eq!(impact.material_changes, vec![b.id]);
}

/// Tests adding a blocking dependency previews the target as newly blocked.
#[test]
fn test_newly_blocked_preview() {
    let fx = fixture();
    let a = create_task(&fx, &draft(&fx, "a"), t(10));
    let b = create_task(&fx, &draft(&fx, "b"), t(11));

    let impact = preview(&fx, vec![ChangeOp::AddDependency {
        from: a.id,
        to: b.id,
        unlock_on: UnlockOn::Integrated,
    }]);
    assert_eq!(impact.newly_blocked, vec![b.id]);
    assert!(impact.newly_ready.is_empty());
}

/// Tests re-adding an existing edge: the same criterion is a clean no-op,
/// a differing criterion is rejected exactly as the execution path rejects
/// it.
#[test]
fn test_duplicate_dependency_criteria() {
    let fx = fixture();
    let a = create_task(&fx, &draft(&fx, "a"), t(10));
    let b = create_task(&fx, &draft(&fx, "b"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.create_dependency(
                tx,
                &TaskRef::by_id(a.id),
                &TaskRef::by_id(b.id),
                UnlockOn::Integrated,
                &agent("planner"),
                t(12),
            )
        })
        .expect("edge");

    let replay = preview(&fx, vec![ChangeOp::AddDependency {
        from: a.id,
        to: b.id,
        unlock_on: UnlockOn::Integrated,
    }]);
    assert!(replay.newly_ready.is_empty());
    assert!(replay.newly_blocked.is_empty());
    assert!(replay.material_changes.is_empty());

    let conflicting = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::INITIAL,
                vec![ChangeOp::AddDependency {
                    from: a.id,
                    to: b.id,
                    unlock_on: UnlockOn::Implemented,
                }],
                &agent("planner"),
                t(20),
            )
        })
        .expect("create");
    let error = fx
        .store
        .with_tx(|tx| fx.coordinator.validate_changeset_by_id(tx, conflicting.id))
        .expect_err("criterion conflict");
    common::assert_code(&error, tascade_core::ErrorCode::Conflict);
}

/// Tests invalidation actions per pre-flight state.
#[test]
fn test_invalidation_actions() {
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
    claim(&fx, claimed.id, "carol", "token-1", t(13)).expect("claim");

    let impact = preview(&fx, vec![
        ChangeOp::ModifyTask {
            task_id: reserved.id,
            patch: TaskPatch {
                work_spec: Some(work_spec("rescoped")),
                ..TaskPatch::default()
            },
        },
        ChangeOp::ModifyTask {
            task_id: claimed.id,
            patch: TaskPatch {
                work_spec: Some(work_spec("rescoped too")),
                ..TaskPatch::default()
            },
        },
    ]);

    let actions: Vec<(tascade_core::TaskId, InvalidationAction)> = impact
        .invalidations
        .iter()
        .map(|entry| (entry.task_id, entry.action))
        .collect();
    assert!(actions.contains(&(reserved.id, InvalidationAction::ReleaseReservation)));
    assert!(actions.contains(&(claimed.id, InvalidationAction::InvalidateClaim)));
}

/// Tests validation is pure: repeating it yields the same preview and
/// mutates nothing.
#[test]
fn test_validation_is_idempotent() {
    let fx = fixture();
    let a = create_task(&fx, &draft(&fx, "a"), t(10));
    let operations = vec![ChangeOp::ModifyTask {
        task_id: a.id,
        patch: TaskPatch {
            priority: Some(3),
            ..TaskPatch::default()
        },
    }];
    let changeset = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::INITIAL,
                operations,
                &agent("planner"),
                t(20),
            )
        })
        .expect("create");
    let first = fx
        .store
        .with_tx(|tx| fx.coordinator.validate_changeset_by_id(tx, changeset.id))
        .expect("first");
    let second = fx
        .store
        .with_tx(|tx| fx.coordinator.validate_changeset_by_id(tx, changeset.id))
        .expect("second");
    assert_eq!(first, second);
    assert_eq!(common::task_state(&fx, a.id), tascade_core::TaskState::Ready);
}

/// Tests unknown references reject the changeset at validation.
#[test]
fn test_unknown_reference_rejected() {
    let fx = fixture();
    let changeset = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.create_changeset(
                tx,
                fx.project.id,
                PlanVersion::INITIAL,
                vec![ChangeOp::RemoveTask {
                    task_id: tascade_core::TaskId::from_raw(404).expect("id"),
                }],
                &agent("planner"),
                t(10),
            )
        })
        .expect("create");
    let error = fx
        .store
        .with_tx(|tx| fx.coordinator.validate_changeset_by_id(tx, changeset.id))
        .expect_err("unknown task");
    common::assert_code(&error, tascade_core::ErrorCode::NotFound);
}
