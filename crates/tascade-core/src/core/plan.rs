// crates/tascade-core/src/core/plan.rs
// ============================================================================
// Module: Tascade Plan Changesets
// Description: Versioned atomic plan mutations, materiality, impact preview.
// Purpose: Replan safely: validate operations, classify impact, protect work.
// Dependencies: crate::core::{error, graph, identifiers, task, time}, serde
// ============================================================================

//! ## Overview
//! A changeset is an ordered batch of graph operations applied atomically to
//! produce a new plan version. Validation is pure and idempotent: it
//! simulates the operations against a consistent view and computes the
//! impact preview. Materiality classification decides which in-flight claims
//! and reservations a change invalidates; priority-only and cosmetic changes
//! never invalidate active work, and in-progress tasks are never aborted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::error::DomainError;
use crate::core::error::ErrorCode;
use crate::core::graph::ProjectView;
use crate::core::graph::UnlockOn;
use crate::core::graph::would_create_cycle;
use crate::core::identifiers::ChangeSetId;
use crate::core::identifiers::MilestoneId;
use crate::core::identifiers::PhaseId;
use crate::core::identifiers::PlanVersion;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::TaskId;
use crate::core::task::TaskClass;
use crate::core::task::TaskState;
use crate::core::task::WorkSpec;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Payload for a task added by a changeset.
///
/// # Invariants
/// - `work_spec` passes validation before the operation is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    /// Owning milestone.
    pub milestone_id: MilestoneId,
    /// Task title.
    pub title: String,
    /// Task description.
    #[serde(default)]
    pub description: String,
    /// Scheduling priority; lower is more urgent.
    #[serde(default)]
    pub priority: i32,
    /// Task classification.
    pub task_class: TaskClass,
    /// Required claimer capabilities.
    #[serde(default)]
    pub capability_tags: Vec<String>,
    /// Paths the work is expected to touch (ordered).
    #[serde(default)]
    pub expected_touches: Vec<String>,
    /// Exclusive path patterns (ordered).
    #[serde(default)]
    pub exclusive_paths: Vec<String>,
    /// Shared path patterns (ordered).
    #[serde(default)]
    pub shared_paths: Vec<String>,
    /// Structured execution contract.
    pub work_spec: WorkSpec,
}

/// Partial update applied to an existing task.
///
/// # Invariants
/// - Absent fields leave the task untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskPatch {
    /// New title, when present.
    pub title: Option<String>,
    /// New description, when present.
    pub description: Option<String>,
    /// New priority, when present.
    pub priority: Option<i32>,
    /// New task class, when present.
    pub task_class: Option<TaskClass>,
    /// Replacement capability tags, when present.
    pub capability_tags: Option<Vec<String>>,
    /// Replacement expected touches, when present.
    pub expected_touches: Option<Vec<String>>,
    /// Replacement exclusive paths, when present.
    pub exclusive_paths: Option<Vec<String>>,
    /// Replacement shared paths, when present.
    pub shared_paths: Option<Vec<String>>,
    /// Replacement work spec, when present.
    pub work_spec: Option<WorkSpec>,
}

/// One ordered operation inside a changeset.
///
/// # Invariants
/// - Operations execute in order; the first violation rejects the changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOp {
    /// Add a new task under a milestone.
    AddTask {
        /// Task payload.
        draft: TaskDraft,
    },
    /// Deprecate an existing task.
    RemoveTask {
        /// Task to remove.
        task_id: TaskId,
    },
    /// Patch an existing task.
    ModifyTask {
        /// Task to modify.
        task_id: TaskId,
        /// Fields to change.
        patch: TaskPatch,
    },
    /// Add a dependency edge.
    AddDependency {
        /// Predecessor task.
        from: TaskId,
        /// Dependent task.
        to: TaskId,
        /// Unlock criterion.
        unlock_on: UnlockOn,
    },
    /// Remove a dependency edge.
    RemoveDependency {
        /// Predecessor task.
        from: TaskId,
        /// Dependent task.
        to: TaskId,
    },
    /// Retarget a dependency edge to a new dependent.
    RetargetDependency {
        /// Predecessor task.
        from: TaskId,
        /// Current dependent task.
        to: TaskId,
        /// New dependent task.
        new_to: TaskId,
    },
    /// Reorder a phase within its project.
    ReorderPhase {
        /// Phase to reorder.
        phase_id: PhaseId,
        /// New sequence value.
        sequence: u32,
    },
    /// Reorder a milestone within its phase.
    ReorderMilestone {
        /// Milestone to reorder.
        milestone_id: MilestoneId,
        /// New sequence value.
        sequence: u32,
    },
}

// ============================================================================
// SECTION: Changeset Records
// ============================================================================

/// Changeset lifecycle status.
///
/// # Invariants
/// - Applied changesets are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    /// Authored but not yet validated.
    Draft,
    /// Validated against the base plan version.
    Validated,
    /// Applied; plan version bumped.
    Applied,
    /// Rejected by validation or apply.
    Rejected,
}

impl ChangeSetStatus {
    /// Returns the stable wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Validated => "validated",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }
}

/// Versioned atomic batch of plan mutations.
///
/// # Invariants
/// - `operations` order is the execution order.
/// - `target_plan_version` is set exactly when the changeset applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanChangeSet {
    /// Opaque changeset identifier.
    pub id: ChangeSetId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Plan version the changeset was authored against.
    pub base_plan_version: PlanVersion,
    /// Plan version produced by apply, when applied.
    pub target_plan_version: Option<PlanVersion>,
    /// Lifecycle status.
    pub status: ChangeSetStatus,
    /// Ordered operations.
    pub operations: Vec<ChangeOp>,
    /// Computed impact preview, when validated.
    pub impact: Option<ImpactPreview>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Apply timestamp, when applied.
    pub applied_at: Option<Timestamp>,
}

/// Row linking a plan version to the changeset that produced it.
///
/// # Invariants
/// - Plan versions are never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanVersionRecord {
    /// Owning project.
    pub project_id: ProjectId,
    /// Plan version value.
    pub version: PlanVersion,
    /// Producing changeset; absent for the initial version.
    pub changeset_id: Option<ChangeSetId>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Materiality
// ============================================================================

/// Materiality classification of a task change.
///
/// # Invariants
/// - Material changes alter the execution contract and invalidate pre-flight
///   holds; non-material changes never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materiality {
    /// The change alters the execution contract.
    Material,
    /// Cosmetic, ordering, or priority-only change.
    NonMaterial,
}

/// Classifies a task patch. Material fields: work spec (including acceptance
/// criteria), capability tags, task class, exclusive/shared paths. Priority,
/// title, description, and expected touches are non-material.
#[must_use]
pub fn classify_patch(patch: &TaskPatch) -> Materiality {
    let material = patch.work_spec.is_some()
        || patch.capability_tags.is_some()
        || patch.task_class.is_some()
        || patch.exclusive_paths.is_some()
        || patch.shared_paths.is_some();
    if material { Materiality::Material } else { Materiality::NonMaterial }
}

// ============================================================================
// SECTION: Impact Preview
// ============================================================================

/// Invalidation action the apply path will take for a touched task.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationAction {
    /// Release the reservation and return the task to ready.
    ReleaseReservation,
    /// Invalidate the lease and return the task to ready.
    InvalidateClaim,
    /// No action: in-progress work finishes under its snapshot.
    ProtectInProgress,
}

/// Preview entry for a task touched by a material change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskImpact {
    /// Affected task.
    pub task_id: TaskId,
    /// Task state at validation time.
    pub state: TaskState,
    /// Action apply will take.
    pub action: InvalidationAction,
}

/// Computed impact of a validated changeset.
///
/// # Invariants
/// - Purely a function of the base view and the operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImpactPreview {
    /// Number of tasks the changeset adds.
    pub added_tasks: u32,
    /// Tasks the changeset deprecates.
    pub removed_tasks: Vec<TaskId>,
    /// Existing tasks that would become eligible.
    pub newly_ready: Vec<TaskId>,
    /// Existing ready tasks that would lose eligibility.
    pub newly_blocked: Vec<TaskId>,
    /// Tasks whose execution contract materially changes.
    pub material_changes: Vec<TaskId>,
    /// Invalidation actions apply will take.
    pub invalidations: Vec<TaskImpact>,
}

// ============================================================================
// SECTION: Validation Context
// ============================================================================

/// Scope entities visible to pure changeset validation.
///
/// # Invariants
/// - Assembled in the same transaction as the [`ProjectView`].
#[derive(Debug, Clone, Default)]
pub struct ScopeIndex {
    /// Known phase identifiers.
    pub phases: BTreeSet<PhaseId>,
    /// Known milestone identifiers.
    pub milestones: BTreeSet<MilestoneId>,
}

/// Simulated edge during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SimEdge {
    /// Predecessor task.
    from: TaskId,
    /// Dependent task.
    to: TaskId,
    /// Unlock criterion.
    unlock_on: UnlockOn,
}

/// Simulated task state during validation.
#[derive(Debug, Clone)]
struct SimTask {
    /// Task state.
    state: TaskState,
    /// Whether this task was added by the changeset.
    added: bool,
    /// Whether a material change touched this task.
    material: bool,
    /// Whether the task was removed by the changeset.
    removed: bool,
}

/// Placeholder id offset for tasks added during simulation.
const SIM_TASK_ID_BASE: u64 = u64::MAX / 2;

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a changeset against a consistent project view.
///
/// Validation is pure and idempotent: it never mutates the view and computes
/// the same preview for the same inputs. Structural violations (unknown
/// references, cycles, invalid payloads) reject the changeset.
///
/// # Errors
///
/// Returns a [`DomainError`] naming the first violating operation.
#[allow(
    clippy::too_many_lines,
    reason = "Operations are validated in one linear pass mirroring apply order."
)]
pub fn validate_changeset(
    view: &ProjectView,
    scope: &ScopeIndex,
    operations: &[ChangeOp],
) -> Result<ImpactPreview, DomainError> {
    let mut sim_tasks: BTreeMap<TaskId, SimTask> = view
        .tasks
        .iter()
        .map(|(id, task)| {
            (*id, SimTask {
                state: task.state,
                added: false,
                material: false,
                removed: false,
            })
        })
        .collect();
    let mut sim_edges: Vec<SimEdge> = view
        .edges
        .iter()
        .map(|edge| SimEdge {
            from: edge.from_task,
            to: edge.to_task,
            unlock_on: edge.unlock_on,
        })
        .collect();
    let mut added_tasks: u32 = 0;
    let mut removed_tasks: Vec<TaskId> = Vec::new();
    let mut next_sim_id = SIM_TASK_ID_BASE;

    for operation in operations {
        match operation {
            ChangeOp::AddTask {
                draft,
            } => {
                draft.work_spec.validate()?;
                if !scope.milestones.contains(&draft.milestone_id) {
                    return Err(DomainError::new(
                        ErrorCode::IdentifierParentRequired,
                        format!("milestone not found: {}", draft.milestone_id),
                    ));
                }
                next_sim_id = next_sim_id.saturating_add(1);
                if let Some(sim_id) = TaskId::from_raw(next_sim_id) {
                    sim_tasks.insert(sim_id, SimTask {
                        state: TaskState::Backlog,
                        added: true,
                        material: false,
                        removed: false,
                    });
                }
                added_tasks = added_tasks.saturating_add(1);
            }
            ChangeOp::RemoveTask {
                task_id,
            } => {
                let sim = sim_tasks
                    .get_mut(task_id)
                    .ok_or_else(|| DomainError::not_found("task", task_id))?;
                if sim.removed {
                    return Err(DomainError::not_found("task", task_id));
                }
                sim.removed = true;
                sim_edges.retain(|edge| edge.from != *task_id && edge.to != *task_id);
                removed_tasks.push(*task_id);
            }
            ChangeOp::ModifyTask {
                task_id,
                patch,
            } => {
                let material = classify_patch(patch) == Materiality::Material;
                if let Some(work_spec) = &patch.work_spec {
                    work_spec.validate()?;
                }
                let sim = sim_tasks
                    .get_mut(task_id)
                    .ok_or_else(|| DomainError::not_found("task", task_id))?;
                if sim.removed {
                    return Err(DomainError::not_found("task", task_id));
                }
                if material {
                    sim.material = true;
                }
            }
            ChangeOp::AddDependency {
                from,
                to,
                unlock_on,
            } => {
                ensure_task_live(&sim_tasks, *from)?;
                ensure_task_live(&sim_tasks, *to)?;
                if let Some(existing) =
                    sim_edges.iter().find(|edge| edge.from == *from && edge.to == *to)
                {
                    if existing.unlock_on == *unlock_on {
                        // Idempotent re-insert by (from, to, unlock_on).
                        continue;
                    }
                    // Mirrors the execution path: an active pair with a
                    // differing criterion conflicts rather than replacing.
                    return Err(DomainError::new(
                        ErrorCode::Conflict,
                        format!(
                            "dependency {from} -> {to} exists with unlock_on={}",
                            existing.unlock_on
                        ),
                    ));
                }
                let pairs: Vec<(TaskId, TaskId)> =
                    sim_edges.iter().map(|edge| (edge.from, edge.to)).collect();
                if would_create_cycle(&pairs, *from, *to) {
                    return Err(DomainError::new(
                        ErrorCode::DependencyCycle,
                        format!("dependency {from} -> {to} would close a cycle"),
                    ));
                }
                sim_edges.push(SimEdge {
                    from: *from,
                    to: *to,
                    unlock_on: *unlock_on,
                });
            }
            ChangeOp::RemoveDependency {
                from,
                to,
            } => {
                let before = sim_edges.len();
                sim_edges.retain(|edge| !(edge.from == *from && edge.to == *to));
                if sim_edges.len() == before {
                    return Err(DomainError::not_found(
                        "dependency",
                        format!("{from} -> {to}"),
                    ));
                }
            }
            ChangeOp::RetargetDependency {
                from,
                to,
                new_to,
            } => {
                ensure_task_live(&sim_tasks, *new_to)?;
                let position = sim_edges
                    .iter()
                    .position(|edge| edge.from == *from && edge.to == *to)
                    .ok_or_else(|| {
                        DomainError::not_found("dependency", format!("{from} -> {to}"))
                    })?;
                let unlock_on = sim_edges[position].unlock_on;
                sim_edges.remove(position);
                let pairs: Vec<(TaskId, TaskId)> =
                    sim_edges.iter().map(|edge| (edge.from, edge.to)).collect();
                if would_create_cycle(&pairs, *from, *new_to) {
                    return Err(DomainError::new(
                        ErrorCode::DependencyCycle,
                        format!("dependency {from} -> {new_to} would close a cycle"),
                    ));
                }
                sim_edges.push(SimEdge {
                    from: *from,
                    to: *new_to,
                    unlock_on,
                });
            }
            ChangeOp::ReorderPhase {
                phase_id, ..
            } => {
                if !scope.phases.contains(phase_id) {
                    return Err(DomainError::not_found("phase", phase_id));
                }
            }
            ChangeOp::ReorderMilestone {
                milestone_id, ..
            } => {
                if !scope.milestones.contains(milestone_id) {
                    return Err(DomainError::not_found("milestone", milestone_id));
                }
            }
        }
    }

    // Readiness deltas over pre-existing tasks; dependency-driven readiness
    // flips count as material for the affected task.
    let mut newly_ready = Vec::new();
    let mut newly_blocked = Vec::new();
    for (task_id, sim) in &mut sim_tasks {
        if sim.added || sim.removed {
            continue;
        }
        let before = eligibility(view, &view_edge_pairs(view), *task_id);
        let after = sim_eligibility(&sim_edges, view, *task_id);
        if !before && after && sim.state == TaskState::Backlog {
            newly_ready.push(*task_id);
        }
        if before && !after && sim.state == TaskState::Ready {
            newly_blocked.push(*task_id);
        }
        if before != after {
            sim.material = true;
        }
    }

    let material_changes: Vec<TaskId> = sim_tasks
        .iter()
        .filter(|(_, sim)| sim.material && !sim.added && !sim.removed)
        .map(|(id, _)| *id)
        .collect();
    let invalidations = material_changes
        .iter()
        .filter_map(|task_id| {
            let state = view.tasks.get(task_id)?.state;
            let action = match state {
                TaskState::Reserved => InvalidationAction::ReleaseReservation,
                TaskState::Claimed => InvalidationAction::InvalidateClaim,
                TaskState::InProgress => InvalidationAction::ProtectInProgress,
                _ => return None,
            };
            Some(TaskImpact {
                task_id: *task_id,
                state,
                action,
            })
        })
        .collect();

    Ok(ImpactPreview {
        added_tasks,
        removed_tasks,
        newly_ready,
        newly_blocked,
        material_changes,
        invalidations,
    })
}

/// Rejects references to missing or removed tasks.
fn ensure_task_live(
    sim_tasks: &BTreeMap<TaskId, SimTask>,
    task_id: TaskId,
) -> Result<(), DomainError> {
    match sim_tasks.get(&task_id) {
        Some(sim) if !sim.removed => Ok(()),
        _ => Err(DomainError::not_found("task", task_id)),
    }
}

/// Collects the view's active edge pairs.
fn view_edge_pairs(view: &ProjectView) -> Vec<(TaskId, TaskId, UnlockOn)> {
    view.edges.iter().map(|edge| (edge.from_task, edge.to_task, edge.unlock_on)).collect()
}

/// Computes eligibility over the original edge set.
fn eligibility(
    view: &ProjectView,
    edges: &[(TaskId, TaskId, UnlockOn)],
    task_id: TaskId,
) -> bool {
    edges.iter().filter(|(_, to, _)| *to == task_id).all(|(from, _, unlock_on)| {
        view.tasks.get(from).is_some_and(|task| unlock_on.satisfied_by(task.state))
    })
}

/// Computes eligibility over the simulated edge set.
fn sim_eligibility(sim_edges: &[SimEdge], view: &ProjectView, task_id: TaskId) -> bool {
    sim_edges.iter().filter(|edge| edge.to == task_id).all(|edge| {
        view.tasks.get(&edge.from).is_some_and(|task| edge.unlock_on.satisfied_by(task.state))
    })
}

// ============================================================================
// SECTION: Stale Plan Advisory
// ============================================================================

/// Advisory returned on heartbeats carrying a stale `seen_plan_version`.
///
/// # Invariants
/// - Advisories never force-abort in-flight work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStaleAdvisory {
    /// Refresh context: the task itself changed materially after capture.
    Refresh,
    /// Continue; unrelated plan changes occurred.
    ContinueWithNotice,
    /// Escalate: the task was deprecated by a later plan version.
    HumanReview,
}

