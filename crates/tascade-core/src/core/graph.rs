// crates/tascade-core/src/core/graph.rs
// ============================================================================
// Module: Tascade Graph Model
// Description: Projects, phases, milestones, dependency edges, and traversal.
// Purpose: Define the plan graph and enforce acyclicity and unlock semantics.
// Dependencies: crate::core::{identifiers, lease, task, time}, serde
// ============================================================================

//! ## Overview
//! The plan graph is a directed acyclic graph of tasks grouped under
//! project / phase / milestone scopes. Edges carry an unlock criterion that
//! decides when the downstream task becomes eligible. Acyclicity is enforced
//! by traversal over edges active in the current plan version, never by
//! index constraints alone.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::core::error::DomainError;
use crate::core::error::ErrorCode;
use crate::core::identifiers::MilestoneId;
use crate::core::identifiers::PhaseId;
use crate::core::identifiers::PlanVersion;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::ShortId;
use crate::core::identifiers::TaskId;
use crate::core::lease::Lease;
use crate::core::lease::Reservation;
use crate::core::task::Task;
use crate::core::task::TaskState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Project
// ============================================================================

/// Project lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Project accepts new work.
    Active,
    /// Project is archived; mutations are rejected.
    Archived,
}

impl ProjectStatus {
    /// Returns the stable wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = DomainError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(DomainError::new(
                ErrorCode::InvariantViolation,
                format!("unknown project status: {other}"),
            )),
        }
    }
}

/// Root container for a plan graph.
///
/// # Invariants
/// - `current_plan_version` is monotonic, starting at 1.
/// - Projects are never destroyed in normal flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Opaque project identifier.
    pub id: ProjectId,
    /// Project name, unique across the store.
    pub name: String,
    /// Lifecycle status.
    pub status: ProjectStatus,
    /// Current accepted plan version.
    pub current_plan_version: PlanVersion,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Phase and Milestone
// ============================================================================

/// Ordered grouping directly under a project.
///
/// # Invariants
/// - `sequence` orders phases within the project; `short_id` is `P<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Opaque phase identifier.
    pub id: PhaseId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Dotted short id `P<n>`.
    pub short_id: ShortId,
    /// Phase name.
    pub name: String,
    /// Ordering sequence within the project.
    pub sequence: u32,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

/// Ordered grouping under a phase.
///
/// # Invariants
/// - `sequence` orders milestones within the phase; `short_id` is `P<n>.M<m>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    /// Opaque milestone identifier.
    pub id: MilestoneId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning phase.
    pub phase_id: PhaseId,
    /// Dotted short id `P<n>.M<m>`.
    pub short_id: ShortId,
    /// Milestone name.
    pub name: String,
    /// Ordering sequence within the phase.
    pub sequence: u32,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Dependency Edges
// ============================================================================

/// Per-edge unlock criterion for the downstream task.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOn {
    /// Downstream unlocks once the predecessor is implemented.
    Implemented,
    /// Downstream unlocks once the predecessor is integrated.
    Integrated,
}

impl UnlockOn {
    /// Returns the stable wire form of the criterion.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Implemented => "implemented",
            Self::Integrated => "integrated",
        }
    }

    /// Returns true when the predecessor state satisfies this criterion.
    #[must_use]
    pub const fn satisfied_by(self, state: TaskState) -> bool {
        match self {
            Self::Implemented => state.is_at_least_implemented(),
            Self::Integrated => matches!(state, TaskState::Integrated),
        }
    }
}

impl FromStr for UnlockOn {
    type Err = DomainError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "implemented" => Ok(Self::Implemented),
            "integrated" => Ok(Self::Integrated),
            other => Err(DomainError::new(
                ErrorCode::InvariantViolation,
                format!("unknown unlock criterion: {other}"),
            )),
        }
    }
}

/// Directed dependency edge between two tasks of the same project.
///
/// # Invariants
/// - No self-loops; insertion must not close a cycle over active edges.
/// - Idempotent by `(from_task, to_task, unlock_on)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Owning project.
    pub project_id: ProjectId,
    /// Predecessor task.
    pub from_task: TaskId,
    /// Dependent task.
    pub to_task: TaskId,
    /// Unlock criterion for the dependent.
    pub unlock_on: UnlockOn,
    /// Plan version that introduced the edge.
    pub introduced_in_plan_version: PlanVersion,
    /// Plan version that removed the edge, when retired by a replan.
    pub removed_in_plan_version: Option<PlanVersion>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

impl DependencyEdge {
    /// Returns true when the edge is active at the given plan version.
    #[must_use]
    pub fn is_active_at(&self, version: PlanVersion) -> bool {
        self.introduced_in_plan_version <= version
            && self.removed_in_plan_version.is_none_or(|removed| removed > version)
    }
}

// ============================================================================
// SECTION: Project View
// ============================================================================

/// Consistent in-transaction snapshot of one project's graph.
///
/// # Invariants
/// - Assembled inside a single transaction; never cached across operations.
#[derive(Debug, Clone)]
pub struct ProjectView {
    /// Current plan version the view was assembled at.
    pub plan_version: PlanVersion,
    /// Tasks keyed by identifier.
    pub tasks: BTreeMap<TaskId, Task>,
    /// Dependency edges active at `plan_version`.
    pub edges: Vec<DependencyEdge>,
    /// Active leases keyed by task.
    pub active_leases: BTreeMap<TaskId, Lease>,
    /// Active reservations keyed by task.
    pub active_reservations: BTreeMap<TaskId, Reservation>,
}

impl ProjectView {
    /// Returns the active incoming edges of a task.
    #[must_use]
    pub fn incoming(&self, task: TaskId) -> Vec<&DependencyEdge> {
        self.edges.iter().filter(|edge| edge.to_task == task).collect()
    }

    /// Returns the active outgoing edges of a task.
    #[must_use]
    pub fn outgoing(&self, task: TaskId) -> Vec<&DependencyEdge> {
        self.edges.iter().filter(|edge| edge.from_task == task).collect()
    }

    /// Returns true when every incoming edge of the task is satisfied.
    #[must_use]
    pub fn dependencies_satisfied(&self, task: TaskId) -> bool {
        self.incoming(task).iter().all(|edge| {
            self.tasks
                .get(&edge.from_task)
                .is_some_and(|predecessor| edge.unlock_on.satisfied_by(predecessor.state))
        })
    }
}

// ============================================================================
// SECTION: Cycle Detection
// ============================================================================

/// Returns true when adding `from -> to` would close a cycle over the given
/// active edges. Self-loops count as cycles.
///
/// The check is a depth-first traversal from `to` looking for `from`; it is
/// deliberately a graph walk rather than a uniqueness constraint so racing
/// inserts cannot jointly close a cycle when serialized.
#[must_use]
pub fn would_create_cycle(
    edges: &[(TaskId, TaskId)],
    from: TaskId,
    to: TaskId,
) -> bool {
    if from == to {
        return true;
    }
    let mut adjacency: BTreeMap<TaskId, Vec<TaskId>> = BTreeMap::new();
    for (edge_from, edge_to) in edges {
        adjacency.entry(*edge_from).or_default().push(*edge_to);
    }
    let mut stack = vec![to];
    let mut visited: BTreeSet<TaskId> = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if current == from {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = adjacency.get(&current) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

/// Validates a candidate edge against the active edge set.
///
/// # Errors
///
/// Returns `DEPENDENCY_CYCLE` when the edge would close a cycle (including a
/// self-loop).
pub fn check_edge_acyclic(
    edges: &[(TaskId, TaskId)],
    from: TaskId,
    to: TaskId,
) -> Result<(), DomainError> {
    if would_create_cycle(edges, from, to) {
        return Err(DomainError::new(
            ErrorCode::DependencyCycle,
            format!("dependency {from} -> {to} would close a cycle"),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Display Helpers
// ============================================================================

impl fmt::Display for UnlockOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
