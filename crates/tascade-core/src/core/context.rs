// crates/tascade-core/src/core/context.rs
// ============================================================================
// Module: Tascade Context Projection
// Description: Bounded ancestor/dependent slices for agent briefing.
// Purpose: Assemble the read model an agent needs before starting work.
// Dependencies: crate::core::{event, graph, identifiers, task}, serde
// ============================================================================

//! ## Overview
//! The context projection walks a bounded neighborhood of the dependency
//! graph around one task: ancestors upstream, dependents downstream, open
//! blockers on any upstream path, and the task's recent events. Ordering is
//! deterministic: breadth-first by depth, then edge-insertion order, then
//! short id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::event::EventRecord;
use crate::core::graph::ProjectView;
use crate::core::identifiers::PlanVersion;
use crate::core::identifiers::ShortId;
use crate::core::identifiers::TaskId;
use crate::core::task::Task;
use crate::core::task::TaskState;
use crate::core::task::WorkSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default upstream depth.
pub const DEFAULT_ANCESTOR_DEPTH: u32 = 2;
/// Default downstream depth.
pub const DEFAULT_DEPENDENT_DEPTH: u32 = 1;
/// Server-enforced maximum traversal depth in either direction.
pub const MAX_CONTEXT_DEPTH: u32 = 5;

// ============================================================================
// SECTION: Context Types
// ============================================================================

/// One neighbor in the context slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextNode {
    /// Neighbor task identifier.
    pub task_id: TaskId,
    /// Neighbor short id.
    pub short_id: ShortId,
    /// Neighbor title.
    pub title: String,
    /// Neighbor state.
    pub state: TaskState,
    /// Distance in edges from the focus task.
    pub depth: u32,
}

/// Assembled context projection for one task.
///
/// # Invariants
/// - `plan_version` is the version the projection was assembled at.
/// - Slices are bounded by the requested depths and the server maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// The focus task.
    pub task: Task,
    /// Effective work spec: the execution snapshot when one binds the task,
    /// otherwise the task's current work spec.
    pub effective_work_spec: WorkSpec,
    /// Upstream neighbors within the ancestor depth.
    pub ancestors: Vec<ContextNode>,
    /// Downstream neighbors within the dependent depth.
    pub dependents: Vec<ContextNode>,
    /// Blocked or conflicted tasks on any upstream path.
    pub open_blockers: Vec<TaskId>,
    /// Recent events for the task, newest last.
    pub recent_events: Vec<EventRecord>,
    /// Plan version used to assemble the projection.
    pub plan_version: PlanVersion,
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Traversal direction over dependency edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Walk incoming edges toward predecessors.
    Upstream,
    /// Walk outgoing edges toward dependents.
    Downstream,
}

/// Walks the graph breadth-first up to `depth` edges from `start`.
fn walk(view: &ProjectView, start: TaskId, depth: u32, direction: Direction) -> Vec<ContextNode> {
    let mut nodes = Vec::new();
    let mut visited: BTreeSet<TaskId> = BTreeSet::new();
    visited.insert(start);
    let mut frontier = vec![start];
    for level in 1..=depth {
        let mut next = Vec::new();
        for current in &frontier {
            let neighbors: Vec<TaskId> = match direction {
                Direction::Upstream => {
                    view.incoming(*current).iter().map(|edge| edge.from_task).collect()
                }
                Direction::Downstream => {
                    view.outgoing(*current).iter().map(|edge| edge.to_task).collect()
                }
            };
            for neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                if let Some(task) = view.tasks.get(&neighbor) {
                    nodes.push(ContextNode {
                        task_id: task.id,
                        short_id: task.short_id,
                        title: task.title.clone(),
                        state: task.state,
                        depth: level,
                    });
                    next.push(neighbor);
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }
    nodes.sort_by(|left, right| {
        left.depth
            .cmp(&right.depth)
            .then_with(|| left.short_id.to_string().cmp(&right.short_id.to_string()))
    });
    nodes
}

/// Collects blocked or conflicted tasks on any upstream path from `start`,
/// at unlimited depth.
fn upstream_blockers(view: &ProjectView, start: TaskId) -> Vec<TaskId> {
    let mut blockers = Vec::new();
    let mut visited: BTreeSet<TaskId> = BTreeSet::new();
    visited.insert(start);
    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        for edge in view.incoming(current) {
            if !visited.insert(edge.from_task) {
                continue;
            }
            if let Some(task) = view.tasks.get(&edge.from_task) {
                if matches!(task.state, TaskState::Blocked | TaskState::Conflict) {
                    blockers.push(task.id);
                }
                stack.push(task.id);
            }
        }
    }
    blockers.sort_unstable();
    blockers
}

/// Assembles the context projection for one task.
///
/// Depths are clamped to [`MAX_CONTEXT_DEPTH`]. The effective work spec is
/// supplied by the caller so execution snapshots bind in-progress tasks.
#[must_use]
pub fn assemble(
    view: &ProjectView,
    task: &Task,
    effective_work_spec: WorkSpec,
    ancestor_depth: u32,
    dependent_depth: u32,
    recent_events: Vec<EventRecord>,
) -> TaskContext {
    let ancestor_depth = ancestor_depth.min(MAX_CONTEXT_DEPTH);
    let dependent_depth = dependent_depth.min(MAX_CONTEXT_DEPTH);
    TaskContext {
        task: task.clone(),
        effective_work_spec,
        ancestors: walk(view, task.id, ancestor_depth, Direction::Upstream),
        dependents: walk(view, task.id, dependent_depth, Direction::Downstream),
        open_blockers: upstream_blockers(view, task.id),
        recent_events,
        plan_version: view.plan_version,
    }
}
