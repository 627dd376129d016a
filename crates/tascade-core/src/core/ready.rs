// crates/tascade-core/src/core/ready.rs
// ============================================================================
// Module: Tascade Ready Engine
// Description: Eligibility filtering and deterministic ranking.
// Purpose: Compute the ready set per project, agent, and capability filter.
// Dependencies: crate::core::{capabilities, graph, paths, task}, serde
// ============================================================================

//! ## Overview
//! A task is eligible when it is ready (or reserved for the calling agent),
//! every incoming edge satisfies its unlock criterion, no active lease
//! exists, and no active reservation points at a different agent. The
//! ranking is stable: priority ascending, then the contention penalty over
//! exclusive paths, then creation time, then short id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::capabilities::covers;
use crate::core::graph::ProjectView;
use crate::core::identifiers::AgentId;
use crate::core::paths::contention_penalty;
use crate::core::task::Task;
use crate::core::task::TaskState;

// ============================================================================
// SECTION: Ready Entries
// ============================================================================

/// One entry in the computed ready set.
///
/// # Invariants
/// - `reserved_for_caller` is true only for reservations held by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyEntry {
    /// The eligible task.
    pub task: Task,
    /// True when the task is reserved for the calling agent.
    pub reserved_for_caller: bool,
    /// Deterministic contention penalty used in the ranking.
    pub contention: u32,
}

// ============================================================================
// SECTION: Ready Computation
// ============================================================================

/// Computes the eligible, ranked ready set for one agent.
///
/// Reserved tasks are visible only to their assignee and rank ahead of
/// unreserved entries. When `capabilities` is `None` no capability filter
/// applies; otherwise the task's tags must be a subset of the caller's.
#[must_use]
pub fn list_ready(
    view: &ProjectView,
    agent: &AgentId,
    capabilities: Option<&BTreeSet<String>>,
) -> Vec<ReadyEntry> {
    let in_flight: Vec<&[String]> = view
        .tasks
        .values()
        .filter(|task| task.state.is_in_flight())
        .map(|task| task.exclusive_paths.as_slice())
        .collect();

    let mut entries: Vec<ReadyEntry> = view
        .tasks
        .values()
        .filter(|task| !task.is_deprecated_at(view.plan_version))
        .filter_map(|task| {
            let reserved_for_caller = match task.state {
                TaskState::Ready => false,
                TaskState::Reserved => {
                    let reservation = view.active_reservations.get(&task.id)?;
                    if reservation.assignee != *agent {
                        return None;
                    }
                    true
                }
                _ => return None,
            };
            if view.active_leases.contains_key(&task.id) {
                return None;
            }
            if !reserved_for_caller
                && let Some(reservation) = view.active_reservations.get(&task.id)
                && reservation.assignee != *agent
            {
                return None;
            }
            if !view.dependencies_satisfied(task.id) {
                return None;
            }
            if let Some(held) = capabilities
                && !covers(held, &task.capability_tags)
            {
                return None;
            }
            Some(ReadyEntry {
                task: task.clone(),
                reserved_for_caller,
                contention: contention_penalty(&task.exclusive_paths, &in_flight),
            })
        })
        .collect();

    entries.sort_by(|left, right| {
        right
            .reserved_for_caller
            .cmp(&left.reserved_for_caller)
            .then_with(|| left.task.priority.cmp(&right.task.priority))
            .then_with(|| left.contention.cmp(&right.contention))
            .then_with(|| left.task.created_at.cmp(&right.task.created_at))
            .then_with(|| left.task.short_id.to_string().cmp(&right.task.short_id.to_string()))
    });
    entries
}
