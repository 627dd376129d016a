// crates/tascade-core/src/core/gate.rs
// ============================================================================
// Module: Tascade Gate Policy
// Description: Gate rules, decisions, candidate links, and rule matching.
// Purpose: Generate review/merge gate tasks and govern candidate integration.
// Dependencies: crate::core::{identifiers, task, time}, serde
// ============================================================================

//! ## Overview
//! Gate rules watch a scope (project, phase, or milestone, optionally
//! filtered by task class) and, when their trigger fires, direct the kernel
//! to generate a synthetic gate task linked to the candidate tasks it
//! governs. Decisions recorded on the gate task either unblock candidate
//! integration or push candidates to blocked.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AgentId;
use crate::core::identifiers::GateDecisionId;
use crate::core::identifiers::GateRuleId;
use crate::core::identifiers::MilestoneId;
use crate::core::identifiers::PhaseId;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::TaskId;
use crate::core::task::Task;
use crate::core::task::TaskClass;
use crate::core::task::TaskState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Gate Kind and Scope
// ============================================================================

/// Kind of gate task a rule generates.
///
/// # Invariants
/// - Maps 1:1 onto the synthetic task classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Human/code review gate.
    ReviewGate,
    /// Merge serialization gate.
    MergeGate,
}

impl GateKind {
    /// Returns the task class of the generated gate task.
    #[must_use]
    pub const fn task_class(self) -> TaskClass {
        match self {
            Self::ReviewGate => TaskClass::ReviewGate,
            Self::MergeGate => TaskClass::MergeGate,
        }
    }
}

/// Scope selecting candidate tasks for a rule.
///
/// # Invariants
/// - `milestone_id` implies `phase_id` scope containment when both are set.
/// - An empty `task_classes` filter matches every class except gate classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GateScope {
    /// Optional phase filter.
    pub phase_id: Option<PhaseId>,
    /// Optional milestone filter.
    pub milestone_id: Option<MilestoneId>,
    /// Optional task class filter; empty matches all non-gate classes.
    #[serde(default)]
    pub task_classes: Vec<TaskClass>,
}

impl GateScope {
    /// Returns true when the task falls inside this scope.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if task.task_class.is_gate() {
            return false;
        }
        if self.phase_id.is_some_and(|phase| phase != task.phase_id) {
            return false;
        }
        if self.milestone_id.is_some_and(|milestone| milestone != task.milestone_id) {
            return false;
        }
        self.task_classes.is_empty() || self.task_classes.contains(&task.task_class)
    }
}

// ============================================================================
// SECTION: Gate Rule
// ============================================================================

/// Configured gate generation rule.
///
/// # Invariants
/// - At most one active gate task exists per rule at any instant.
/// - `max_batch` caps the candidate links of a generated gate task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRule {
    /// Opaque rule identifier.
    pub id: GateRuleId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Candidate selection scope.
    pub scope: GateScope,
    /// Kind of gate task to generate.
    pub kind: GateKind,
    /// Implemented-not-integrated count that fires the rule.
    pub pending_threshold: u32,
    /// Optional age in seconds after which a single candidate fires the rule.
    pub age_threshold_secs: Option<u64>,
    /// Maximum candidates linked to one generated gate task.
    pub max_batch: u32,
    /// Require the decision actor to differ from candidate authors.
    pub require_distinct_reviewer: bool,
    /// Whether the rule participates in evaluation.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Gate Decisions
// ============================================================================

/// Decision outcome recorded on a gate task.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    /// Candidates may integrate.
    Approved,
    /// Candidates are pushed to blocked.
    Rejected,
    /// Candidates may integrate; risk accepted and recorded.
    ApprovedWithRisk,
}

impl GateOutcome {
    /// Returns the stable wire form of the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ApprovedWithRisk => "approved_with_risk",
        }
    }

    /// Returns true for outcomes that permit candidate integration.
    #[must_use]
    pub const fn is_approving(self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedWithRisk)
    }
}

/// Immutable decision recorded on a gate task.
///
/// # Invariants
/// - Append-only; never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Opaque decision identifier.
    pub id: GateDecisionId,
    /// Rule that generated the gate task, when rule-generated.
    pub rule_id: Option<GateRuleId>,
    /// Gate task the decision is recorded on.
    pub gate_task_id: TaskId,
    /// Decision outcome.
    pub outcome: GateOutcome,
    /// Deciding actor.
    pub actor: AgentId,
    /// Reason for the decision.
    pub reason: String,
    /// Evidence references backing the decision.
    pub evidence_refs: Vec<String>,
    /// Decision timestamp.
    pub decided_at: Timestamp,
}

/// Link from a gate task to one governed candidate.
///
/// # Invariants
/// - `position` gives a deterministic candidate order within the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCandidateLink {
    /// Gate task.
    pub gate_task_id: TaskId,
    /// Governed candidate task.
    pub candidate_task_id: TaskId,
    /// Rule that generated the gate task, when rule-generated.
    pub rule_id: Option<GateRuleId>,
    /// Deterministic position within the gate's batch.
    pub position: u32,
}

// ============================================================================
// SECTION: Rule Matching
// ============================================================================

/// Candidate selection output for a fired rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateTrigger {
    /// Rule that fired.
    pub rule_id: GateRuleId,
    /// Candidates in deterministic order, capped at the rule's batch size.
    pub candidates: Vec<TaskId>,
}

/// Evaluates one rule against a project's tasks.
///
/// Candidates are implemented-not-integrated tasks in scope, excluding tasks
/// already governed by an undecided gate. Order is by short id (stable), and
/// the batch is capped by the rule configuration. Returns `None` when the
/// trigger has not fired.
#[must_use]
pub fn evaluate_rule(
    rule: &GateRule,
    tasks: &[&Task],
    already_governed: &[TaskId],
    now: Timestamp,
) -> Option<GateTrigger> {
    if !rule.is_active {
        return None;
    }
    let mut candidates: Vec<&Task> = tasks
        .iter()
        .filter(|task| task.state == TaskState::Implemented)
        .filter(|task| rule.scope.matches(task))
        .filter(|task| !already_governed.contains(&task.id))
        .copied()
        .collect();
    candidates.sort_by_key(|task| task.short_id.to_string());

    let aged = rule.age_threshold_secs.is_some_and(|threshold| {
        candidates.iter().any(|task| {
            let age_millis = now.millis_since(task.updated_at);
            age_millis >= i64::try_from(threshold.saturating_mul(1_000)).unwrap_or(i64::MAX)
        })
    });
    let count_fired = candidates.len() >= rule.pending_threshold as usize;
    if candidates.is_empty() || (!count_fired && !aged) {
        return None;
    }

    candidates.truncate(rule.max_batch as usize);
    Some(GateTrigger {
        rule_id: rule.id,
        candidates: candidates.iter().map(|task| task.id).collect(),
    })
}
