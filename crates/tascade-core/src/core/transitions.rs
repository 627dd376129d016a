// crates/tascade-core/src/core/transitions.rs
// ============================================================================
// Module: Tascade State Machine
// Description: Permitted task transitions and commit-time invariants.
// Purpose: Validate every state change before the store commits it.
// Dependencies: crate::core::{error, identifiers, task}, serde
// ============================================================================

//! ## Overview
//! The state machine validates transition edges and the evidence invariants
//! that guard them: a passed-check artifact before `implemented`, and
//! distinct review, non-empty evidence, gate approval, plus a successful
//! integration attempt before `integrated`. Force mode bypasses evidence
//! invariants only for authorized actors with a rationale, and is always
//! recorded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::error::DomainError;
use crate::core::error::sub_codes;
use crate::core::identifiers::AgentId;
use crate::core::task::TaskClass;
use crate::core::task::TaskState;

// ============================================================================
// SECTION: Transition Table
// ============================================================================

/// Returns true when the transition edge is in the state machine table.
///
/// Terminal states admit no outgoing edges. `blocked` and `conflict` are
/// reachable from any non-terminal state; recovery edges are
/// `blocked -> ready` and `conflict -> implemented`.
#[must_use]
pub const fn edge_allowed(from: TaskState, to: TaskState) -> bool {
    if from.is_terminal() {
        return false;
    }
    // Escapes available from any non-terminal state.
    if matches!(to, TaskState::Cancelled) {
        return true;
    }
    if matches!(to, TaskState::Blocked | TaskState::Conflict)
        && !matches!(from, TaskState::Blocked | TaskState::Conflict)
    {
        return true;
    }
    matches!(
        (from, to),
        (TaskState::Backlog, TaskState::Ready)
            | (TaskState::Ready, TaskState::Reserved | TaskState::Claimed | TaskState::Backlog)
            | (TaskState::Reserved, TaskState::Ready | TaskState::Claimed)
            | (TaskState::Claimed, TaskState::Ready | TaskState::InProgress | TaskState::Abandoned)
            | (TaskState::InProgress, TaskState::Implemented | TaskState::Abandoned)
            | (TaskState::Implemented, TaskState::Integrated)
            | (TaskState::Blocked, TaskState::Ready)
            | (TaskState::Conflict, TaskState::Implemented)
            | (TaskState::Abandoned, TaskState::Ready)
    )
}

// ============================================================================
// SECTION: Transition Request
// ============================================================================

/// Caller intent for one validated transition.
///
/// # Invariants
/// - `force` requires an authorized role at the surface and a rationale here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// Target state.
    pub target: TaskState,
    /// Acting agent or human.
    pub actor: AgentId,
    /// Reviewer recorded for integration transitions.
    pub reviewed_by: Option<AgentId>,
    /// Evidence references recorded for integration transitions.
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    /// Rationale; required in force mode.
    pub rationale: Option<String>,
    /// Bypass evidence invariants (authorized actors only).
    #[serde(default)]
    pub force: bool,
}

/// Facts gathered in the same transaction as the transition.
///
/// # Invariants
/// - Assembled from committed rows only; never from caller claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionFacts {
    /// A passed-check artifact exists for the task.
    pub has_passed_artifact: bool,
    /// Gate status: `None` when no rule applies, otherwise whether an
    /// approving decision exists for the task or its governing gate.
    pub gate_approved: Option<bool>,
    /// A terminal integration attempt with `success` exists.
    pub has_successful_integration: bool,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates one transition against the table and commit-time invariants.
///
/// # Errors
///
/// Returns `INVARIANT_VIOLATION` with a stable sub-code naming the failed
/// requirement. Gate-class tasks skip artifact and integration requirements;
/// their integration is governed by recorded gate decisions instead.
pub fn validate_transition(
    current: TaskState,
    task_class: TaskClass,
    request: &TransitionRequest,
    facts: &TransitionFacts,
) -> Result<(), DomainError> {
    if !edge_allowed(current, request.target) {
        return Err(DomainError::invariant(
            sub_codes::ILLEGAL_TRANSITION,
            format!("transition {current} -> {} is not permitted", request.target),
        ));
    }

    if request.force {
        if request.rationale.as_deref().is_none_or(|rationale| rationale.trim().is_empty()) {
            return Err(DomainError::invariant(
                sub_codes::RATIONALE_REQUIRED,
                "force mode requires a non-empty rationale",
            ));
        }
        return Ok(());
    }

    match (current, request.target) {
        (TaskState::InProgress, TaskState::Implemented) => {
            if !task_class.is_gate() && !facts.has_passed_artifact {
                return Err(DomainError::invariant(
                    sub_codes::CHECKS_NOT_PASSED,
                    "implemented requires an artifact with passed checks",
                ));
            }
            Ok(())
        }
        (TaskState::Conflict, TaskState::Implemented) => {
            if !task_class.is_gate() && !facts.has_passed_artifact {
                return Err(DomainError::invariant(
                    sub_codes::CHECKS_NOT_PASSED,
                    "recovery from conflict requires a fresh passed-check artifact",
                ));
            }
            Ok(())
        }
        (TaskState::Implemented, TaskState::Integrated) => {
            validate_integration(task_class, request, facts)
        }
        _ => Ok(()),
    }
}

/// Validates the `implemented -> integrated` evidence invariants.
fn validate_integration(
    task_class: TaskClass,
    request: &TransitionRequest,
    facts: &TransitionFacts,
) -> Result<(), DomainError> {
    let reviewer = request
        .reviewed_by
        .as_ref()
        .filter(|reviewer| !reviewer.as_str().trim().is_empty())
        .ok_or_else(|| {
            DomainError::invariant(
                sub_codes::REVIEW_REQUIRED,
                "integration requires a non-empty reviewer",
            )
        })?;
    if reviewer == &request.actor {
        return Err(DomainError::invariant(
            sub_codes::SELF_REVIEW,
            "reviewer must differ from the transition actor",
        ));
    }
    if request.evidence_refs.iter().all(|reference| reference.trim().is_empty()) {
        return Err(DomainError::invariant(
            sub_codes::EVIDENCE_REQUIRED,
            "integration requires non-empty evidence references",
        ));
    }
    if facts.gate_approved == Some(false) {
        return Err(DomainError::invariant(
            sub_codes::GATE_DECISION_REQUIRED,
            "an applicable gate rule has no approving decision",
        ));
    }
    if !task_class.is_gate() && !facts.has_successful_integration {
        return Err(DomainError::invariant(
            sub_codes::INTEGRATION_REQUIRED,
            "integration requires a successful terminal integration attempt",
        ));
    }
    Ok(())
}
