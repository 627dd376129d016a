// crates/tascade-core/tests/transitions.rs
// ============================================================================
// Module: State Machine Tests
// Description: Transition table edges and commit-time invariants.
// ============================================================================
//! ## Overview
//! Validates the permitted transition edges and the evidence invariants
//! guarding `implemented` and `integrated`.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use tascade_core::AgentId;
use tascade_core::TaskClass;
use tascade_core::TaskState;
use tascade_core::TransitionFacts;
use tascade_core::TransitionRequest;
use tascade_core::core::transitions::edge_allowed;
use tascade_core::core::transitions::validate_transition;

/// Builds a plain request to a target state.
fn request(target: TaskState) -> TransitionRequest {
    TransitionRequest {
        target,
        actor: AgentId::new("alice"),
        reviewed_by: None,
        evidence_refs: Vec::new(),
        rationale: None,
        force: false,
    }
}

/// Facts satisfying every evidence invariant.
const fn full_facts() -> TransitionFacts {
    TransitionFacts {
        has_passed_artifact: true,
        gate_approved: None,
        has_successful_integration: true,
    }
}

// ============================================================================
// SECTION: Transition Table
// ============================================================================

/// Tests the positive edge set.
#[test]
fn test_permitted_edges() {
    let edges = [
        (TaskState::Backlog, TaskState::Ready),
        (TaskState::Ready, TaskState::Reserved),
        (TaskState::Ready, TaskState::Claimed),
        (TaskState::Reserved, TaskState::Ready),
        (TaskState::Reserved, TaskState::Claimed),
        (TaskState::Claimed, TaskState::Ready),
        (TaskState::Claimed, TaskState::InProgress),
        (TaskState::InProgress, TaskState::Implemented),
        (TaskState::Implemented, TaskState::Integrated),
        (TaskState::Claimed, TaskState::Abandoned),
        (TaskState::InProgress, TaskState::Abandoned),
        (TaskState::Abandoned, TaskState::Ready),
        (TaskState::Blocked, TaskState::Ready),
        (TaskState::Conflict, TaskState::Implemented),
        (TaskState::Ready, TaskState::Cancelled),
        (TaskState::InProgress, TaskState::Blocked),
        (TaskState::Implemented, TaskState::Conflict),
    ];
    for (from, to) in edges {
        assert!(edge_allowed(from, to), "expected {from} -> {to}");
    }
}

/// Tests terminal states admit no outgoing edges.
#[test]
fn test_terminal_states_are_final() {
    for from in [TaskState::Integrated, TaskState::Cancelled] {
        for to in [
            TaskState::Backlog,
            TaskState::Ready,
            TaskState::Claimed,
            TaskState::Blocked,
            TaskState::Cancelled,
        ] {
            assert!(!edge_allowed(from, to), "allowed {from} -> {to}");
        }
    }
}

/// Tests skipping lifecycle stages is rejected.
#[test]
fn test_stage_skips_rejected() {
    assert!(!edge_allowed(TaskState::Backlog, TaskState::Claimed));
    assert!(!edge_allowed(TaskState::Ready, TaskState::InProgress));
    assert!(!edge_allowed(TaskState::Claimed, TaskState::Implemented));
    assert!(!edge_allowed(TaskState::InProgress, TaskState::Integrated));
}

// ============================================================================
// SECTION: Evidence Invariants
// ============================================================================

/// Tests `implemented` requires a passed-check artifact.
#[test]
fn test_implemented_requires_passed_artifact() {
    let facts = TransitionFacts {
        has_passed_artifact: false,
        ..full_facts()
    };
    let error = validate_transition(
        TaskState::InProgress,
        TaskClass::Backend,
        &request(TaskState::Implemented),
        &facts,
    )
    .expect_err("must fail");
    assert_eq!(error.sub_code, Some("CHECKS_NOT_PASSED"));
}

/// Tests integration requires a reviewer distinct from the actor.
#[test]
fn test_self_review_rejected() {
    let mut integration = request(TaskState::Integrated);
    integration.reviewed_by = Some(AgentId::new("alice"));
    integration.evidence_refs = vec!["review://1".to_string()];
    let error = validate_transition(
        TaskState::Implemented,
        TaskClass::Backend,
        &integration,
        &full_facts(),
    )
    .expect_err("must fail");
    assert_eq!(error.sub_code, Some("SELF_REVIEW"));
}

/// Tests integration requires non-empty evidence references.
#[test]
fn test_integration_requires_evidence() {
    let mut integration = request(TaskState::Integrated);
    integration.reviewed_by = Some(AgentId::new("bob"));
    let error = validate_transition(
        TaskState::Implemented,
        TaskClass::Backend,
        &integration,
        &full_facts(),
    )
    .expect_err("must fail");
    assert_eq!(error.sub_code, Some("EVIDENCE_REQUIRED"));
}

/// Tests an applicable gate without an approving decision blocks
/// integration.
#[test]
fn test_gate_decision_required() {
    let mut integration = request(TaskState::Integrated);
    integration.reviewed_by = Some(AgentId::new("bob"));
    integration.evidence_refs = vec!["review://1".to_string()];
    let facts = TransitionFacts {
        gate_approved: Some(false),
        ..full_facts()
    };
    let error = validate_transition(
        TaskState::Implemented,
        TaskClass::Backend,
        &integration,
        &facts,
    )
    .expect_err("must fail");
    assert_eq!(error.sub_code, Some("GATE_DECISION_REQUIRED"));
}

/// Tests integration requires a successful terminal attempt.
#[test]
fn test_integration_requires_successful_attempt() {
    let mut integration = request(TaskState::Integrated);
    integration.reviewed_by = Some(AgentId::new("bob"));
    integration.evidence_refs = vec!["review://1".to_string()];
    let facts = TransitionFacts {
        has_successful_integration: false,
        ..full_facts()
    };
    let error = validate_transition(
        TaskState::Implemented,
        TaskClass::Backend,
        &integration,
        &facts,
    )
    .expect_err("must fail");
    assert_eq!(error.sub_code, Some("INTEGRATION_REQUIRED"));
}

/// Tests a fully evidenced integration passes.
#[test]
fn test_integration_with_full_evidence_passes() {
    let mut integration = request(TaskState::Integrated);
    integration.reviewed_by = Some(AgentId::new("bob"));
    integration.evidence_refs = vec!["review://1".to_string()];
    validate_transition(
        TaskState::Implemented,
        TaskClass::Backend,
        &integration,
        &full_facts(),
    )
    .expect("must pass");
}

// ============================================================================
// SECTION: Force Mode
// ============================================================================

/// Tests force mode requires a rationale but bypasses evidence.
#[test]
fn test_force_requires_rationale() {
    let mut forced = request(TaskState::Integrated);
    forced.force = true;
    let error = validate_transition(
        TaskState::Implemented,
        TaskClass::Backend,
        &forced,
        &TransitionFacts::default(),
    )
    .expect_err("must fail");
    assert_eq!(error.sub_code, Some("RATIONALE_REQUIRED"));

    forced.rationale = Some("hotfix window".to_string());
    validate_transition(
        TaskState::Implemented,
        TaskClass::Backend,
        &forced,
        &TransitionFacts::default(),
    )
    .expect("force with rationale passes");
}

/// Tests force mode never legalizes an illegal edge.
#[test]
fn test_force_cannot_bypass_table() {
    let mut forced = request(TaskState::Integrated);
    forced.force = true;
    forced.rationale = Some("attempted skip".to_string());
    let error = validate_transition(
        TaskState::Ready,
        TaskClass::Backend,
        &forced,
        &TransitionFacts::default(),
    )
    .expect_err("must fail");
    assert_eq!(error.sub_code, Some("ILLEGAL_TRANSITION"));
}

// ============================================================================
// SECTION: Gate Tasks
// ============================================================================

/// Tests gate-class tasks skip artifact and attempt requirements but still
/// need an approving decision.
#[test]
fn test_gate_task_integration_requires_decision_only() {
    let mut integration = request(TaskState::Integrated);
    integration.reviewed_by = Some(AgentId::new("bob"));
    integration.evidence_refs = vec!["review://1".to_string()];
    let undecided = TransitionFacts {
        has_passed_artifact: false,
        gate_approved: Some(false),
        has_successful_integration: false,
    };
    assert!(
        validate_transition(
            TaskState::Implemented,
            TaskClass::ReviewGate,
            &integration,
            &undecided,
        )
        .is_err()
    );
    let decided = TransitionFacts {
        gate_approved: Some(true),
        ..undecided
    };
    validate_transition(
        TaskState::Implemented,
        TaskClass::ReviewGate,
        &integration,
        &decided,
    )
    .expect("decided gate integrates");
}
