// crates/tascade-core/src/core/error.rs
// ============================================================================
// Module: Tascade Domain Errors
// Description: Stable domain error codes and the kernel error payload.
// Purpose: Surface invariant and validation failures with machine-stable codes.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Every expected failure in the kernel carries a stable domain code, a
//! human-readable message, an optional stable sub-code, and optional
//! structured details. Callers branch on the code, never on the message.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Stable domain error codes.
///
/// # Invariants
/// - Wire forms are SCREAMING_SNAKE_CASE and never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// State machine or transition requirement failed.
    InvariantViolation,
    /// Edge creation would close a dependency cycle.
    DependencyCycle,
    /// Changeset apply called with an outdated base plan version.
    PlanStale,
    /// Lease token unknown or no longer active.
    LeaseStale,
    /// Lease token superseded by a newer fencing counter.
    LeaseFenced,
    /// Claim attempt by a non-assignee while reserved.
    ReservationConflict,
    /// Capability input had an invalid shape.
    InvalidCapabilities,
    /// Task class not in the supported set.
    InvalidTaskClass,
    /// Work spec payload failed validation.
    InvalidWorkSpec,
    /// Short id resolves to multiple projects.
    AmbiguousReference,
    /// Child created without a resolvable parent.
    IdentifierParentRequired,
    /// Key invalid, revoked, or out of scope.
    AuthDenied,
    /// Optimistic concurrency version mismatch.
    Conflict,
    /// Referenced entity does not exist.
    NotFound,
}

impl ErrorCode {
    /// Returns the stable wire form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvariantViolation => "INVARIANT_VIOLATION",
            Self::DependencyCycle => "DEPENDENCY_CYCLE",
            Self::PlanStale => "PLAN_STALE",
            Self::LeaseStale => "LEASE_STALE",
            Self::LeaseFenced => "LEASE_FENCED",
            Self::ReservationConflict => "RESERVATION_CONFLICT",
            Self::InvalidCapabilities => "INVALID_CAPABILITIES",
            Self::InvalidTaskClass => "INVALID_TASK_CLASS",
            Self::InvalidWorkSpec => "INVALID_WORK_SPEC",
            Self::AmbiguousReference => "AMBIGUOUS_REFERENCE",
            Self::IdentifierParentRequired => "IDENTIFIER_PARENT_REQUIRED",
            Self::AuthDenied => "AUTH_DENIED",
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Invariant Sub-Codes
// ============================================================================

/// Stable sub-codes attached to `INVARIANT_VIOLATION` failures.
pub mod sub_codes {
    /// The requested transition edge is not in the state machine table.
    pub const ILLEGAL_TRANSITION: &str = "ILLEGAL_TRANSITION";
    /// `in_progress -> implemented` requires a passed-check artifact.
    pub const CHECKS_NOT_PASSED: &str = "CHECKS_NOT_PASSED";
    /// `implemented -> integrated` requires a reviewer distinct from the actor.
    pub const SELF_REVIEW: &str = "SELF_REVIEW";
    /// `implemented -> integrated` requires a non-empty reviewer.
    pub const REVIEW_REQUIRED: &str = "REVIEW_REQUIRED";
    /// `implemented -> integrated` requires non-empty evidence references.
    pub const EVIDENCE_REQUIRED: &str = "EVIDENCE_REQUIRED";
    /// An applicable gate rule has no approving decision yet.
    pub const GATE_DECISION_REQUIRED: &str = "GATE_DECISION_REQUIRED";
    /// No terminal successful integration attempt exists.
    pub const INTEGRATION_REQUIRED: &str = "INTEGRATION_REQUIRED";
    /// Incoming dependency edges are not yet satisfied.
    pub const DEPENDENCIES_UNSATISFIED: &str = "DEPENDENCIES_UNSATISFIED";
    /// An active lease already exists on the task.
    pub const LEASE_ACTIVE: &str = "LEASE_ACTIVE";
    /// The caller's capabilities do not cover the task's capability tags.
    pub const CAPABILITY_MISMATCH: &str = "CAPABILITY_MISMATCH";
    /// Force mode requires an explicit rationale.
    pub const RATIONALE_REQUIRED: &str = "RATIONALE_REQUIRED";
    /// Integration attempts must complete in per-task creation order.
    pub const ATTEMPT_ORDER: &str = "ATTEMPT_ORDER";
    /// The attempt is already terminal.
    pub const ATTEMPT_TERMINAL: &str = "ATTEMPT_TERMINAL";
    /// The task state does not admit this operation.
    pub const STATE_NOT_ELIGIBLE: &str = "STATE_NOT_ELIGIBLE";
    /// The gate task already carries a recorded decision path conflict.
    pub const GATE_ALREADY_DECIDED: &str = "GATE_ALREADY_DECIDED";
    /// The decision actor authored a governed candidate.
    pub const REVIEWER_IS_AUTHOR: &str = "REVIEWER_IS_AUTHOR";
}

// ============================================================================
// SECTION: Domain Error
// ============================================================================

/// Domain failure carrying a stable code, message, and optional details.
///
/// # Invariants
/// - `code` and `sub_code` are stable for programmatic handling.
/// - `details` never embeds secrets or raw credentials.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct DomainError {
    /// Stable domain error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional stable sub-code qualifying the failure.
    pub sub_code: Option<&'static str>,
    /// Optional structured details.
    pub details: Option<Value>,
}

impl DomainError {
    /// Creates a domain error with a code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            sub_code: None,
            details: None,
        }
    }

    /// Creates an `INVARIANT_VIOLATION` with a stable sub-code.
    #[must_use]
    pub fn invariant(sub_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvariantViolation,
            message: message.into(),
            sub_code: Some(sub_code),
            details: None,
        }
    }

    /// Creates a `NOT_FOUND` error for a named entity.
    #[must_use]
    pub fn not_found(entity: &str, reference: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{entity} not found: {reference}"))
    }

    /// Returns a copy with structured details attached.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Returns a copy with a stable sub-code attached.
    #[must_use]
    pub const fn with_sub_code(mut self, sub_code: &'static str) -> Self {
        self.sub_code = Some(sub_code);
        self
    }
}
