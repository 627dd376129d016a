// crates/tascade-core/src/core/artifact.rs
// ============================================================================
// Module: Tascade Artifacts and Integration Attempts
// Description: Submitted work products and serialized integration outcomes.
// Purpose: Model the append-only evidence trail from submission to merge.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Artifacts record what an agent submitted for a task: a branch, an optional
//! head commit, a check reference, and the touched paths. Integration
//! attempts record the serialized outcome of merging each artifact. Both are
//! append-only and outlive the task for audit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::AgentId;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::AttemptId;
use crate::core::identifiers::TaskId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Check Status
// ============================================================================

/// CI check status attached to an artifact.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Checks not yet reported.
    Pending,
    /// Checks passed.
    Passed,
    /// Checks failed.
    Failed,
}

impl CheckStatus {
    /// Returns the stable wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

// ============================================================================
// SECTION: Artifact
// ============================================================================

/// Per-task submitted work product.
///
/// # Invariants
/// - Append-only; no deduplication; multiple artifacts per task are permitted.
/// - `touched_paths` preserves submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Opaque artifact identifier.
    pub id: ArtifactId,
    /// Task the artifact belongs to.
    pub task_id: TaskId,
    /// Submitting agent.
    pub agent_id: AgentId,
    /// Branch identifier carrying the work.
    pub branch: String,
    /// Head commit identifier, when known.
    pub commit: Option<String>,
    /// External check reference, when known.
    pub check_ref: Option<String>,
    /// Check status at submission or latest update.
    pub check_status: CheckStatus,
    /// Paths the artifact touched (ordered).
    pub touched_paths: Vec<String>,
    /// Submission timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Integration Attempts
// ============================================================================

/// Outcome of an integration attempt.
///
/// # Invariants
/// - Variants are stable for serialization; `Queued` is the only non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationResult {
    /// Attempt is waiting in the queue.
    Queued,
    /// Integration succeeded.
    Success,
    /// Integration hit a merge conflict.
    Conflict,
    /// Integration checks failed.
    FailedChecks,
}

impl IntegrationResult {
    /// Returns the stable wire form of the result.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Success => "success",
            Self::Conflict => "conflict",
            Self::FailedChecks => "failed_checks",
        }
    }

    /// Returns true for terminal results.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued)
    }
}

/// Serialized attempt to integrate a task's artifact.
///
/// # Invariants
/// - Append-only; attempts per task complete in creation order.
/// - `ended_at` is set exactly when the result becomes terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationAttempt {
    /// Opaque attempt identifier.
    pub id: AttemptId,
    /// Task being integrated.
    pub task_id: TaskId,
    /// Base identifier the attempt merges onto.
    pub base_ref: String,
    /// Head identifier being merged.
    pub head_ref: String,
    /// Attempt outcome.
    pub result: IntegrationResult,
    /// Diagnostics payload for non-success outcomes.
    pub diagnostics: Option<Value>,
    /// Enqueue timestamp.
    pub started_at: Timestamp,
    /// Completion timestamp for terminal results.
    pub ended_at: Option<Timestamp>,
}
