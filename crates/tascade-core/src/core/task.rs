// crates/tascade-core/src/core/task.rs
// ============================================================================
// Module: Tascade Task Model
// Description: Task states, classes, work specs, and the task record.
// Purpose: Define the unit of work and its execution contract payload.
// Dependencies: crate::core::{error, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Tasks are the unit of work coordinated by the kernel. A task carries its
//! lifecycle state, scheduling attributes, scope declarations, and a
//! structured work spec that becomes the execution contract once claimed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::DomainError;
use crate::core::error::ErrorCode;
use crate::core::identifiers::AgentId;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::ChangelogEntryId;
use crate::core::identifiers::MilestoneId;
use crate::core::identifiers::PhaseId;
use crate::core::identifiers::PlanVersion;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::ShortId;
use crate::core::identifiers::TaskId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Task State
// ============================================================================

/// Task lifecycle state.
///
/// # Invariants
/// - Variants are stable for serialization and event payloads.
/// - Permitted transitions are enforced by the state machine module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created but not yet eligible for execution.
    Backlog,
    /// Eligible: all incoming edges satisfied, no exclusive hold.
    Ready,
    /// Hard-assigned to a specific future claimer.
    Reserved,
    /// Claimed under an active lease; work not yet started.
    Claimed,
    /// Execution started; protected by the captured snapshot.
    InProgress,
    /// Work submitted with passing checks; awaiting review and integration.
    Implemented,
    /// Reviewed and integrated; terminal for normal flow.
    Integrated,
    /// Held by a gate rejection or operator action.
    Blocked,
    /// Integration produced a conflict; needs a fresh artifact.
    Conflict,
    /// Lease given up by its holder; awaiting re-queue.
    Abandoned,
    /// Cancelled by authorized action; terminal.
    Cancelled,
}

impl TaskState {
    /// Returns the stable wire form of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Implemented => "implemented",
            Self::Integrated => "integrated",
            Self::Blocked => "blocked",
            Self::Conflict => "conflict",
            Self::Abandoned => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Integrated | Self::Cancelled)
    }

    /// Returns true when the task is exclusively held by an agent.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Claimed | Self::InProgress)
    }

    /// Returns true when the state counts as unlocked progress for
    /// dependency purposes.
    #[must_use]
    pub const fn is_at_least_implemented(self) -> bool {
        matches!(self, Self::Implemented | Self::Integrated)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = DomainError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "backlog" => Ok(Self::Backlog),
            "ready" => Ok(Self::Ready),
            "reserved" => Ok(Self::Reserved),
            "claimed" => Ok(Self::Claimed),
            "in_progress" => Ok(Self::InProgress),
            "implemented" => Ok(Self::Implemented),
            "integrated" => Ok(Self::Integrated),
            "blocked" => Ok(Self::Blocked),
            "conflict" => Ok(Self::Conflict),
            "abandoned" => Ok(Self::Abandoned),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::new(
                ErrorCode::InvariantViolation,
                format!("unknown task state: {other}"),
            )),
        }
    }
}

// ============================================================================
// SECTION: Task Class
// ============================================================================

/// Classification of a task used by gate rules and scheduling policy.
///
/// # Invariants
/// - Variants are stable; unknown inputs fail `INVALID_TASK_CLASS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Architectural design work.
    Architecture,
    /// Database schema work.
    DbSchema,
    /// Security-sensitive work.
    Security,
    /// Changes spanning multiple subsystems.
    CrossCutting,
    /// Synthetic gate task governing review of candidates.
    ReviewGate,
    /// Synthetic gate task governing merge of candidates.
    MergeGate,
    /// Frontend work.
    Frontend,
    /// Backend work.
    Backend,
    /// Create/read/update/delete plumbing.
    Crud,
    /// Anything else.
    Other,
}

impl TaskClass {
    /// Returns the stable wire form of the class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::DbSchema => "db_schema",
            Self::Security => "security",
            Self::CrossCutting => "cross_cutting",
            Self::ReviewGate => "review_gate",
            Self::MergeGate => "merge_gate",
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Crud => "crud",
            Self::Other => "other",
        }
    }

    /// Returns true for synthetic gate task classes.
    #[must_use]
    pub const fn is_gate(self) -> bool {
        matches!(self, Self::ReviewGate | Self::MergeGate)
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskClass {
    type Err = DomainError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "architecture" => Ok(Self::Architecture),
            "db_schema" => Ok(Self::DbSchema),
            "security" => Ok(Self::Security),
            "cross_cutting" => Ok(Self::CrossCutting),
            "review_gate" => Ok(Self::ReviewGate),
            "merge_gate" => Ok(Self::MergeGate),
            "frontend" => Ok(Self::Frontend),
            "backend" => Ok(Self::Backend),
            "crud" => Ok(Self::Crud),
            "other" => Ok(Self::Other),
            other => Err(DomainError::new(
                ErrorCode::InvalidTaskClass,
                format!("unknown task class: {other}"),
            )),
        }
    }
}

// ============================================================================
// SECTION: Work Spec
// ============================================================================

/// Structured execution contract for a task.
///
/// # Invariants
/// - `objective` is non-empty after validation.
/// - `extensions` is an opaque map passed through verbatim; the kernel never
///   interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkSpec {
    /// What the task must accomplish.
    pub objective: String,
    /// Constraints the implementation must honor.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Acceptance criteria reviewed at integration time.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Interfaces the task is expected to expose or consume.
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Hints about where in the tree the work lands.
    #[serde(default)]
    pub path_hints: Vec<String>,
    /// Opaque extension payload validated only for JSON shape.
    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
}

impl WorkSpec {
    /// Validates the work spec at ingress.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_WORK_SPEC` when the objective is empty or whitespace.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.objective.trim().is_empty() {
            return Err(DomainError::new(
                ErrorCode::InvalidWorkSpec,
                "work spec objective must be non-empty",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Task Record
// ============================================================================

/// The unit of work coordinated by the kernel.
///
/// # Invariants
/// - `version` is an optimistic concurrency counter bumped on every mutation.
/// - `capability_tags` is a set; path sequences preserve declaration order.
/// - `short_id` is task-shaped and unique within the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque task identifier.
    pub id: TaskId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning phase (inferred from the milestone).
    pub phase_id: PhaseId,
    /// Owning milestone.
    pub milestone_id: MilestoneId,
    /// Dotted short id `P<n>.M<m>.T<t>`.
    pub short_id: ShortId,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
    /// Lifecycle state.
    pub state: TaskState,
    /// Scheduling priority; lower is more urgent.
    pub priority: i32,
    /// Task classification.
    pub task_class: TaskClass,
    /// Capability tags required of a claimer (membership-only set).
    pub capability_tags: BTreeSet<String>,
    /// Paths the work is expected to touch (ordered).
    pub expected_touches: Vec<String>,
    /// Path patterns held exclusively while in flight (ordered).
    pub exclusive_paths: Vec<String>,
    /// Path patterns shared with concurrent work (ordered).
    pub shared_paths: Vec<String>,
    /// Structured execution contract.
    pub work_spec: WorkSpec,
    /// Plan version that introduced the task.
    pub introduced_in_plan_version: PlanVersion,
    /// Plan version that deprecated the task, when removed by a replan.
    pub deprecated_in_plan_version: Option<PlanVersion>,
    /// Optimistic concurrency counter.
    pub version: u64,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last mutation timestamp.
    pub updated_at: Timestamp,
}

impl Task {
    /// Returns true when the task is deprecated at the given plan version.
    #[must_use]
    pub fn is_deprecated_at(&self, version: PlanVersion) -> bool {
        self.deprecated_in_plan_version.is_some_and(|deprecated| deprecated <= version)
    }
}

// ============================================================================
// SECTION: Changelog
// ============================================================================

/// Author classification for changelog entries.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangelogAuthor {
    /// An autonomous worker.
    Agent,
    /// A human operator or reviewer.
    Human,
    /// The kernel itself.
    System,
}

/// Entry classification for changelog entries.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangelogKind {
    /// Free-form note.
    Note,
    /// Recorded state change annotation.
    StateChange,
    /// Claim or reservation invalidation annotation.
    Invalidation,
    /// Review or gate annotation.
    Review,
}

/// Append-only per-task note.
///
/// # Invariants
/// - Entries are immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChangelogEntry {
    /// Entry identifier.
    pub id: ChangelogEntryId,
    /// Task the entry belongs to.
    pub task_id: TaskId,
    /// Author identifier.
    pub author: AgentId,
    /// Author classification.
    pub author_kind: ChangelogAuthor,
    /// Entry classification.
    pub entry_kind: ChangelogKind,
    /// Entry body.
    pub body: String,
    /// Artifact references attached to the entry.
    pub artifact_refs: Vec<ArtifactId>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}
