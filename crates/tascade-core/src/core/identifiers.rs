// crates/tascade-core/src/core/identifiers.rs
// ============================================================================
// Module: Tascade Identifiers
// Description: Canonical opaque identifiers and dotted short IDs.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Tascade.
//! Opaque identifiers are non-zero, 1-based integers allocated by the store.
//! Short identifiers follow the dotted grammar `P<n>`, `P<n>.M<m>`,
//! `P<n>.M<m>.T<t>` and are scoped to a project; they are allocated
//! sequentially under their parent scope and never renumbered.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Opaque Identifier Types
// ============================================================================

/// Declares a non-zero, store-allocated opaque identifier newtype.
macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// # Invariants
        /// - Always >= 1 (non-zero, 1-based, store-allocated).
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Creates a new identifier from a non-zero value.
            #[must_use]
            pub const fn new(id: NonZeroU64) -> Self {
                Self(id)
            }

            /// Creates an identifier from a raw value (returns `None` if zero).
            #[must_use]
            pub fn from_raw(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            /// Returns the raw identifier value (always >= 1).
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.get().fmt(f)
            }
        }
    };
}

opaque_id!(
    /// Project identifier, the root container scope.
    ProjectId
);
opaque_id!(
    /// Phase identifier scoped within a project.
    PhaseId
);
opaque_id!(
    /// Milestone identifier scoped within a phase.
    MilestoneId
);
opaque_id!(
    /// Task identifier, the unit of work.
    TaskId
);
opaque_id!(
    /// Lease identifier for time-bound task claims.
    LeaseId
);
opaque_id!(
    /// Reservation identifier for directed hard assignments.
    ReservationId
);
opaque_id!(
    /// Artifact identifier for submitted work products.
    ArtifactId
);
opaque_id!(
    /// Integration attempt identifier.
    AttemptId
);
opaque_id!(
    /// Gate rule identifier.
    GateRuleId
);
opaque_id!(
    /// Gate decision identifier.
    GateDecisionId
);
opaque_id!(
    /// Plan changeset identifier.
    ChangeSetId
);
opaque_id!(
    /// Execution snapshot identifier.
    SnapshotId
);
opaque_id!(
    /// API key identifier.
    ApiKeyId
);
opaque_id!(
    /// Changelog entry identifier.
    ChangelogEntryId
);

// ============================================================================
// SECTION: Agent Identifier
// ============================================================================

/// Agent identifier for autonomous workers and human actors.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates a new agent identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Lease Token
// ============================================================================

/// Opaque lease token handed to the claiming agent.
///
/// # Invariants
/// - Tokens are host-generated entropy; the kernel treats them as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Creates a new lease token from host-supplied entropy.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LeaseToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Monotonic Counters
// ============================================================================

/// Monotonic per-project plan version, starting at 1.
///
/// # Invariants
/// - Never decreases; bumped only by an applied changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanVersion(u64);

impl PlanVersion {
    /// The initial plan version assigned at project creation.
    pub const INITIAL: Self = Self(1);

    /// Creates a plan version from a raw value.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next plan version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for PlanVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic per-project event sequence, starting at 1.
///
/// # Invariants
/// - Assigned by the store inside the writing transaction; gap-free per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSeq(u64);

impl EventSeq {
    /// The cursor value preceding the first event.
    pub const ORIGIN: Self = Self(0);

    /// Creates an event sequence from a raw value.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next sequence value.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for EventSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic fencing counter associated with a task's lease history.
///
/// # Invariants
/// - Each new lease on a task carries a counter strictly greater than every
///   prior lease on the same task; writes carrying an older counter are
///   rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FencingToken(u64);

impl FencingToken {
    /// Creates a fencing token from a raw value.
    #[must_use]
    pub const fn new(counter: u64) -> Self {
        Self(counter)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the successor counter.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Short Identifiers
// ============================================================================

/// Errors produced when parsing a dotted short identifier.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShortIdError {
    /// The input does not match the dotted grammar.
    #[error("malformed short id: {0}")]
    Malformed(String),
    /// A component index was zero; indexes are 1-based.
    #[error("short id component must be >= 1: {0}")]
    ZeroComponent(String),
}

/// Dotted, human-readable short identifier scoped to a project.
///
/// # Invariants
/// - Components are 1-based and allocated sequentially under the parent scope.
/// - Once allocated, a short id is never renumbered on moves or deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortId {
    /// Phase short id: `P<n>`.
    Phase {
        /// 1-based phase index within the project.
        phase: u32,
    },
    /// Milestone short id: `P<n>.M<m>`.
    Milestone {
        /// 1-based phase index within the project.
        phase: u32,
        /// 1-based milestone index within the phase.
        milestone: u32,
    },
    /// Task short id: `P<n>.M<m>.T<t>`.
    Task {
        /// 1-based phase index within the project.
        phase: u32,
        /// 1-based milestone index within the phase.
        milestone: u32,
        /// 1-based task index within the milestone.
        task: u32,
    },
}

impl ShortId {
    /// Builds a phase short id.
    #[must_use]
    pub const fn phase(phase: u32) -> Self {
        Self::Phase {
            phase,
        }
    }

    /// Builds a milestone short id.
    #[must_use]
    pub const fn milestone(phase: u32, milestone: u32) -> Self {
        Self::Milestone {
            phase,
            milestone,
        }
    }

    /// Builds a task short id.
    #[must_use]
    pub const fn task(phase: u32, milestone: u32, task: u32) -> Self {
        Self::Task {
            phase,
            milestone,
            task,
        }
    }

    /// Returns true when this short id names a task.
    #[must_use]
    pub const fn is_task(self) -> bool {
        matches!(self, Self::Task { .. })
    }

    /// Parses a single 1-based component with the given prefix letter.
    fn parse_component(input: &str, prefix: char, original: &str) -> Result<u32, ShortIdError> {
        let digits = input
            .strip_prefix(prefix)
            .ok_or_else(|| ShortIdError::Malformed(original.to_string()))?;
        if digits.is_empty() || digits.chars().any(|ch| !ch.is_ascii_digit()) {
            return Err(ShortIdError::Malformed(original.to_string()));
        }
        let value: u32 =
            digits.parse().map_err(|_| ShortIdError::Malformed(original.to_string()))?;
        if value == 0 {
            return Err(ShortIdError::ZeroComponent(original.to_string()));
        }
        Ok(value)
    }
}

impl FromStr for ShortId {
    type Err = ShortIdError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = input.split('.').collect();
        match parts.as_slice() {
            [p] => Ok(Self::Phase {
                phase: Self::parse_component(p, 'P', input)?,
            }),
            [p, m] => Ok(Self::Milestone {
                phase: Self::parse_component(p, 'P', input)?,
                milestone: Self::parse_component(m, 'M', input)?,
            }),
            [p, m, t] => Ok(Self::Task {
                phase: Self::parse_component(p, 'P', input)?,
                milestone: Self::parse_component(m, 'M', input)?,
                task: Self::parse_component(t, 'T', input)?,
            }),
            _ => Err(ShortIdError::Malformed(input.to_string())),
        }
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase {
                phase,
            } => write!(f, "P{phase}"),
            Self::Milestone {
                phase,
                milestone,
            } => write!(f, "P{phase}.M{milestone}"),
            Self::Task {
                phase,
                milestone,
                task,
            } => write!(f, "P{phase}.M{milestone}.T{task}"),
        }
    }
}

impl Serialize for ShortId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ShortId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Task References
// ============================================================================

/// Resolved reference to a task, by opaque id or by project-scoped short id.
///
/// # Invariants
/// - A bare short id without a project scope must be unique across projects;
///   ambiguity is a first-class resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskRef {
    /// Reference by opaque task identifier.
    ById {
        /// Opaque task identifier.
        id: TaskId,
    },
    /// Reference by dotted short id, optionally scoped to a project.
    ByShortId {
        /// Project scope for the lookup, when known.
        project_id: Option<ProjectId>,
        /// Dotted task short id.
        short_id: ShortId,
    },
}

impl TaskRef {
    /// Builds a reference from an opaque identifier.
    #[must_use]
    pub const fn by_id(id: TaskId) -> Self {
        Self::ById {
            id,
        }
    }

    /// Builds a project-scoped short-id reference.
    #[must_use]
    pub const fn by_short_id(project_id: Option<ProjectId>, short_id: ShortId) -> Self {
        Self::ByShortId {
            project_id,
            short_id,
        }
    }

    /// Parses a wire reference: a decimal opaque id or a dotted short id.
    ///
    /// # Errors
    ///
    /// Returns [`ShortIdError`] when the input is neither a valid opaque id
    /// nor a task-shaped short id.
    pub fn parse(input: &str, project_id: Option<ProjectId>) -> Result<Self, ShortIdError> {
        let trimmed = input.trim();
        if trimmed.chars().all(|ch| ch.is_ascii_digit()) && !trimmed.is_empty() {
            let raw: u64 =
                trimmed.parse().map_err(|_| ShortIdError::Malformed(input.to_string()))?;
            return TaskId::from_raw(raw)
                .map(Self::by_id)
                .ok_or_else(|| ShortIdError::ZeroComponent(input.to_string()));
        }
        let short_id: ShortId = trimmed.parse()?;
        if !short_id.is_task() {
            return Err(ShortIdError::Malformed(input.to_string()));
        }
        Ok(Self::ByShortId {
            project_id,
            short_id,
        })
    }
}
