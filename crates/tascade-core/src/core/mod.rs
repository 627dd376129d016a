// crates/tascade-core/src/core/mod.rs
// ============================================================================
// Module: Tascade Core Types
// Description: Domain entities, state machine, graph, and pure kernel logic.
// Purpose: Group the deterministic core the runtime and stores build on.
// Dependencies: serde, serde_json, sha2, thiserror
// ============================================================================

//! ## Overview
//! Core modules define the Tascade data model and the pure decision logic of
//! the kernel: transition validation, cycle detection, ready ranking,
//! changeset materiality, gate matching, and event replay. Nothing here
//! touches storage or the wall clock.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod apikey;
pub mod artifact;
pub mod capabilities;
pub mod context;
pub mod error;
pub mod event;
pub mod gate;
pub mod graph;
pub mod hashing;
pub mod identifiers;
pub mod lease;
pub mod paths;
pub mod plan;
pub mod ready;
pub mod snapshot;
pub mod task;
pub mod time;
pub mod transitions;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use apikey::ApiKey;
pub use apikey::ApiKeyStatus;
pub use apikey::RoleScopes;
pub use artifact::Artifact;
pub use artifact::CheckStatus;
pub use artifact::IntegrationAttempt;
pub use artifact::IntegrationResult;
pub use capabilities::CapabilityInput;
pub use context::TaskContext;
pub use error::DomainError;
pub use error::ErrorCode;
pub use event::EntityKind;
pub use event::EventKind;
pub use event::EventRecord;
pub use event::NewEvent;
pub use event::Projection;
pub use gate::GateCandidateLink;
pub use gate::GateDecision;
pub use gate::GateKind;
pub use gate::GateOutcome;
pub use gate::GateRule;
pub use gate::GateScope;
pub use graph::DependencyEdge;
pub use graph::Milestone;
pub use graph::Phase;
pub use graph::Project;
pub use graph::ProjectStatus;
pub use graph::ProjectView;
pub use graph::UnlockOn;
pub use identifiers::AgentId;
pub use identifiers::ApiKeyId;
pub use identifiers::ArtifactId;
pub use identifiers::AttemptId;
pub use identifiers::ChangeSetId;
pub use identifiers::ChangelogEntryId;
pub use identifiers::EventSeq;
pub use identifiers::FencingToken;
pub use identifiers::GateDecisionId;
pub use identifiers::GateRuleId;
pub use identifiers::LeaseId;
pub use identifiers::LeaseToken;
pub use identifiers::MilestoneId;
pub use identifiers::PhaseId;
pub use identifiers::PlanVersion;
pub use identifiers::ProjectId;
pub use identifiers::ReservationId;
pub use identifiers::ShortId;
pub use identifiers::SnapshotId;
pub use identifiers::TaskId;
pub use identifiers::TaskRef;
pub use lease::Lease;
pub use lease::LeaseStatus;
pub use lease::Reservation;
pub use lease::ReservationMode;
pub use lease::ReservationStatus;
pub use plan::ChangeOp;
pub use plan::ChangeSetStatus;
pub use plan::ImpactPreview;
pub use plan::Materiality;
pub use plan::PlanChangeSet;
pub use plan::PlanStaleAdvisory;
pub use plan::PlanVersionRecord;
pub use plan::TaskDraft;
pub use plan::TaskPatch;
pub use snapshot::ExecutionSnapshot;
pub use task::Task;
pub use task::TaskChangelogEntry;
pub use task::TaskClass;
pub use task::TaskState;
pub use task::WorkSpec;
pub use time::Timestamp;
pub use transitions::TransitionFacts;
pub use transitions::TransitionRequest;
