// crates/tascade-core/src/interfaces/mod.rs
// ============================================================================
// Module: Tascade Interfaces
// Description: Backend-agnostic transaction seam for kernel persistence.
// Purpose: Define the row-level contract every kernel operation runs against.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Every kernel operation receives an explicit transaction handle
//! implementing [`KernelTx`] and performs all of its reads and writes
//! through it. Implementations must provide serializable semantics for the
//! duration of one kernel operation: the durable store maps this onto a
//! single database transaction, the in-memory store onto an exclusive
//! borrow. There are no ambient sessions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ApiKey;
use crate::core::Artifact;
use crate::core::ArtifactId;
use crate::core::AttemptId;
use crate::core::ChangeSetId;
use crate::core::DependencyEdge;
use crate::core::EventRecord;
use crate::core::EventSeq;
use crate::core::GateCandidateLink;
use crate::core::GateDecision;
use crate::core::GateRule;
use crate::core::GateRuleId;
use crate::core::IntegrationAttempt;
use crate::core::Lease;
use crate::core::LeaseId;
use crate::core::LeaseToken;
use crate::core::Milestone;
use crate::core::MilestoneId;
use crate::core::NewEvent;
use crate::core::Phase;
use crate::core::PhaseId;
use crate::core::PlanChangeSet;
use crate::core::PlanVersionRecord;
use crate::core::Project;
use crate::core::ProjectId;
use crate::core::Reservation;
use crate::core::ReservationId;
use crate::core::ExecutionSnapshot;
use crate::core::Task;
use crate::core::TaskChangelogEntry;
use crate::core::TaskId;
use crate::core::Timestamp;
use crate::core::EntityKind;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Storage errors surfaced through the transaction seam.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Messages never embed raw credentials or work-spec payloads.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Store data is invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Store engine reported an error.
    #[error("store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Identifier Allocation
// ============================================================================

/// Identifier families allocated by the store.
///
/// # Invariants
/// - Allocation is monotonic per kind within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdKind {
    /// Project identifiers.
    Project,
    /// Phase identifiers.
    Phase,
    /// Milestone identifiers.
    Milestone,
    /// Task identifiers.
    Task,
    /// Lease identifiers.
    Lease,
    /// Reservation identifiers.
    Reservation,
    /// Artifact identifiers.
    Artifact,
    /// Integration attempt identifiers.
    Attempt,
    /// Gate rule identifiers.
    GateRule,
    /// Gate decision identifiers.
    GateDecision,
    /// Changeset identifiers.
    ChangeSet,
    /// Execution snapshot identifiers.
    Snapshot,
    /// API key identifiers.
    ApiKey,
    /// Changelog entry identifiers.
    ChangelogEntry,
}

// ============================================================================
// SECTION: Kernel Transaction
// ============================================================================

/// Row-level transaction handle passed into every kernel operation.
///
/// # Invariants
/// - All methods observe and mutate one consistent snapshot; the host
///   commits or rolls back the whole operation atomically.
/// - Short-id counter methods serialize against concurrent allocation under
///   the same parent.
#[allow(
    clippy::missing_errors_doc,
    reason = "Every method returns StoreError on storage failure; documented once here."
)]
pub trait KernelTx {
    // ------------------------------------------------------------------
    // Identifier allocation
    // ------------------------------------------------------------------

    /// Allocates the next opaque identifier of the given kind.
    fn allocate_id(&mut self, kind: IdKind) -> Result<u64, StoreError>;

    /// Allocates the next 1-based phase index within a project.
    fn next_phase_index(&mut self, project_id: ProjectId) -> Result<u32, StoreError>;

    /// Allocates the next 1-based milestone index within a phase.
    fn next_milestone_index(&mut self, phase_id: PhaseId) -> Result<u32, StoreError>;

    /// Allocates the next 1-based task index within a milestone.
    fn next_task_index(&mut self, milestone_id: MilestoneId) -> Result<u32, StoreError>;

    // ------------------------------------------------------------------
    // Projects, phases, milestones
    // ------------------------------------------------------------------

    /// Inserts a project row.
    fn insert_project(&mut self, project: &Project) -> Result<(), StoreError>;

    /// Loads a project by identifier.
    fn project(&mut self, project_id: ProjectId) -> Result<Option<Project>, StoreError>;

    /// Loads a project by unique name.
    fn project_by_name(&mut self, name: &str) -> Result<Option<Project>, StoreError>;

    /// Lists all projects ordered by identifier.
    fn list_projects(&mut self) -> Result<Vec<Project>, StoreError>;

    /// Updates a project row.
    fn update_project(&mut self, project: &Project) -> Result<(), StoreError>;

    /// Inserts a phase row.
    fn insert_phase(&mut self, phase: &Phase) -> Result<(), StoreError>;

    /// Loads a phase by identifier.
    fn phase(&mut self, phase_id: PhaseId) -> Result<Option<Phase>, StoreError>;

    /// Lists a project's phases ordered by sequence.
    fn list_phases(&mut self, project_id: ProjectId) -> Result<Vec<Phase>, StoreError>;

    /// Updates a phase row.
    fn update_phase(&mut self, phase: &Phase) -> Result<(), StoreError>;

    /// Inserts a milestone row.
    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError>;

    /// Loads a milestone by identifier.
    fn milestone(&mut self, milestone_id: MilestoneId) -> Result<Option<Milestone>, StoreError>;

    /// Lists a project's milestones ordered by phase then sequence.
    fn list_milestones(&mut self, project_id: ProjectId) -> Result<Vec<Milestone>, StoreError>;

    /// Updates a milestone row.
    fn update_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Inserts a task row.
    fn insert_task(&mut self, task: &Task) -> Result<(), StoreError>;

    /// Loads a task by identifier.
    fn task(&mut self, task_id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Loads a task by project-scoped short id.
    fn task_by_short_id(
        &mut self,
        project_id: ProjectId,
        short_id: &str,
    ) -> Result<Option<Task>, StoreError>;

    /// Loads every task carrying the given short id across projects.
    fn tasks_by_short_id(&mut self, short_id: &str) -> Result<Vec<Task>, StoreError>;

    /// Lists a project's tasks ordered by identifier.
    fn list_tasks(&mut self, project_id: ProjectId) -> Result<Vec<Task>, StoreError>;

    /// Updates a task row guarded by its optimistic version counter.
    /// Returns false when the expected version no longer matches.
    fn update_task(&mut self, task: &Task, expected_version: u64) -> Result<bool, StoreError>;

    // ------------------------------------------------------------------
    // Dependency edges
    // ------------------------------------------------------------------

    /// Inserts a dependency edge row.
    fn insert_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError>;

    /// Loads an edge by endpoint pair.
    fn edge(
        &mut self,
        from_task: TaskId,
        to_task: TaskId,
    ) -> Result<Option<DependencyEdge>, StoreError>;

    /// Lists every edge of a project, including retired ones.
    fn list_edges(&mut self, project_id: ProjectId) -> Result<Vec<DependencyEdge>, StoreError>;

    /// Updates an edge row keyed by its endpoint pair.
    fn update_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Leases
    // ------------------------------------------------------------------

    /// Inserts a lease row.
    fn insert_lease(&mut self, lease: &Lease) -> Result<(), StoreError>;

    /// Loads a lease by identifier.
    fn lease(&mut self, lease_id: LeaseId) -> Result<Option<Lease>, StoreError>;

    /// Loads the active lease of a task, when one exists.
    fn active_lease_for_task(&mut self, task_id: TaskId) -> Result<Option<Lease>, StoreError>;

    /// Loads a lease by its opaque token.
    fn lease_by_token(&mut self, token: &LeaseToken) -> Result<Option<Lease>, StoreError>;

    /// Updates a lease row.
    fn update_lease(&mut self, lease: &Lease) -> Result<(), StoreError>;

    /// Lists active leases whose expiry is at or before `now`.
    fn list_expired_active_leases(&mut self, now: Timestamp) -> Result<Vec<Lease>, StoreError>;

    /// Lists a project's active leases.
    fn active_leases(&mut self, project_id: ProjectId) -> Result<Vec<Lease>, StoreError>;

    /// Returns the highest fencing counter ever issued for a task (0 if none).
    fn max_fencing(&mut self, task_id: TaskId) -> Result<u64, StoreError>;

    // ------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------

    /// Inserts a reservation row.
    fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Loads a reservation by identifier.
    fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Loads the active reservation of a task, when one exists.
    fn active_reservation_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Updates a reservation row.
    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Lists active reservations whose expiry is at or before `now`.
    fn list_expired_active_reservations(
        &mut self,
        now: Timestamp,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Lists a project's active reservations.
    fn active_reservations(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Vec<Reservation>, StoreError>;

    // ------------------------------------------------------------------
    // Artifacts and integration attempts
    // ------------------------------------------------------------------

    /// Inserts an artifact row.
    fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), StoreError>;

    /// Loads an artifact by identifier.
    fn artifact(&mut self, artifact_id: ArtifactId) -> Result<Option<Artifact>, StoreError>;

    /// Lists a task's artifacts in creation order.
    fn list_artifacts(&mut self, task_id: TaskId) -> Result<Vec<Artifact>, StoreError>;

    /// Inserts an integration attempt row.
    fn insert_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError>;

    /// Loads an integration attempt by identifier.
    fn attempt(&mut self, attempt_id: AttemptId) -> Result<Option<IntegrationAttempt>, StoreError>;

    /// Updates an integration attempt row.
    fn update_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError>;

    /// Lists a task's integration attempts in creation order.
    fn list_attempts(&mut self, task_id: TaskId) -> Result<Vec<IntegrationAttempt>, StoreError>;

    // ------------------------------------------------------------------
    // Gates
    // ------------------------------------------------------------------

    /// Inserts a gate rule row.
    fn insert_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError>;

    /// Loads a gate rule by identifier.
    fn gate_rule(&mut self, rule_id: GateRuleId) -> Result<Option<GateRule>, StoreError>;

    /// Lists a project's gate rules ordered by identifier.
    fn list_gate_rules(&mut self, project_id: ProjectId) -> Result<Vec<GateRule>, StoreError>;

    /// Updates a gate rule row.
    fn update_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError>;

    /// Inserts a gate decision row.
    fn insert_gate_decision(&mut self, decision: &GateDecision) -> Result<(), StoreError>;

    /// Lists decisions recorded on a gate task in decision order.
    fn list_gate_decisions(
        &mut self,
        gate_task_id: TaskId,
    ) -> Result<Vec<GateDecision>, StoreError>;

    /// Inserts a gate candidate link row.
    fn insert_gate_link(&mut self, link: &GateCandidateLink) -> Result<(), StoreError>;

    /// Lists a gate task's candidate links in position order.
    fn links_for_gate(
        &mut self,
        gate_task_id: TaskId,
    ) -> Result<Vec<GateCandidateLink>, StoreError>;

    /// Lists the gate links governing a candidate task.
    fn links_for_candidate(
        &mut self,
        candidate_task_id: TaskId,
    ) -> Result<Vec<GateCandidateLink>, StoreError>;

    // ------------------------------------------------------------------
    // Execution snapshots
    // ------------------------------------------------------------------

    /// Inserts an execution snapshot row.
    fn insert_snapshot(&mut self, snapshot: &ExecutionSnapshot) -> Result<(), StoreError>;

    /// Loads the newest snapshot bound to a task, when one exists.
    fn latest_snapshot_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Option<ExecutionSnapshot>, StoreError>;

    /// Loads the snapshot captured under a lease, when one exists.
    fn snapshot_for_lease(
        &mut self,
        lease_id: LeaseId,
    ) -> Result<Option<ExecutionSnapshot>, StoreError>;

    // ------------------------------------------------------------------
    // Plan changesets
    // ------------------------------------------------------------------

    /// Inserts a changeset row.
    fn insert_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError>;

    /// Loads a changeset by identifier.
    fn changeset(&mut self, changeset_id: ChangeSetId)
    -> Result<Option<PlanChangeSet>, StoreError>;

    /// Updates a changeset row.
    fn update_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError>;

    /// Lists a project's changesets ordered by identifier.
    fn list_changesets(&mut self, project_id: ProjectId)
    -> Result<Vec<PlanChangeSet>, StoreError>;

    /// Inserts a plan version row.
    fn insert_plan_version(&mut self, record: &PlanVersionRecord) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Changelog
    // ------------------------------------------------------------------

    /// Inserts a changelog entry row.
    fn insert_changelog_entry(&mut self, entry: &TaskChangelogEntry) -> Result<(), StoreError>;

    /// Lists a task's changelog entries in creation order.
    fn list_changelog(&mut self, task_id: TaskId)
    -> Result<Vec<TaskChangelogEntry>, StoreError>;

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Appends an event, assigning the next per-project sequence.
    fn append_event(&mut self, event: &NewEvent) -> Result<EventSeq, StoreError>;

    /// Reads events after the cursor in sequence order, up to `limit`.
    fn events_after(
        &mut self,
        project_id: ProjectId,
        after: EventSeq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Reads the most recent events for one entity, oldest first.
    fn events_for_entity(
        &mut self,
        project_id: ProjectId,
        entity_kind: EntityKind,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError>;

    // ------------------------------------------------------------------
    // API keys
    // ------------------------------------------------------------------

    /// Inserts an API key row.
    fn insert_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError>;

    /// Loads an API key by fingerprint.
    fn api_key_by_fingerprint(
        &mut self,
        fingerprint: &str,
    ) -> Result<Option<ApiKey>, StoreError>;

    /// Updates an API key row.
    fn update_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError>;

    /// Lists a project's API keys ordered by identifier.
    fn list_api_keys(&mut self, project_id: ProjectId) -> Result<Vec<ApiKey>, StoreError>;
}
