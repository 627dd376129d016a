// crates/tascade-core/src/runtime/coordinator.rs
// ============================================================================
// Module: Tascade Coordinator Engine
// Description: Transactional kernel operations over the graph, leases, and
//              reservations.
// Purpose: Execute every kernel operation as one atomic unit with events.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The coordinator is the single canonical execution path for Tascade. All
//! API surfaces call into these methods with an explicit [`KernelTx`]; each
//! public method is designed to run inside exactly one transaction, writing
//! its primary rows and its events together so a commit is all-or-nothing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::AgentId;
use crate::core::Artifact;
use crate::core::ArtifactId;
use crate::core::AttemptId;
use crate::core::CapabilityInput;
use crate::core::CheckStatus;
use crate::core::DependencyEdge;
use crate::core::DomainError;
use crate::core::EntityKind;
use crate::core::ErrorCode;
use crate::core::EventKind;
use crate::core::ExecutionSnapshot;
use crate::core::FencingToken;
use crate::core::IntegrationAttempt;
use crate::core::IntegrationResult;
use crate::core::Lease;
use crate::core::LeaseId;
use crate::core::LeaseStatus;
use crate::core::LeaseToken;
use crate::core::Milestone;
use crate::core::MilestoneId;
use crate::core::NewEvent;
use crate::core::Phase;
use crate::core::PhaseId;
use crate::core::PlanStaleAdvisory;
use crate::core::PlanVersion;
use crate::core::PlanVersionRecord;
use crate::core::Project;
use crate::core::ProjectId;
use crate::core::ProjectStatus;
use crate::core::ProjectView;
use crate::core::Reservation;
use crate::core::ReservationId;
use crate::core::ReservationMode;
use crate::core::ReservationStatus;
use crate::core::ShortId;
use crate::core::SnapshotId;
use crate::core::Task;
use crate::core::TaskDraft;
use crate::core::TaskId;
use crate::core::TaskRef;
use crate::core::TaskState;
use crate::core::Timestamp;
use crate::core::TransitionFacts;
use crate::core::TransitionRequest;
use crate::core::UnlockOn;
use crate::core::error::sub_codes;
use crate::core::hashing::HashError;
use crate::core::ready::ReadyEntry;
use crate::core::ready::list_ready;
use crate::core::task::ChangelogAuthor;
use crate::core::task::ChangelogKind;
use crate::core::task::TaskChangelogEntry;
use crate::core::transitions::validate_transition;
use crate::interfaces::IdKind;
use crate::interfaces::KernelTx;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Actor recorded for kernel-driven events (sweeps, unlocks).
pub const SYSTEM_ACTOR: &str = "system";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Coordinator tuning knobs supplied by the host.
///
/// # Invariants
/// - TTLs are non-zero seconds; validated by the configuration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Default lease TTL in seconds.
    pub default_lease_ttl_secs: u64,
    /// Default reservation TTL in seconds.
    pub default_reservation_ttl_secs: u64,
    /// Grace period accepted past lease expiry before the sweep commits.
    pub heartbeat_grace_secs: u64,
    /// Number of recent events included in context projections.
    pub context_event_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_lease_ttl_secs: 900,
            default_reservation_ttl_secs: crate::core::lease::DEFAULT_RESERVATION_TTL_SECS,
            heartbeat_grace_secs: 30,
            context_event_limit: 20,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Coordinator operation errors.
///
/// # Invariants
/// - Domain failures carry stable codes; storage failures are opaque faults.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Domain invariant or validation failure.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Storage fault.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Canonical hashing failure.
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl CoordinatorError {
    /// Returns the stable domain code, when the error is domain-shaped.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Domain(domain) => Some(domain.code),
            Self::Store(_) | Self::Hash(_) => None,
        }
    }
}

/// Shorthand result alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

// ============================================================================
// SECTION: Requests and Results
// ============================================================================

/// Claim request: an agent takes an eligible task under a fresh lease.
///
/// # Invariants
/// - `token` is host-generated entropy; the kernel stores it opaquely.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Task to claim.
    pub task: TaskRef,
    /// Claiming agent.
    pub agent_id: AgentId,
    /// Optional capability filter the claim is checked against.
    pub capabilities: Option<CapabilityInput>,
    /// Fresh opaque lease token.
    pub token: LeaseToken,
    /// Claim timestamp.
    pub now: Timestamp,
}

/// Claim result: the lease, the claimed task, and the captured snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResult {
    /// Claimed task after the state change.
    pub task: Task,
    /// Created lease with token and fencing counter.
    pub lease: Lease,
    /// Captured execution snapshot.
    pub snapshot: ExecutionSnapshot,
}

/// Heartbeat request extending an active lease.
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    /// Task under lease.
    pub task: TaskRef,
    /// Heartbeating agent.
    pub agent_id: AgentId,
    /// Lease token presented by the agent.
    pub token: LeaseToken,
    /// Plan version the agent last observed.
    pub seen_plan_version: Option<PlanVersion>,
    /// Heartbeat timestamp.
    pub now: Timestamp,
}

/// Heartbeat result with the monotone expiry and plan advisory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResult {
    /// Extended expiry deadline.
    pub expires_at: Timestamp,
    /// Current plan version of the project.
    pub plan_version: PlanVersion,
    /// Advisory when the agent's seen plan version is stale.
    pub advisory: Option<PlanStaleAdvisory>,
}

/// Artifact submission payload.
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    /// Task the artifact belongs to.
    pub task: TaskRef,
    /// Submitting agent.
    pub agent_id: AgentId,
    /// Branch identifier carrying the work.
    pub branch: String,
    /// Head commit identifier, when known.
    pub commit: Option<String>,
    /// External check reference, when known.
    pub check_ref: Option<String>,
    /// Check status at submission.
    pub check_status: CheckStatus,
    /// Paths the artifact touched (ordered).
    pub touched_paths: Vec<String>,
    /// Lease token; required while an active lease holds the task.
    pub lease_token: Option<LeaseToken>,
    /// Submission timestamp.
    pub now: Timestamp,
}

/// Sweep outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Leases moved to expired.
    pub leases_expired: u32,
    /// Reservations moved to expired.
    pub reservations_expired: u32,
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// The orchestration kernel: one public method per kernel operation.
///
/// # Invariants
/// - Every method runs against exactly one [`KernelTx`]; hosts commit or
///   roll back the whole operation.
/// - Every state change appends its events through the same transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coordinator {
    /// Tuning knobs.
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Creates a coordinator with the given configuration.
    #[must_use]
    pub const fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
        }
    }

    /// Returns the coordinator configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Graph store
    // ------------------------------------------------------------------

    /// Creates a project with plan version 1.
    ///
    /// # Errors
    ///
    /// Returns `CONFLICT` when the name is already taken.
    pub fn create_project(
        &self,
        tx: &mut dyn KernelTx,
        name: &str,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<Project> {
        if name.trim().is_empty() {
            return Err(DomainError::new(
                ErrorCode::InvariantViolation,
                "project name must be non-empty",
            )
            .into());
        }
        if tx.project_by_name(name)?.is_some() {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("project name already exists: {name}"),
            )
            .into());
        }
        let id = allocate(tx, IdKind::Project, ProjectId::from_raw)?;
        let project = Project {
            id,
            name: name.to_string(),
            status: ProjectStatus::Active,
            current_plan_version: PlanVersion::INITIAL,
            created_at: now,
        };
        tx.insert_project(&project)?;
        tx.insert_plan_version(&PlanVersionRecord {
            project_id: project.id,
            version: PlanVersion::INITIAL,
            changeset_id: None,
            created_at: now,
        })?;
        self.emit(
            tx,
            project.id,
            EntityKind::Project,
            project.id.to_string(),
            EventKind::ProjectCreated,
            json!({ "name": project.name }),
            actor.as_str(),
            now,
        )?;
        Ok(project)
    }

    /// Creates a phase under a project with the next `P<n>` short id.
    ///
    /// # Errors
    ///
    /// Returns `IDENTIFIER_PARENT_REQUIRED` when the project is missing.
    pub fn create_phase(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        name: &str,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<Phase> {
        let project = tx.project(project_id)?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::IdentifierParentRequired,
                format!("project not found: {project_id}"),
            )
        })?;
        let index = tx.next_phase_index(project.id)?;
        let id = allocate(tx, IdKind::Phase, PhaseId::from_raw)?;
        let phase = Phase {
            id,
            project_id: project.id,
            short_id: ShortId::phase(index),
            name: name.to_string(),
            sequence: index,
            created_at: now,
        };
        tx.insert_phase(&phase)?;
        self.emit(
            tx,
            project.id,
            EntityKind::Phase,
            phase.id.to_string(),
            EventKind::PhaseCreated,
            json!({ "short_id": phase.short_id.to_string(), "name": phase.name }),
            actor.as_str(),
            now,
        )?;
        Ok(phase)
    }

    /// Creates a milestone under a phase with the next `P<n>.M<m>` short id.
    ///
    /// # Errors
    ///
    /// Returns `IDENTIFIER_PARENT_REQUIRED` when the phase is missing.
    pub fn create_milestone(
        &self,
        tx: &mut dyn KernelTx,
        phase_id: PhaseId,
        name: &str,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<Milestone> {
        let phase = tx.phase(phase_id)?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::IdentifierParentRequired,
                format!("phase not found: {phase_id}"),
            )
        })?;
        let index = tx.next_milestone_index(phase.id)?;
        let ShortId::Phase {
            phase: phase_index,
        } = phase.short_id
        else {
            return Err(StoreError::Corrupt(format!(
                "phase {phase_id} carries a non-phase short id"
            ))
            .into());
        };
        let id = allocate(tx, IdKind::Milestone, MilestoneId::from_raw)?;
        let milestone = Milestone {
            id,
            project_id: phase.project_id,
            phase_id: phase.id,
            short_id: ShortId::milestone(phase_index, index),
            name: name.to_string(),
            sequence: index,
            created_at: now,
        };
        tx.insert_milestone(&milestone)?;
        self.emit(
            tx,
            phase.project_id,
            EntityKind::Milestone,
            milestone.id.to_string(),
            EventKind::MilestoneCreated,
            json!({ "short_id": milestone.short_id.to_string(), "name": milestone.name }),
            actor.as_str(),
            now,
        )?;
        Ok(milestone)
    }

    /// Creates a task under a milestone and promotes it when eligible.
    ///
    /// # Errors
    ///
    /// Returns `IDENTIFIER_PARENT_REQUIRED` when the milestone is missing and
    /// `INVALID_WORK_SPEC` when the work spec fails validation.
    pub fn create_task(
        &self,
        tx: &mut dyn KernelTx,
        draft: &TaskDraft,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<Task> {
        let milestone = tx.milestone(draft.milestone_id)?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::IdentifierParentRequired,
                format!("milestone not found: {}", draft.milestone_id),
            )
        })?;
        let project = require_project(tx, milestone.project_id)?;
        let task = self.insert_task_from_draft(
            tx,
            &milestone,
            draft,
            project.current_plan_version,
            actor,
            now,
        )?;
        self.refresh_readiness(tx, project.id, now)?;
        Ok(tx.task(task.id)?.unwrap_or(task))
    }

    /// Inserts a task row from a draft without refreshing readiness.
    pub(crate) fn insert_task_from_draft(
        &self,
        tx: &mut dyn KernelTx,
        milestone: &Milestone,
        draft: &TaskDraft,
        introduced_in: PlanVersion,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<Task> {
        draft.work_spec.validate()?;
        let ShortId::Milestone {
            phase: phase_index,
            milestone: milestone_index,
        } = milestone.short_id
        else {
            return Err(StoreError::Corrupt(format!(
                "milestone {} carries a non-milestone short id",
                milestone.id
            ))
            .into());
        };
        let index = tx.next_task_index(milestone.id)?;
        let id = allocate(tx, IdKind::Task, TaskId::from_raw)?;
        let task = Task {
            id,
            project_id: milestone.project_id,
            phase_id: milestone.phase_id,
            milestone_id: milestone.id,
            short_id: ShortId::task(phase_index, milestone_index, index),
            title: draft.title.clone(),
            description: draft.description.clone(),
            state: TaskState::Backlog,
            priority: draft.priority,
            task_class: draft.task_class,
            capability_tags: draft.capability_tags.iter().cloned().collect(),
            expected_touches: draft.expected_touches.clone(),
            exclusive_paths: draft.exclusive_paths.clone(),
            shared_paths: draft.shared_paths.clone(),
            work_spec: draft.work_spec.clone(),
            introduced_in_plan_version: introduced_in,
            deprecated_in_plan_version: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        tx.insert_task(&task)?;
        self.emit(
            tx,
            task.project_id,
            EntityKind::Task,
            task.id.to_string(),
            EventKind::TaskCreated,
            json!({
                "task_id": task.id.get(),
                "short_id": task.short_id.to_string(),
                "state": task.state.as_str(),
            }),
            actor.as_str(),
            now,
        )?;
        Ok(task)
    }

    /// Creates a dependency edge, idempotent by `(from, to, unlock_on)`.
    ///
    /// # Errors
    ///
    /// Returns `DEPENDENCY_CYCLE` when the edge would close a cycle and
    /// `CONFLICT` when the pair exists with a different criterion.
    pub fn create_dependency(
        &self,
        tx: &mut dyn KernelTx,
        from: &TaskRef,
        to: &TaskRef,
        unlock_on: UnlockOn,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<DependencyEdge> {
        let from_task = self.resolve_task(tx, from)?;
        let to_task = self.resolve_task(tx, to)?;
        if from_task.project_id != to_task.project_id {
            return Err(DomainError::new(
                ErrorCode::InvariantViolation,
                "dependency endpoints must share a project",
            )
            .into());
        }
        let project = require_project(tx, from_task.project_id)?;
        if let Some(existing) = tx.edge(from_task.id, to_task.id)? {
            if existing.is_active_at(project.current_plan_version) {
                if existing.unlock_on == unlock_on {
                    return Ok(existing);
                }
                return Err(DomainError::new(
                    ErrorCode::Conflict,
                    format!(
                        "dependency {} -> {} exists with unlock_on={}",
                        from_task.id, to_task.id, existing.unlock_on
                    ),
                )
                .into());
            }
        }
        let active_pairs: Vec<(TaskId, TaskId)> = tx
            .list_edges(project.id)?
            .iter()
            .filter(|edge| edge.is_active_at(project.current_plan_version))
            .map(|edge| (edge.from_task, edge.to_task))
            .collect();
        crate::core::graph::check_edge_acyclic(&active_pairs, from_task.id, to_task.id)?;
        let edge = DependencyEdge {
            project_id: project.id,
            from_task: from_task.id,
            to_task: to_task.id,
            unlock_on,
            introduced_in_plan_version: project.current_plan_version,
            removed_in_plan_version: None,
            created_at: now,
        };
        if tx.edge(from_task.id, to_task.id)?.is_some() {
            tx.update_edge(&edge)?;
        } else {
            tx.insert_edge(&edge)?;
        }
        self.emit(
            tx,
            project.id,
            EntityKind::Dependency,
            format!("{}->{}", from_task.id, to_task.id),
            EventKind::DependencyCreated,
            json!({
                "from_task": from_task.id.get(),
                "to_task": to_task.id.get(),
                "unlock_on": unlock_on.as_str(),
            }),
            actor.as_str(),
            now,
        )?;
        self.refresh_readiness(tx, project.id, now)?;
        Ok(edge)
    }

    /// Resolves a task reference to its row.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` for misses and `AMBIGUOUS_REFERENCE` when a bare
    /// short id matches tasks in multiple projects.
    pub fn resolve_task(
        &self,
        tx: &mut dyn KernelTx,
        reference: &TaskRef,
    ) -> CoordinatorResult<Task> {
        match reference {
            TaskRef::ById {
                id,
            } => Ok(tx.task(*id)?.ok_or_else(|| DomainError::not_found("task", id))?),
            TaskRef::ByShortId {
                project_id: Some(project_id),
                short_id,
            } => Ok(tx
                .task_by_short_id(*project_id, &short_id.to_string())?
                .ok_or_else(|| DomainError::not_found("task", short_id))?),
            TaskRef::ByShortId {
                project_id: None,
                short_id,
            } => {
                let matches = tx.tasks_by_short_id(&short_id.to_string())?;
                match matches.len() {
                    0 => Err(DomainError::not_found("task", short_id).into()),
                    1 => Ok(matches.into_iter().next().ok_or_else(|| {
                        StoreError::Corrupt("short id match vanished".to_string())
                    })?),
                    _ => Err(DomainError::new(
                        ErrorCode::AmbiguousReference,
                        format!("short id {short_id} resolves in multiple projects"),
                    )
                    .into()),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Scheduler / ready engine
    // ------------------------------------------------------------------

    /// Computes the ranked ready set for one agent.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_CAPABILITIES` when the capability input is malformed.
    pub fn list_ready_tasks(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        agent: &AgentId,
        capabilities: Option<&CapabilityInput>,
    ) -> CoordinatorResult<Vec<ReadyEntry>> {
        let _ = require_project(tx, project_id)?;
        let capabilities = capabilities.map(CapabilityInput::normalize).transpose()?;
        let view = self.load_view(tx, project_id)?;
        Ok(list_ready(&view, agent, capabilities.as_ref()))
    }

    // ------------------------------------------------------------------
    // Lease manager
    // ------------------------------------------------------------------

    /// Claims a task: verifies eligibility, consumes any reservation, creates
    /// the lease with the next fencing counter, captures the execution
    /// snapshot, and moves the task to claimed.
    ///
    /// # Errors
    ///
    /// Returns `RESERVATION_CONFLICT`, `INVARIANT_VIOLATION`, or
    /// `INVALID_CAPABILITIES` on the respective guard failures.
    pub fn claim_task(
        &self,
        tx: &mut dyn KernelTx,
        request: &ClaimRequest,
    ) -> CoordinatorResult<ClaimResult> {
        let task = self.resolve_task(tx, &request.task)?;
        let project = require_project(tx, task.project_id)?;
        if task.is_deprecated_at(project.current_plan_version) {
            return Err(DomainError::invariant(
                sub_codes::STATE_NOT_ELIGIBLE,
                format!("task {} is deprecated", task.id),
            )
            .into());
        }
        if !matches!(task.state, TaskState::Ready | TaskState::Reserved) {
            return Err(DomainError::invariant(
                sub_codes::STATE_NOT_ELIGIBLE,
                format!("task {} is {}, not claimable", task.id, task.state),
            )
            .into());
        }
        if let Some(reservation) = tx.active_reservation_for_task(task.id)? {
            if reservation.assignee != request.agent_id {
                return Err(DomainError::new(
                    ErrorCode::ReservationConflict,
                    format!("task {} is reserved for {}", task.id, reservation.assignee),
                )
                .into());
            }
            let mut consumed = reservation;
            consumed.status = ReservationStatus::Consumed;
            tx.update_reservation(&consumed)?;
            self.emit(
                tx,
                task.project_id,
                EntityKind::Reservation,
                consumed.id.to_string(),
                EventKind::ReservationConsumed,
                json!({ "reservation_id": consumed.id.get(), "task_id": task.id.get() }),
                request.agent_id.as_str(),
                request.now,
            )?;
        }
        if tx.active_lease_for_task(task.id)?.is_some() {
            return Err(DomainError::invariant(
                sub_codes::LEASE_ACTIVE,
                format!("task {} already carries an active lease", task.id),
            )
            .into());
        }
        let view = self.load_view(tx, task.project_id)?;
        if !view.dependencies_satisfied(task.id) {
            return Err(DomainError::invariant(
                sub_codes::DEPENDENCIES_UNSATISFIED,
                format!("task {} has unsatisfied dependencies", task.id),
            )
            .into());
        }
        if let Some(capabilities) = &request.capabilities {
            let held = capabilities.normalize()?;
            if !crate::core::capabilities::covers(&held, &task.capability_tags) {
                return Err(DomainError::invariant(
                    sub_codes::CAPABILITY_MISMATCH,
                    format!("capabilities do not cover task {}", task.id),
                )
                .into());
            }
        }

        let fencing = FencingToken::new(tx.max_fencing(task.id)?.saturating_add(1));
        let lease_id = allocate(tx, IdKind::Lease, LeaseId::from_raw)?;
        let lease = Lease {
            id: lease_id,
            task_id: task.id,
            agent_id: request.agent_id.clone(),
            token: request.token.clone(),
            fencing,
            status: LeaseStatus::Active,
            granted_at: request.now,
            expires_at: request.now.plus_secs(self.config.default_lease_ttl_secs),
            heartbeat_at: request.now,
        };
        tx.insert_lease(&lease)?;

        let snapshot_id = allocate(tx, IdKind::Snapshot, SnapshotId::from_raw)?;
        let snapshot = ExecutionSnapshot::capture(
            snapshot_id,
            task.id,
            lease.id,
            project.current_plan_version,
            task.work_spec.clone(),
            request.now,
        )?;
        tx.insert_snapshot(&snapshot)?;

        let mut claimed = task;
        let expected = claimed.version;
        claimed.state = TaskState::Claimed;
        claimed.version = claimed.version.saturating_add(1);
        claimed.updated_at = request.now;
        commit_task(tx, &claimed, expected)?;
        self.emit(
            tx,
            claimed.project_id,
            EntityKind::Task,
            claimed.id.to_string(),
            EventKind::TaskClaimed,
            json!({
                "task_id": claimed.id.get(),
                "lease_id": lease.id.get(),
                "agent_id": lease.agent_id.as_str(),
                "fencing": lease.fencing.get(),
            }),
            request.agent_id.as_str(),
            request.now,
        )?;
        Ok(ClaimResult {
            task: claimed,
            lease,
            snapshot,
        })
    }

    /// Extends an active lease. Idempotent: replays of a past heartbeat are
    /// monotone no-ops.
    ///
    /// # Errors
    ///
    /// Returns `LEASE_STALE` when the token does not identify the one active
    /// lease or the lease has lapsed past the grace window.
    pub fn heartbeat(
        &self,
        tx: &mut dyn KernelTx,
        request: &HeartbeatRequest,
    ) -> CoordinatorResult<HeartbeatResult> {
        let task = self.resolve_task(tx, &request.task)?;
        let project = require_project(tx, task.project_id)?;
        let lease = tx.active_lease_for_task(task.id)?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::LeaseStale,
                format!("task {} carries no active lease", task.id),
            )
        })?;
        if lease.token != request.token || lease.agent_id != request.agent_id {
            return Err(DomainError::new(
                ErrorCode::LeaseStale,
                "token does not identify the active lease",
            )
            .into());
        }
        let deadline = lease.expires_at.plus_secs(self.config.heartbeat_grace_secs);
        if request.now > deadline {
            return Err(DomainError::new(
                ErrorCode::LeaseStale,
                format!("lease {} lapsed at {}", lease.id, lease.expires_at),
            )
            .into());
        }
        let mut extended = lease;
        extended.expires_at = extended
            .expires_at
            .max(request.now.plus_secs(self.config.default_lease_ttl_secs));
        extended.heartbeat_at = extended.heartbeat_at.max(request.now);
        tx.update_lease(&extended)?;

        let advisory = match request.seen_plan_version {
            Some(seen) if seen < project.current_plan_version => {
                Some(self.stale_plan_advisory(tx, &task)?)
            }
            _ => None,
        };
        Ok(HeartbeatResult {
            expires_at: extended.expires_at,
            plan_version: project.current_plan_version,
            advisory,
        })
    }

    /// Classifies how a lagging agent should react to a newer plan.
    fn stale_plan_advisory(
        &self,
        tx: &mut dyn KernelTx,
        task: &Task,
    ) -> CoordinatorResult<PlanStaleAdvisory> {
        if task.deprecated_in_plan_version.is_some() {
            return Ok(PlanStaleAdvisory::HumanReview);
        }
        let snapshot = tx.latest_snapshot_for_task(task.id)?;
        let contract_changed = match snapshot {
            Some(snapshot) => {
                crate::core::hashing::hash_canonical_json(&task.work_spec)?
                    != snapshot.work_spec_hash
            }
            None => false,
        };
        if contract_changed {
            Ok(PlanStaleAdvisory::Refresh)
        } else {
            Ok(PlanStaleAdvisory::ContinueWithNotice)
        }
    }

    /// Releases a lease at the holder's request, parking the task in
    /// abandoned for later re-queue.
    ///
    /// # Errors
    ///
    /// Returns `LEASE_STALE` when the token does not identify the one active
    /// lease.
    pub fn release_lease(
        &self,
        tx: &mut dyn KernelTx,
        task_ref: &TaskRef,
        agent_id: &AgentId,
        token: &LeaseToken,
        now: Timestamp,
    ) -> CoordinatorResult<Task> {
        let task = self.resolve_task(tx, task_ref)?;
        let lease = tx.active_lease_for_task(task.id)?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::LeaseStale,
                format!("task {} carries no active lease", task.id),
            )
        })?;
        if lease.token != *token || lease.agent_id != *agent_id {
            return Err(DomainError::new(
                ErrorCode::LeaseStale,
                "token does not identify the active lease",
            )
            .into());
        }
        let mut released = lease;
        released.status = LeaseStatus::Released;
        tx.update_lease(&released)?;
        self.emit(
            tx,
            task.project_id,
            EntityKind::Lease,
            released.id.to_string(),
            EventKind::LeaseReleased,
            json!({ "lease_id": released.id.get(), "task_id": task.id.get() }),
            agent_id.as_str(),
            now,
        )?;
        let from = task.state;
        let mut abandoned = task;
        let expected = abandoned.version;
        abandoned.state = TaskState::Abandoned;
        abandoned.version = abandoned.version.saturating_add(1);
        abandoned.updated_at = now;
        commit_task(tx, &abandoned, expected)?;
        self.emit(
            tx,
            abandoned.project_id,
            EntityKind::Task,
            abandoned.id.to_string(),
            EventKind::TaskTransitioned,
            json!({
                "task_id": abandoned.id.get(),
                "from": from.as_str(),
                "to": abandoned.state.as_str(),
            }),
            agent_id.as_str(),
            now,
        )?;
        Ok(abandoned)
    }

    // ------------------------------------------------------------------
    // Reservation manager
    // ------------------------------------------------------------------

    /// Reserves a task for a designated assignee.
    ///
    /// # Errors
    ///
    /// Returns `RESERVATION_CONFLICT` when an active reservation or lease
    /// already holds the task, and `INVARIANT_VIOLATION` when the task state
    /// admits no reservation.
    pub fn assign_task(
        &self,
        tx: &mut dyn KernelTx,
        task_ref: &TaskRef,
        assignee: &AgentId,
        ttl_secs: Option<u64>,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<Reservation> {
        let task = self.resolve_task(tx, task_ref)?;
        if !matches!(task.state, TaskState::Backlog | TaskState::Ready) {
            return Err(DomainError::invariant(
                sub_codes::STATE_NOT_ELIGIBLE,
                format!("task {} is {}, not reservable", task.id, task.state),
            )
            .into());
        }
        if tx.active_reservation_for_task(task.id)?.is_some() {
            return Err(DomainError::new(
                ErrorCode::ReservationConflict,
                format!("task {} is already reserved", task.id),
            )
            .into());
        }
        if tx.active_lease_for_task(task.id)?.is_some() {
            return Err(DomainError::new(
                ErrorCode::ReservationConflict,
                format!("task {} is already leased", task.id),
            )
            .into());
        }
        let ttl = ttl_secs.unwrap_or(self.config.default_reservation_ttl_secs);
        let id = allocate(tx, IdKind::Reservation, ReservationId::from_raw)?;
        let reservation = Reservation {
            id,
            task_id: task.id,
            assignee: assignee.clone(),
            mode: ReservationMode::Hard,
            status: ReservationStatus::Active,
            ttl_secs: ttl,
            created_at: now,
            expires_at: now.plus_secs(ttl),
        };
        tx.insert_reservation(&reservation)?;
        self.emit(
            tx,
            task.project_id,
            EntityKind::Reservation,
            reservation.id.to_string(),
            EventKind::ReservationCreated,
            json!({
                "reservation_id": reservation.id.get(),
                "task_id": task.id.get(),
                "assignee": assignee.as_str(),
            }),
            actor.as_str(),
            now,
        )?;
        if task.state == TaskState::Ready {
            let mut reserved = task;
            let expected = reserved.version;
            reserved.state = TaskState::Reserved;
            reserved.version = reserved.version.saturating_add(1);
            reserved.updated_at = now;
            commit_task(tx, &reserved, expected)?;
            self.emit(
                tx,
                reserved.project_id,
                EntityKind::Task,
                reserved.id.to_string(),
                EventKind::TaskReserved,
                json!({ "task_id": reserved.id.get(), "assignee": assignee.as_str() }),
                actor.as_str(),
                now,
            )?;
        }
        Ok(reservation)
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Applies one validated state transition with all commit-time
    /// invariants, bumping the task version and appending events atomically.
    ///
    /// # Errors
    ///
    /// Returns `INVARIANT_VIOLATION` with a stable sub-code when a
    /// requirement fails, and `LEASE_FENCED` when an in-flight task is
    /// written without the active lease's token.
    pub fn transition_task(
        &self,
        tx: &mut dyn KernelTx,
        task_ref: &TaskRef,
        request: &TransitionRequest,
        lease_token: Option<&LeaseToken>,
        now: Timestamp,
    ) -> CoordinatorResult<Task> {
        let task = self.resolve_task(tx, task_ref)?;
        let active_lease = tx.active_lease_for_task(task.id)?;
        if let Some(lease) = &active_lease
            && !request.force
            && task.state.is_in_flight()
        {
            match lease_token {
                Some(token) if *token == lease.token => {}
                _ => {
                    return Err(DomainError::new(
                        ErrorCode::LeaseFenced,
                        format!("write to task {} requires the active lease token", task.id),
                    )
                    .into());
                }
            }
        }

        let facts = self.gather_facts(tx, &task)?;
        validate_transition(task.state, task.task_class, request, &facts)?;

        // Lease lifecycle effects tied to the transition target.
        if let Some(lease) = active_lease {
            let (status, kind) = match request.target {
                TaskState::Implemented => (LeaseStatus::Consumed, EventKind::LeaseConsumed),
                TaskState::Abandoned
                | TaskState::Ready
                | TaskState::Blocked
                | TaskState::Conflict
                | TaskState::Cancelled => (LeaseStatus::Released, EventKind::LeaseReleased),
                _ => (LeaseStatus::Active, EventKind::LeaseReleased),
            };
            if status != LeaseStatus::Active {
                let mut ended = lease;
                ended.status = status;
                tx.update_lease(&ended)?;
                self.emit(
                    tx,
                    task.project_id,
                    EntityKind::Lease,
                    ended.id.to_string(),
                    kind,
                    json!({ "lease_id": ended.id.get(), "task_id": task.id.get() }),
                    request.actor.as_str(),
                    now,
                )?;
            }
        }
        if request.target == TaskState::Cancelled {
            let reservation = tx.active_reservation_for_task(task.id)?;
            if let Some(reservation) = reservation {
                let mut released = reservation;
                released.status = ReservationStatus::Released;
                tx.update_reservation(&released)?;
                self.emit(
                    tx,
                    task.project_id,
                    EntityKind::Reservation,
                    released.id.to_string(),
                    EventKind::ReservationReleased,
                    json!({ "reservation_id": released.id.get(), "task_id": task.id.get() }),
                    request.actor.as_str(),
                    now,
                )?;
            }
        }

        let from = task.state;
        let mut updated = task;
        let expected = updated.version;
        updated.state = request.target;
        updated.version = updated.version.saturating_add(1);
        updated.updated_at = now;
        commit_task(tx, &updated, expected)?;

        let mut payload = json!({
            "task_id": updated.id.get(),
            "from": from.as_str(),
            "to": updated.state.as_str(),
        });
        if let Some(reviewer) = &request.reviewed_by {
            payload["reviewed_by"] = Value::String(reviewer.as_str().to_string());
        }
        if !request.evidence_refs.is_empty() {
            payload["evidence_refs"] = json!(request.evidence_refs);
        }
        if request.force {
            payload["forced"] = Value::Bool(true);
            payload["rationale"] =
                Value::String(request.rationale.clone().unwrap_or_default());
        }
        self.emit(
            tx,
            updated.project_id,
            EntityKind::Task,
            updated.id.to_string(),
            EventKind::TaskTransitioned,
            payload,
            request.actor.as_str(),
            now,
        )?;
        let changelog_id =
            allocate(tx, IdKind::ChangelogEntry, crate::core::ChangelogEntryId::from_raw)?;
        tx.insert_changelog_entry(&TaskChangelogEntry {
            id: changelog_id,
            task_id: updated.id,
            author: request.actor.clone(),
            author_kind: ChangelogAuthor::Agent,
            entry_kind: ChangelogKind::StateChange,
            body: format!("{from} -> {}", updated.state),
            artifact_refs: Vec::new(),
            created_at: now,
        })?;

        // Progress may unlock downstream edges.
        if updated.state.is_at_least_implemented() {
            self.refresh_readiness(tx, updated.project_id, now)?;
        }
        Ok(updated)
    }

    /// Gathers the commit-time facts the state machine validates against.
    fn gather_facts(
        &self,
        tx: &mut dyn KernelTx,
        task: &Task,
    ) -> CoordinatorResult<TransitionFacts> {
        let has_passed_artifact = tx
            .list_artifacts(task.id)?
            .iter()
            .any(|artifact| artifact.check_status == CheckStatus::Passed);
        let has_successful_integration = tx
            .list_attempts(task.id)?
            .iter()
            .any(|attempt| attempt.result == IntegrationResult::Success);
        let gate_approved = if task.task_class.is_gate() {
            Some(
                tx.list_gate_decisions(task.id)?
                    .iter()
                    .any(|decision| decision.outcome.is_approving()),
            )
        } else {
            self.candidate_gate_status(tx, task)?
        };
        Ok(TransitionFacts {
            has_passed_artifact,
            gate_approved,
            has_successful_integration,
        })
    }

    /// Computes the gate requirement for a candidate task: `None` when no
    /// rule applies, otherwise whether an approving decision governs it.
    fn candidate_gate_status(
        &self,
        tx: &mut dyn KernelTx,
        task: &Task,
    ) -> CoordinatorResult<Option<bool>> {
        let links = tx.links_for_candidate(task.id)?;
        if !links.is_empty() {
            for link in &links {
                let decisions = tx.list_gate_decisions(link.gate_task_id)?;
                if decisions.iter().any(|decision| decision.outcome.is_approving()) {
                    return Ok(Some(true));
                }
            }
            return Ok(Some(false));
        }
        let applicable = tx
            .list_gate_rules(task.project_id)?
            .iter()
            .any(|rule| rule.is_active && rule.scope.matches(task));
        if applicable { Ok(Some(false)) } else { Ok(None) }
    }

    // ------------------------------------------------------------------
    // Artifacts and integration queue
    // ------------------------------------------------------------------

    /// Records an artifact, append-only and never deduplicated.
    ///
    /// # Errors
    ///
    /// Returns `LEASE_FENCED` when an active lease holds the task and the
    /// submission does not carry its token.
    pub fn record_artifact(
        &self,
        tx: &mut dyn KernelTx,
        draft: &ArtifactDraft,
    ) -> CoordinatorResult<Artifact> {
        let task = self.resolve_task(tx, &draft.task)?;
        if task.state.is_terminal() {
            return Err(DomainError::invariant(
                sub_codes::STATE_NOT_ELIGIBLE,
                format!("task {} is terminal", task.id),
            )
            .into());
        }
        if draft.branch.trim().is_empty() {
            return Err(DomainError::new(
                ErrorCode::InvariantViolation,
                "artifact branch must be non-empty",
            )
            .into());
        }
        if let Some(lease) = tx.active_lease_for_task(task.id)? {
            match &draft.lease_token {
                Some(token) if *token == lease.token => {}
                _ => {
                    return Err(DomainError::new(
                        ErrorCode::LeaseFenced,
                        format!("artifact for task {} requires the active lease token", task.id),
                    )
                    .into());
                }
            }
        }
        let id = allocate(tx, IdKind::Artifact, ArtifactId::from_raw)?;
        let artifact = Artifact {
            id,
            task_id: task.id,
            agent_id: draft.agent_id.clone(),
            branch: draft.branch.clone(),
            commit: draft.commit.clone(),
            check_ref: draft.check_ref.clone(),
            check_status: draft.check_status,
            touched_paths: draft.touched_paths.clone(),
            created_at: draft.now,
        };
        tx.insert_artifact(&artifact)?;
        self.emit(
            tx,
            task.project_id,
            EntityKind::Artifact,
            artifact.id.to_string(),
            EventKind::ArtifactCreated,
            json!({
                "artifact_id": artifact.id.get(),
                "task_id": task.id.get(),
                "check_status": artifact.check_status.as_str(),
            }),
            draft.agent_id.as_str(),
            draft.now,
        )?;
        Ok(artifact)
    }

    /// Enqueues an integration attempt for an implemented task.
    ///
    /// # Errors
    ///
    /// Returns `INVARIANT_VIOLATION` when the task is not implemented.
    pub fn enqueue_integration(
        &self,
        tx: &mut dyn KernelTx,
        task_ref: &TaskRef,
        base_ref: &str,
        head_ref: &str,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<IntegrationAttempt> {
        let task = self.resolve_task(tx, task_ref)?;
        if task.state != TaskState::Implemented {
            return Err(DomainError::invariant(
                sub_codes::STATE_NOT_ELIGIBLE,
                format!("task {} is {}, not implemented", task.id, task.state),
            )
            .into());
        }
        let id = allocate(tx, IdKind::Attempt, AttemptId::from_raw)?;
        let attempt = IntegrationAttempt {
            id,
            task_id: task.id,
            base_ref: base_ref.to_string(),
            head_ref: head_ref.to_string(),
            result: IntegrationResult::Queued,
            diagnostics: None,
            started_at: now,
            ended_at: None,
        };
        tx.insert_attempt(&attempt)?;
        self.emit(
            tx,
            task.project_id,
            EntityKind::IntegrationAttempt,
            attempt.id.to_string(),
            EventKind::IntegrationEnqueued,
            json!({ "attempt_id": attempt.id.get(), "task_id": task.id.get() }),
            actor.as_str(),
            now,
        )?;
        Ok(attempt)
    }

    /// Completes a queued integration attempt with a terminal result and
    /// applies the task-side effect (`conflict` or `blocked`).
    ///
    /// # Errors
    ///
    /// Returns `INVARIANT_VIOLATION` when the attempt is terminal or out of
    /// per-task creation order.
    pub fn complete_integration(
        &self,
        tx: &mut dyn KernelTx,
        attempt_id: AttemptId,
        result: IntegrationResult,
        diagnostics: Option<Value>,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<IntegrationAttempt> {
        if !result.is_terminal() {
            return Err(DomainError::new(
                ErrorCode::InvariantViolation,
                "completion requires a terminal result",
            )
            .into());
        }
        let attempt = tx
            .attempt(attempt_id)?
            .ok_or_else(|| DomainError::not_found("integration attempt", attempt_id))?;
        if attempt.result.is_terminal() {
            return Err(DomainError::invariant(
                sub_codes::ATTEMPT_TERMINAL,
                format!("attempt {} is already terminal", attempt.id),
            )
            .into());
        }
        let oldest_queued = tx
            .list_attempts(attempt.task_id)?
            .into_iter()
            .find(|candidate| candidate.result == IntegrationResult::Queued);
        if oldest_queued.as_ref().is_none_or(|oldest| oldest.id != attempt.id) {
            return Err(DomainError::invariant(
                sub_codes::ATTEMPT_ORDER,
                "attempts complete in per-task creation order",
            )
            .into());
        }
        let task = tx
            .task(attempt.task_id)?
            .ok_or_else(|| DomainError::not_found("task", attempt.task_id))?;
        let mut completed = attempt;
        completed.result = result;
        completed.diagnostics = diagnostics;
        completed.ended_at = Some(now);
        tx.update_attempt(&completed)?;
        self.emit(
            tx,
            task.project_id,
            EntityKind::IntegrationAttempt,
            completed.id.to_string(),
            EventKind::IntegrationCompleted,
            json!({
                "attempt_id": completed.id.get(),
                "task_id": task.id.get(),
                "result": completed.result.as_str(),
            }),
            actor.as_str(),
            now,
        )?;

        let target = match result {
            IntegrationResult::Conflict => Some(TaskState::Conflict),
            IntegrationResult::FailedChecks => Some(TaskState::Blocked),
            IntegrationResult::Success | IntegrationResult::Queued => None,
        };
        if let Some(target) = target
            && !task.state.is_terminal()
            && task.state != target
        {
            let from = task.state;
            let mut failed = task;
            let expected = failed.version;
            failed.state = target;
            failed.version = failed.version.saturating_add(1);
            failed.updated_at = now;
            commit_task(tx, &failed, expected)?;
            self.emit(
                tx,
                failed.project_id,
                EntityKind::Task,
                failed.id.to_string(),
                EventKind::TaskTransitioned,
                json!({
                    "task_id": failed.id.get(),
                    "from": from.as_str(),
                    "to": failed.state.as_str(),
                }),
                actor.as_str(),
                now,
            )?;
        }
        Ok(completed)
    }

    // ------------------------------------------------------------------
    // Changelog
    // ------------------------------------------------------------------

    /// Appends a free-form changelog note to a task.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when the task reference does not resolve.
    pub fn add_changelog_note(
        &self,
        tx: &mut dyn KernelTx,
        task_ref: &TaskRef,
        author: &AgentId,
        body: &str,
        artifact_refs: Vec<ArtifactId>,
        now: Timestamp,
    ) -> CoordinatorResult<TaskChangelogEntry> {
        let task = self.resolve_task(tx, task_ref)?;
        let id = allocate(tx, IdKind::ChangelogEntry, crate::core::ChangelogEntryId::from_raw)?;
        let entry = TaskChangelogEntry {
            id,
            task_id: task.id,
            author: author.clone(),
            author_kind: ChangelogAuthor::Agent,
            entry_kind: ChangelogKind::Note,
            body: body.to_string(),
            artifact_refs,
            created_at: now,
        };
        tx.insert_changelog_entry(&entry)?;
        Ok(entry)
    }

    /// Lists a task's changelog in creation order.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when the task reference does not resolve.
    pub fn list_changelog(
        &self,
        tx: &mut dyn KernelTx,
        task_ref: &TaskRef,
    ) -> CoordinatorResult<Vec<TaskChangelogEntry>> {
        let task = self.resolve_task(tx, task_ref)?;
        Ok(tx.list_changelog(task.id)?)
    }

    // ------------------------------------------------------------------
    // Expiry sweep
    // ------------------------------------------------------------------

    /// Sweeps expired leases and reservations, returning held tasks to the
    /// ready set. Must run at least once per TTL interval; restarts catch up
    /// on their first tick.
    ///
    /// # Errors
    ///
    /// Returns storage faults only; domain guards cannot fail the sweep.
    pub fn sweep_expired(
        &self,
        tx: &mut dyn KernelTx,
        now: Timestamp,
    ) -> CoordinatorResult<SweepReport> {
        let mut report = SweepReport::default();
        for lease in tx.list_expired_active_leases(now)? {
            let mut expired = lease;
            expired.status = LeaseStatus::Expired;
            tx.update_lease(&expired)?;
            report.leases_expired = report.leases_expired.saturating_add(1);
            let Some(task) = tx.task(expired.task_id)? else {
                continue;
            };
            self.emit(
                tx,
                task.project_id,
                EntityKind::Lease,
                expired.id.to_string(),
                EventKind::LeaseExpired,
                json!({ "lease_id": expired.id.get(), "task_id": task.id.get() }),
                SYSTEM_ACTOR,
                now,
            )?;
            if task.state.is_in_flight() {
                let mut requeued = task;
                let expected = requeued.version;
                requeued.state = TaskState::Ready;
                requeued.version = requeued.version.saturating_add(1);
                requeued.updated_at = now;
                commit_task(tx, &requeued, expected)?;
            }
        }
        for reservation in tx.list_expired_active_reservations(now)? {
            let mut expired = reservation;
            expired.status = ReservationStatus::Expired;
            tx.update_reservation(&expired)?;
            report.reservations_expired = report.reservations_expired.saturating_add(1);
            let Some(task) = tx.task(expired.task_id)? else {
                continue;
            };
            self.emit(
                tx,
                task.project_id,
                EntityKind::Reservation,
                expired.id.to_string(),
                EventKind::ReservationExpired,
                json!({ "reservation_id": expired.id.get(), "task_id": task.id.get() }),
                SYSTEM_ACTOR,
                now,
            )?;
            if task.state == TaskState::Reserved {
                let mut requeued = task;
                let expected = requeued.version;
                requeued.state = TaskState::Ready;
                requeued.version = requeued.version.saturating_add(1);
                requeued.updated_at = now;
                commit_task(tx, &requeued, expected)?;
                self.emit(
                    tx,
                    requeued.project_id,
                    EntityKind::Task,
                    requeued.id.to_string(),
                    EventKind::TaskReady,
                    json!({ "task_id": requeued.id.get() }),
                    SYSTEM_ACTOR,
                    now,
                )?;
            }
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Shared internals
    // ------------------------------------------------------------------

    /// Assembles a consistent project view inside the current transaction.
    pub(crate) fn load_view(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
    ) -> CoordinatorResult<ProjectView> {
        let project = require_project(tx, project_id)?;
        let tasks = tx
            .list_tasks(project_id)?
            .into_iter()
            .map(|task| (task.id, task))
            .collect();
        let edges = tx
            .list_edges(project_id)?
            .into_iter()
            .filter(|edge| edge.is_active_at(project.current_plan_version))
            .collect();
        let active_leases = tx
            .active_leases(project_id)?
            .into_iter()
            .map(|lease| (lease.task_id, lease))
            .collect();
        let active_reservations = tx
            .active_reservations(project_id)?
            .into_iter()
            .map(|reservation| (reservation.task_id, reservation))
            .collect();
        Ok(ProjectView {
            plan_version: project.current_plan_version,
            tasks,
            edges,
            active_leases,
            active_reservations,
        })
    }

    /// Promotes eligible backlog tasks and demotes ready tasks whose edges
    /// are no longer satisfied, emitting readiness events.
    pub(crate) fn refresh_readiness(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        now: Timestamp,
    ) -> CoordinatorResult<()> {
        let view = self.load_view(tx, project_id)?;
        let mut promote: Vec<(TaskId, TaskState)> = Vec::new();
        let mut demote: Vec<TaskId> = Vec::new();
        for task in view.tasks.values() {
            if task.is_deprecated_at(view.plan_version) {
                continue;
            }
            let satisfied = view.dependencies_satisfied(task.id);
            match task.state {
                TaskState::Backlog if satisfied => {
                    let target = if view.active_reservations.contains_key(&task.id) {
                        TaskState::Reserved
                    } else {
                        TaskState::Ready
                    };
                    promote.push((task.id, target));
                }
                TaskState::Ready if !satisfied => demote.push(task.id),
                _ => {}
            }
        }
        for (task_id, target) in promote {
            let Some(task) = tx.task(task_id)? else {
                continue;
            };
            let mut promoted = task;
            let expected = promoted.version;
            promoted.state = target;
            promoted.version = promoted.version.saturating_add(1);
            promoted.updated_at = now;
            commit_task(tx, &promoted, expected)?;
            let kind = if target == TaskState::Reserved {
                EventKind::TaskReserved
            } else {
                EventKind::TaskReady
            };
            self.emit(
                tx,
                promoted.project_id,
                EntityKind::Task,
                promoted.id.to_string(),
                kind,
                json!({ "task_id": promoted.id.get() }),
                SYSTEM_ACTOR,
                now,
            )?;
        }
        for task_id in demote {
            let Some(task) = tx.task(task_id)? else {
                continue;
            };
            let mut demoted = task;
            let expected = demoted.version;
            demoted.state = TaskState::Backlog;
            demoted.version = demoted.version.saturating_add(1);
            demoted.updated_at = now;
            commit_task(tx, &demoted, expected)?;
            self.emit(
                tx,
                demoted.project_id,
                EntityKind::Task,
                demoted.id.to_string(),
                EventKind::TaskBacklogged,
                json!({ "task_id": demoted.id.get() }),
                SYSTEM_ACTOR,
                now,
            )?;
        }
        Ok(())
    }

    /// Appends one event through the transaction.
    #[allow(
        clippy::too_many_arguments,
        reason = "Event emission names every field explicitly at each call site."
    )]
    pub(crate) fn emit(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        entity_kind: EntityKind,
        entity_id: String,
        kind: EventKind,
        payload: Value,
        actor: &str,
        now: Timestamp,
    ) -> CoordinatorResult<()> {
        tx.append_event(&NewEvent {
            project_id,
            entity_kind,
            entity_id,
            kind,
            payload,
            actor: actor.to_string(),
            recorded_at: now,
        })?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Free Helpers
// ============================================================================

/// Allocates an opaque identifier of the given kind.
pub(crate) fn allocate<T>(
    tx: &mut dyn KernelTx,
    kind: IdKind,
    wrap: impl Fn(u64) -> Option<T>,
) -> CoordinatorResult<T> {
    let raw = tx.allocate_id(kind)?;
    wrap(raw).ok_or_else(|| {
        CoordinatorError::Store(StoreError::Corrupt("allocator returned zero".to_string()))
    })
}

/// Loads a project or fails `NOT_FOUND`.
pub(crate) fn require_project(
    tx: &mut dyn KernelTx,
    project_id: ProjectId,
) -> CoordinatorResult<Project> {
    Ok(tx
        .project(project_id)?
        .ok_or_else(|| DomainError::not_found("project", project_id))?)
}

/// Writes a task row under optimistic concurrency, mapping a lost race to
/// the stable `CONFLICT` code.
pub(crate) fn commit_task(
    tx: &mut dyn KernelTx,
    task: &Task,
    expected_version: u64,
) -> CoordinatorResult<()> {
    if tx.update_task(task, expected_version)? {
        Ok(())
    } else {
        Err(DomainError::new(
            ErrorCode::Conflict,
            format!("task {} version conflict", task.id),
        )
        .into())
    }
}

/// Returns the deterministic set of task ids governed by undecided gates.
pub(crate) fn governed_candidates(
    tx: &mut dyn KernelTx,
    view: &ProjectView,
) -> CoordinatorResult<BTreeSet<TaskId>> {
    let mut governed = BTreeSet::new();
    for task in view.tasks.values() {
        if !task.task_class.is_gate() || task.state.is_terminal() {
            continue;
        }
        for link in tx.links_for_gate(task.id)? {
            governed.insert(link.candidate_task_id);
        }
    }
    Ok(governed)
}
