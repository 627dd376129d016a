// crates/tascade-core/src/runtime/store.rs
// ============================================================================
// Module: Tascade In-Memory Store
// Description: Deterministic in-memory KernelTx for tests and demos.
// Purpose: Provide a transaction seam implementation without external deps.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The memory store implements [`KernelTx`] over plain maps guarded by a
//! mutex. `with_tx` snapshots the state before the closure runs and restores
//! it on error, giving the same all-or-nothing semantics the durable store
//! gets from database transactions. Not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::ApiKey;
use crate::core::ApiKeyId;
use crate::core::Artifact;
use crate::core::ArtifactId;
use crate::core::AttemptId;
use crate::core::ChangeSetId;
use crate::core::DependencyEdge;
use crate::core::EntityKind;
use crate::core::EventRecord;
use crate::core::EventSeq;
use crate::core::ExecutionSnapshot;
use crate::core::GateCandidateLink;
use crate::core::GateDecision;
use crate::core::GateRule;
use crate::core::GateRuleId;
use crate::core::IntegrationAttempt;
use crate::core::Lease;
use crate::core::LeaseId;
use crate::core::LeaseStatus;
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
use crate::core::ReservationStatus;
use crate::core::SnapshotId;
use crate::core::Task;
use crate::core::TaskChangelogEntry;
use crate::core::TaskId;
use crate::core::Timestamp;
use crate::interfaces::IdKind;
use crate::interfaces::KernelTx;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: State
// ============================================================================

/// Whole-store state behind the mutex.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    /// Opaque id allocators per kind.
    ids: BTreeMap<IdKind, u64>,
    /// Phase short-id counters per project.
    phase_seq: BTreeMap<ProjectId, u32>,
    /// Milestone short-id counters per phase.
    milestone_seq: BTreeMap<PhaseId, u32>,
    /// Task short-id counters per milestone.
    task_seq: BTreeMap<MilestoneId, u32>,
    /// Project rows.
    projects: BTreeMap<ProjectId, Project>,
    /// Phase rows.
    phases: BTreeMap<PhaseId, Phase>,
    /// Milestone rows.
    milestones: BTreeMap<MilestoneId, Milestone>,
    /// Task rows.
    tasks: BTreeMap<TaskId, Task>,
    /// Dependency edge rows keyed by endpoint pair.
    edges: BTreeMap<(TaskId, TaskId), DependencyEdge>,
    /// Lease rows.
    leases: BTreeMap<LeaseId, Lease>,
    /// Reservation rows.
    reservations: BTreeMap<ReservationId, Reservation>,
    /// Artifact rows.
    artifacts: BTreeMap<ArtifactId, Artifact>,
    /// Integration attempt rows.
    attempts: BTreeMap<AttemptId, IntegrationAttempt>,
    /// Gate rule rows.
    gate_rules: BTreeMap<GateRuleId, GateRule>,
    /// Gate decision rows in insertion order.
    gate_decisions: Vec<GateDecision>,
    /// Gate candidate links in insertion order.
    gate_links: Vec<GateCandidateLink>,
    /// Execution snapshot rows.
    snapshots: BTreeMap<SnapshotId, ExecutionSnapshot>,
    /// Changeset rows.
    changesets: BTreeMap<ChangeSetId, PlanChangeSet>,
    /// Plan version rows in insertion order.
    plan_versions: Vec<PlanVersionRecord>,
    /// Changelog entries in insertion order.
    changelog: Vec<TaskChangelogEntry>,
    /// Event log in append order.
    events: Vec<EventRecord>,
    /// Event sequence allocators per project.
    event_seq: BTreeMap<ProjectId, u64>,
    /// API key rows.
    api_keys: BTreeMap<ApiKeyId, ApiKey>,
}

/// Shared in-memory store for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// State behind a mutex; `with_tx` holds it for the whole operation.
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs one kernel operation with snapshot/rollback semantics.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error after restoring the pre-operation
    /// state; the mutex-poisoned case surfaces as a store fault.
    pub fn with_tx<T, E>(
        &self,
        operation: impl FnOnce(&mut dyn KernelTx) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Store("memory store mutex poisoned".to_string()))?;
        let snapshot = guard.clone();
        match operation(&mut *guard) {
            Ok(value) => Ok(value),
            Err(error) => {
                *guard = snapshot;
                Err(error)
            }
        }
    }
}

// ============================================================================
// SECTION: KernelTx Implementation
// ============================================================================

#[allow(
    clippy::missing_errors_doc,
    reason = "Trait-level error contract documented on KernelTx."
)]
impl KernelTx for MemoryState {
    fn allocate_id(&mut self, kind: IdKind) -> Result<u64, StoreError> {
        let next = self.ids.entry(kind).or_insert(0);
        *next = next.saturating_add(1);
        Ok(*next)
    }

    fn next_phase_index(&mut self, project_id: ProjectId) -> Result<u32, StoreError> {
        let next = self.phase_seq.entry(project_id).or_insert(0);
        *next = next.saturating_add(1);
        Ok(*next)
    }

    fn next_milestone_index(&mut self, phase_id: PhaseId) -> Result<u32, StoreError> {
        let next = self.milestone_seq.entry(phase_id).or_insert(0);
        *next = next.saturating_add(1);
        Ok(*next)
    }

    fn next_task_index(&mut self, milestone_id: MilestoneId) -> Result<u32, StoreError> {
        let next = self.task_seq.entry(milestone_id).or_insert(0);
        *next = next.saturating_add(1);
        Ok(*next)
    }

    fn insert_project(&mut self, project: &Project) -> Result<(), StoreError> {
        self.projects.insert(project.id, project.clone());
        Ok(())
    }

    fn project(&mut self, project_id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.get(&project_id).cloned())
    }

    fn project_by_name(&mut self, name: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.values().find(|project| project.name == name).cloned())
    }

    fn list_projects(&mut self) -> Result<Vec<Project>, StoreError> {
        Ok(self.projects.values().cloned().collect())
    }

    fn update_project(&mut self, project: &Project) -> Result<(), StoreError> {
        self.projects.insert(project.id, project.clone());
        Ok(())
    }

    fn insert_phase(&mut self, phase: &Phase) -> Result<(), StoreError> {
        self.phases.insert(phase.id, phase.clone());
        Ok(())
    }

    fn phase(&mut self, phase_id: PhaseId) -> Result<Option<Phase>, StoreError> {
        Ok(self.phases.get(&phase_id).cloned())
    }

    fn list_phases(&mut self, project_id: ProjectId) -> Result<Vec<Phase>, StoreError> {
        let mut phases: Vec<Phase> = self
            .phases
            .values()
            .filter(|phase| phase.project_id == project_id)
            .cloned()
            .collect();
        phases.sort_by_key(|phase| (phase.sequence, phase.id));
        Ok(phases)
    }

    fn update_phase(&mut self, phase: &Phase) -> Result<(), StoreError> {
        self.phases.insert(phase.id, phase.clone());
        Ok(())
    }

    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        self.milestones.insert(milestone.id, milestone.clone());
        Ok(())
    }

    fn milestone(&mut self, milestone_id: MilestoneId) -> Result<Option<Milestone>, StoreError> {
        Ok(self.milestones.get(&milestone_id).cloned())
    }

    fn list_milestones(&mut self, project_id: ProjectId) -> Result<Vec<Milestone>, StoreError> {
        let mut milestones: Vec<Milestone> = self
            .milestones
            .values()
            .filter(|milestone| milestone.project_id == project_id)
            .cloned()
            .collect();
        milestones.sort_by_key(|milestone| (milestone.phase_id, milestone.sequence, milestone.id));
        Ok(milestones)
    }

    fn update_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        self.milestones.insert(milestone.id, milestone.clone());
        Ok(())
    }

    fn insert_task(&mut self, task: &Task) -> Result<(), StoreError> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn task(&mut self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(&task_id).cloned())
    }

    fn task_by_short_id(
        &mut self,
        project_id: ProjectId,
        short_id: &str,
    ) -> Result<Option<Task>, StoreError> {
        Ok(self
            .tasks
            .values()
            .find(|task| {
                task.project_id == project_id && task.short_id.to_string() == short_id
            })
            .cloned())
    }

    fn tasks_by_short_id(&mut self, short_id: &str) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .values()
            .filter(|task| task.short_id.to_string() == short_id)
            .cloned()
            .collect())
    }

    fn list_tasks(&mut self, project_id: ProjectId) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.values().filter(|task| task.project_id == project_id).cloned().collect())
    }

    fn update_task(&mut self, task: &Task, expected_version: u64) -> Result<bool, StoreError> {
        match self.tasks.get_mut(&task.id) {
            Some(existing) if existing.version == expected_version => {
                *existing = task.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Invalid(format!("task not found: {}", task.id))),
        }
    }

    fn insert_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        self.edges.insert((edge.from_task, edge.to_task), edge.clone());
        Ok(())
    }

    fn edge(
        &mut self,
        from_task: TaskId,
        to_task: TaskId,
    ) -> Result<Option<DependencyEdge>, StoreError> {
        Ok(self.edges.get(&(from_task, to_task)).cloned())
    }

    fn list_edges(&mut self, project_id: ProjectId) -> Result<Vec<DependencyEdge>, StoreError> {
        Ok(self
            .edges
            .values()
            .filter(|edge| edge.project_id == project_id)
            .cloned()
            .collect())
    }

    fn update_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        self.edges.insert((edge.from_task, edge.to_task), edge.clone());
        Ok(())
    }

    fn insert_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        let duplicate = self.leases.values().any(|existing| {
            existing.task_id == lease.task_id && existing.status == LeaseStatus::Active
        });
        if duplicate && lease.status == LeaseStatus::Active {
            return Err(StoreError::Invalid(format!(
                "task {} already has an active lease",
                lease.task_id
            )));
        }
        self.leases.insert(lease.id, lease.clone());
        Ok(())
    }

    fn lease(&mut self, lease_id: LeaseId) -> Result<Option<Lease>, StoreError> {
        Ok(self.leases.get(&lease_id).cloned())
    }

    fn active_lease_for_task(&mut self, task_id: TaskId) -> Result<Option<Lease>, StoreError> {
        Ok(self
            .leases
            .values()
            .find(|lease| lease.task_id == task_id && lease.status == LeaseStatus::Active)
            .cloned())
    }

    fn lease_by_token(&mut self, token: &LeaseToken) -> Result<Option<Lease>, StoreError> {
        Ok(self.leases.values().find(|lease| lease.token == *token).cloned())
    }

    fn update_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        self.leases.insert(lease.id, lease.clone());
        Ok(())
    }

    fn list_expired_active_leases(&mut self, now: Timestamp) -> Result<Vec<Lease>, StoreError> {
        Ok(self
            .leases
            .values()
            .filter(|lease| lease.status == LeaseStatus::Active && lease.expires_at < now)
            .cloned()
            .collect())
    }

    fn active_leases(&mut self, project_id: ProjectId) -> Result<Vec<Lease>, StoreError> {
        let task_ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| task.project_id == project_id)
            .map(|task| task.id)
            .collect();
        Ok(self
            .leases
            .values()
            .filter(|lease| {
                lease.status == LeaseStatus::Active && task_ids.contains(&lease.task_id)
            })
            .cloned()
            .collect())
    }

    fn max_fencing(&mut self, task_id: TaskId) -> Result<u64, StoreError> {
        Ok(self
            .leases
            .values()
            .filter(|lease| lease.task_id == task_id)
            .map(|lease| lease.fencing.get())
            .max()
            .unwrap_or(0))
    }

    fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        let duplicate = self.reservations.values().any(|existing| {
            existing.task_id == reservation.task_id
                && existing.status == ReservationStatus::Active
        });
        if duplicate && reservation.status == ReservationStatus::Active {
            return Err(StoreError::Invalid(format!(
                "task {} already has an active reservation",
                reservation.task_id
            )));
        }
        self.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(&reservation_id).cloned())
    }

    fn active_reservation_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self
            .reservations
            .values()
            .find(|reservation| {
                reservation.task_id == task_id
                    && reservation.status == ReservationStatus::Active
            })
            .cloned())
    }

    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        self.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    fn list_expired_active_reservations(
        &mut self,
        now: Timestamp,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations
            .values()
            .filter(|reservation| {
                reservation.status == ReservationStatus::Active && reservation.expires_at < now
            })
            .cloned()
            .collect())
    }

    fn active_reservations(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let task_ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| task.project_id == project_id)
            .map(|task| task.id)
            .collect();
        Ok(self
            .reservations
            .values()
            .filter(|reservation| {
                reservation.status == ReservationStatus::Active
                    && task_ids.contains(&reservation.task_id)
            })
            .cloned()
            .collect())
    }

    fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), StoreError> {
        self.artifacts.insert(artifact.id, artifact.clone());
        Ok(())
    }

    fn artifact(&mut self, artifact_id: ArtifactId) -> Result<Option<Artifact>, StoreError> {
        Ok(self.artifacts.get(&artifact_id).cloned())
    }

    fn list_artifacts(&mut self, task_id: TaskId) -> Result<Vec<Artifact>, StoreError> {
        Ok(self
            .artifacts
            .values()
            .filter(|artifact| artifact.task_id == task_id)
            .cloned()
            .collect())
    }

    fn insert_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        self.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    fn attempt(
        &mut self,
        attempt_id: AttemptId,
    ) -> Result<Option<IntegrationAttempt>, StoreError> {
        Ok(self.attempts.get(&attempt_id).cloned())
    }

    fn update_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        self.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    fn list_attempts(&mut self, task_id: TaskId) -> Result<Vec<IntegrationAttempt>, StoreError> {
        Ok(self
            .attempts
            .values()
            .filter(|attempt| attempt.task_id == task_id)
            .cloned()
            .collect())
    }

    fn insert_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError> {
        self.gate_rules.insert(rule.id, rule.clone());
        Ok(())
    }

    fn gate_rule(&mut self, rule_id: GateRuleId) -> Result<Option<GateRule>, StoreError> {
        Ok(self.gate_rules.get(&rule_id).cloned())
    }

    fn list_gate_rules(&mut self, project_id: ProjectId) -> Result<Vec<GateRule>, StoreError> {
        Ok(self
            .gate_rules
            .values()
            .filter(|rule| rule.project_id == project_id)
            .cloned()
            .collect())
    }

    fn update_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError> {
        self.gate_rules.insert(rule.id, rule.clone());
        Ok(())
    }

    fn insert_gate_decision(&mut self, decision: &GateDecision) -> Result<(), StoreError> {
        self.gate_decisions.push(decision.clone());
        Ok(())
    }

    fn list_gate_decisions(
        &mut self,
        gate_task_id: TaskId,
    ) -> Result<Vec<GateDecision>, StoreError> {
        Ok(self
            .gate_decisions
            .iter()
            .filter(|decision| decision.gate_task_id == gate_task_id)
            .cloned()
            .collect())
    }

    fn insert_gate_link(&mut self, link: &GateCandidateLink) -> Result<(), StoreError> {
        self.gate_links.push(link.clone());
        Ok(())
    }

    fn links_for_gate(
        &mut self,
        gate_task_id: TaskId,
    ) -> Result<Vec<GateCandidateLink>, StoreError> {
        let mut links: Vec<GateCandidateLink> = self
            .gate_links
            .iter()
            .filter(|link| link.gate_task_id == gate_task_id)
            .cloned()
            .collect();
        links.sort_by_key(|link| link.position);
        Ok(links)
    }

    fn links_for_candidate(
        &mut self,
        candidate_task_id: TaskId,
    ) -> Result<Vec<GateCandidateLink>, StoreError> {
        Ok(self
            .gate_links
            .iter()
            .filter(|link| link.candidate_task_id == candidate_task_id)
            .cloned()
            .collect())
    }

    fn insert_snapshot(&mut self, snapshot: &ExecutionSnapshot) -> Result<(), StoreError> {
        self.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    fn latest_snapshot_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Option<ExecutionSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .values()
            .filter(|snapshot| snapshot.task_id == task_id)
            .max_by_key(|snapshot| snapshot.id)
            .cloned())
    }

    fn snapshot_for_lease(
        &mut self,
        lease_id: LeaseId,
    ) -> Result<Option<ExecutionSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .values()
            .find(|snapshot| snapshot.lease_id == lease_id)
            .cloned())
    }

    fn insert_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        self.changesets.insert(changeset.id, changeset.clone());
        Ok(())
    }

    fn changeset(
        &mut self,
        changeset_id: ChangeSetId,
    ) -> Result<Option<PlanChangeSet>, StoreError> {
        Ok(self.changesets.get(&changeset_id).cloned())
    }

    fn update_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        self.changesets.insert(changeset.id, changeset.clone());
        Ok(())
    }

    fn list_changesets(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Vec<PlanChangeSet>, StoreError> {
        Ok(self
            .changesets
            .values()
            .filter(|changeset| changeset.project_id == project_id)
            .cloned()
            .collect())
    }

    fn insert_plan_version(&mut self, record: &PlanVersionRecord) -> Result<(), StoreError> {
        self.plan_versions.push(record.clone());
        Ok(())
    }

    fn insert_changelog_entry(&mut self, entry: &TaskChangelogEntry) -> Result<(), StoreError> {
        self.changelog.push(entry.clone());
        Ok(())
    }

    fn list_changelog(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<TaskChangelogEntry>, StoreError> {
        Ok(self
            .changelog
            .iter()
            .filter(|entry| entry.task_id == task_id)
            .cloned()
            .collect())
    }

    fn append_event(&mut self, event: &NewEvent) -> Result<EventSeq, StoreError> {
        let next = self.event_seq.entry(event.project_id).or_insert(0);
        *next = next.saturating_add(1);
        let seq = EventSeq::new(*next);
        self.events.push(EventRecord {
            seq,
            project_id: event.project_id,
            entity_kind: event.entity_kind,
            entity_id: event.entity_id.clone(),
            kind: event.kind,
            payload: event.payload.clone(),
            actor: event.actor.clone(),
            recorded_at: event.recorded_at,
        });
        Ok(seq)
    }

    fn events_after(
        &mut self,
        project_id: ProjectId,
        after: EventSeq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .events
            .iter()
            .filter(|event| event.project_id == project_id && event.seq > after)
            .take(limit)
            .cloned()
            .collect())
    }

    fn events_for_entity(
        &mut self,
        project_id: ProjectId,
        entity_kind: EntityKind,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let matching: Vec<EventRecord> = self
            .events
            .iter()
            .filter(|event| {
                event.project_id == project_id
                    && event.entity_kind == entity_kind
                    && event.entity_id == entity_id
            })
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    fn insert_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        self.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    fn api_key_by_fingerprint(
        &mut self,
        fingerprint: &str,
    ) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.api_keys.values().find(|key| key.fingerprint == fingerprint).cloned())
    }

    fn update_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        self.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    fn list_api_keys(&mut self, project_id: ProjectId) -> Result<Vec<ApiKey>, StoreError> {
        Ok(self.api_keys.values().filter(|key| key.project_id == project_id).cloned().collect())
    }
}
