// crates/tascade-core/src/runtime/replan.rs
// ============================================================================
// Module: Tascade Replanning and Governance
// Description: Changeset validate/apply, gate generation, context, events,
//              and credential management.
// Purpose: Mutate the plan atomically while protecting in-flight work.
// Dependencies: crate::{core, interfaces}, runtime::coordinator
// ============================================================================

//! ## Overview
//! Changeset apply is the most delicate kernel operation: it re-checks the
//! base plan version, executes operations in order, classifies materiality,
//! invalidates pre-flight holds, protects in-progress work behind its
//! execution snapshot, and bumps the plan version, all in one transaction.
//! Gate evaluation and decision recording follow the same event-with-write
//! discipline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::core::AgentId;
use crate::core::ApiKey;
use crate::core::ApiKeyId;
use crate::core::ApiKeyStatus;
use crate::core::ChangeOp;
use crate::core::ChangeSetId;
use crate::core::ChangeSetStatus;
use crate::core::DomainError;
use crate::core::EntityKind;
use crate::core::ErrorCode;
use crate::core::EventKind;
use crate::core::EventRecord;
use crate::core::EventSeq;
use crate::core::GateCandidateLink;
use crate::core::GateDecision;
use crate::core::GateDecisionId;
use crate::core::GateKind;
use crate::core::GateOutcome;
use crate::core::GateRule;
use crate::core::GateRuleId;
use crate::core::GateScope;
use crate::core::ImpactPreview;
use crate::core::LeaseStatus;
use crate::core::PlanChangeSet;
use crate::core::PlanVersionRecord;
use crate::core::Project;
use crate::core::ProjectId;
use crate::core::ReservationStatus;
use crate::core::RoleScopes;
use crate::core::Task;
use crate::core::TaskContext;
use crate::core::TaskDraft;
use crate::core::TaskId;
use crate::core::TaskPatch;
use crate::core::TaskRef;
use crate::core::TaskState;
use crate::core::Timestamp;
use crate::core::WorkSpec;
use crate::core::context;
use crate::core::error::sub_codes;
use crate::core::gate::evaluate_rule;
use crate::core::plan::InvalidationAction;
use crate::core::plan::ScopeIndex;
use crate::core::plan::validate_changeset;
use crate::interfaces::IdKind;
use crate::interfaces::KernelTx;
use crate::runtime::coordinator::Coordinator;
use crate::runtime::coordinator::CoordinatorResult;
use crate::runtime::coordinator::allocate;
use crate::runtime::coordinator::commit_task;
use crate::runtime::coordinator::governed_candidates;
use crate::runtime::coordinator::require_project;

// ============================================================================
// SECTION: Requests and Results
// ============================================================================

/// Gate rule payload accepted by `upsert_gate_rule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRuleDraft {
    /// Owning project.
    pub project_id: ProjectId,
    /// Candidate selection scope.
    #[serde(default)]
    pub scope: GateScope,
    /// Kind of gate task to generate.
    pub kind: GateKind,
    /// Implemented-not-integrated count that fires the rule.
    pub pending_threshold: u32,
    /// Optional age threshold in seconds.
    pub age_threshold_secs: Option<u64>,
    /// Maximum candidates per generated gate task.
    pub max_batch: u32,
    /// Require the decision actor to differ from candidate authors.
    #[serde(default)]
    pub require_distinct_reviewer: bool,
}

/// Gate decision payload accepted by `record_gate_decision`.
#[derive(Debug, Clone)]
pub struct GateDecisionDraft {
    /// Gate task the decision lands on.
    pub gate_task: TaskRef,
    /// Decision outcome.
    pub outcome: GateOutcome,
    /// Deciding actor.
    pub actor: AgentId,
    /// Reason for the decision.
    pub reason: String,
    /// Evidence references backing the decision.
    pub evidence_refs: Vec<String>,
    /// Decision timestamp.
    pub now: Timestamp,
}

/// Result of an applied changeset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Project after the version bump.
    pub project: Project,
    /// Applied changeset row.
    pub changeset: PlanChangeSet,
    /// Impact computed at apply time.
    pub impact: ImpactPreview,
}

// ============================================================================
// SECTION: Changeset Engine
// ============================================================================

impl Coordinator {
    /// Creates a draft changeset.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when the project is missing.
    pub fn create_changeset(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        base_plan_version: crate::core::PlanVersion,
        operations: Vec<ChangeOp>,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<PlanChangeSet> {
        let project = require_project(tx, project_id)?;
        let id = allocate(tx, IdKind::ChangeSet, ChangeSetId::from_raw)?;
        let changeset = PlanChangeSet {
            id,
            project_id: project.id,
            base_plan_version,
            target_plan_version: None,
            status: ChangeSetStatus::Draft,
            operations,
            impact: None,
            created_at: now,
            applied_at: None,
        };
        tx.insert_changeset(&changeset)?;
        self.emit(
            tx,
            project.id,
            EntityKind::ChangeSet,
            changeset.id.to_string(),
            EventKind::ChangeSetCreated,
            json!({
                "changeset_id": changeset.id.get(),
                "base_plan_version": changeset.base_plan_version.get(),
            }),
            actor.as_str(),
            now,
        )?;
        Ok(changeset)
    }

    /// Validates a draft changeset, storing the computed impact preview.
    /// Validation is pure over the current graph; calling it twice yields
    /// the same preview.
    ///
    /// # Errors
    ///
    /// Returns the first structural violation as its domain code.
    pub fn validate_changeset_by_id(
        &self,
        tx: &mut dyn KernelTx,
        changeset_id: ChangeSetId,
    ) -> CoordinatorResult<ImpactPreview> {
        let changeset = tx
            .changeset(changeset_id)?
            .ok_or_else(|| DomainError::not_found("changeset", changeset_id))?;
        if changeset.status == ChangeSetStatus::Applied {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("changeset {} is already applied", changeset.id),
            )
            .into());
        }
        let view = self.load_view(tx, changeset.project_id)?;
        let scope = scope_index(tx, changeset.project_id)?;
        let impact = validate_changeset(&view, &scope, &changeset.operations)?;
        let mut validated = changeset;
        validated.status = ChangeSetStatus::Validated;
        validated.impact = Some(impact.clone());
        tx.update_changeset(&validated)?;
        Ok(impact)
    }

    /// Applies a changeset atomically: base-version recheck, ordered
    /// execution, materiality-driven invalidation, readiness refresh, and
    /// the plan-version bump, all under one transaction.
    ///
    /// # Errors
    ///
    /// Returns `PLAN_STALE` when the base version lags and rebase was not
    /// requested; any operation failure rolls the whole apply back.
    #[allow(
        clippy::too_many_lines,
        reason = "Apply is one linear, ordered mutation sequence; splitting it would obscure the transaction boundary."
    )]
    pub fn apply_changeset(
        &self,
        tx: &mut dyn KernelTx,
        changeset_id: ChangeSetId,
        allow_rebase: bool,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<ApplyResult> {
        let changeset = tx
            .changeset(changeset_id)?
            .ok_or_else(|| DomainError::not_found("changeset", changeset_id))?;
        if changeset.status == ChangeSetStatus::Applied {
            return Err(DomainError::new(
                ErrorCode::Conflict,
                format!("changeset {} is already applied", changeset.id),
            )
            .into());
        }
        let project = require_project(tx, changeset.project_id)?;
        if changeset.base_plan_version != project.current_plan_version && !allow_rebase {
            return Err(DomainError::new(
                ErrorCode::PlanStale,
                format!(
                    "base plan version {} != current {}",
                    changeset.base_plan_version, project.current_plan_version
                ),
            )
            .into());
        }

        let view = self.load_view(tx, project.id)?;
        let scope = scope_index(tx, project.id)?;
        let impact = validate_changeset(&view, &scope, &changeset.operations)?;
        let target = project.current_plan_version.next();

        for operation in &changeset.operations {
            self.apply_operation(tx, &project, operation, target, actor, now)?;
        }

        for entry in &impact.invalidations {
            match entry.action {
                InvalidationAction::ReleaseReservation => {
                    self.invalidate_reservation(tx, entry.task_id, actor, now)?;
                }
                InvalidationAction::InvalidateClaim => {
                    self.invalidate_claim(tx, entry.task_id, actor, now)?;
                }
                InvalidationAction::ProtectInProgress => {}
            }
        }

        let mut bumped = project;
        bumped.current_plan_version = target;
        tx.update_project(&bumped)?;
        // Readiness is re-derived at the target version so edges retired by
        // this changeset no longer gate their dependents.
        self.refresh_readiness(tx, bumped.id, now)?;
        tx.insert_plan_version(&PlanVersionRecord {
            project_id: bumped.id,
            version: target,
            changeset_id: Some(changeset.id),
            created_at: now,
        })?;
        let mut applied = changeset;
        applied.status = ChangeSetStatus::Applied;
        applied.target_plan_version = Some(target);
        applied.impact = Some(impact.clone());
        applied.applied_at = Some(now);
        tx.update_changeset(&applied)?;
        self.emit(
            tx,
            bumped.id,
            EntityKind::ChangeSet,
            applied.id.to_string(),
            EventKind::PlanApplied,
            json!({
                "changeset_id": applied.id.get(),
                "base_version": applied.base_plan_version.get(),
                "target_version": target.get(),
            }),
            actor.as_str(),
            now,
        )?;
        Ok(ApplyResult {
            project: bumped,
            changeset: applied,
            impact,
        })
    }

    /// Executes one changeset operation against the transaction.
    fn apply_operation(
        &self,
        tx: &mut dyn KernelTx,
        project: &Project,
        operation: &ChangeOp,
        target: crate::core::PlanVersion,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<()> {
        match operation {
            ChangeOp::AddTask {
                draft,
            } => {
                let milestone = tx.milestone(draft.milestone_id)?.ok_or_else(|| {
                    DomainError::new(
                        ErrorCode::IdentifierParentRequired,
                        format!("milestone not found: {}", draft.milestone_id),
                    )
                })?;
                self.insert_task_from_draft(tx, &milestone, draft, target, actor, now)?;
            }
            ChangeOp::RemoveTask {
                task_id,
            } => {
                self.deprecate_task(tx, *task_id, target, actor, now)?;
            }
            ChangeOp::ModifyTask {
                task_id,
                patch,
            } => {
                apply_patch(tx, *task_id, patch, now)?;
            }
            ChangeOp::AddDependency {
                from,
                to,
                unlock_on,
            } => {
                self.create_dependency(
                    tx,
                    &TaskRef::by_id(*from),
                    &TaskRef::by_id(*to),
                    *unlock_on,
                    actor,
                    now,
                )?;
            }
            ChangeOp::RemoveDependency {
                from,
                to,
            } => {
                let edge = tx.edge(*from, *to)?.ok_or_else(|| {
                    DomainError::not_found("dependency", format!("{from} -> {to}"))
                })?;
                let mut retired = edge;
                retired.removed_in_plan_version = Some(target);
                tx.update_edge(&retired)?;
                self.emit(
                    tx,
                    project.id,
                    EntityKind::Dependency,
                    format!("{from}->{to}"),
                    EventKind::DependencyRemoved,
                    json!({ "from_task": from.get(), "to_task": to.get() }),
                    actor.as_str(),
                    now,
                )?;
            }
            ChangeOp::RetargetDependency {
                from,
                to,
                new_to,
            } => {
                let edge = tx.edge(*from, *to)?.ok_or_else(|| {
                    DomainError::not_found("dependency", format!("{from} -> {to}"))
                })?;
                let unlock_on = edge.unlock_on;
                let mut retired = edge;
                retired.removed_in_plan_version = Some(target);
                tx.update_edge(&retired)?;
                self.emit(
                    tx,
                    project.id,
                    EntityKind::Dependency,
                    format!("{from}->{to}"),
                    EventKind::DependencyRemoved,
                    json!({ "from_task": from.get(), "to_task": to.get() }),
                    actor.as_str(),
                    now,
                )?;
                self.create_dependency(
                    tx,
                    &TaskRef::by_id(*from),
                    &TaskRef::by_id(*new_to),
                    unlock_on,
                    actor,
                    now,
                )?;
            }
            ChangeOp::ReorderPhase {
                phase_id,
                sequence,
            } => {
                let phase = tx
                    .phase(*phase_id)?
                    .ok_or_else(|| DomainError::not_found("phase", phase_id))?;
                let mut reordered = phase;
                reordered.sequence = *sequence;
                tx.update_phase(&reordered)?;
            }
            ChangeOp::ReorderMilestone {
                milestone_id,
                sequence,
            } => {
                let milestone = tx
                    .milestone(*milestone_id)?
                    .ok_or_else(|| DomainError::not_found("milestone", milestone_id))?;
                let mut reordered = milestone;
                reordered.sequence = *sequence;
                tx.update_milestone(&reordered)?;
            }
        }
        Ok(())
    }

    /// Deprecates a task removed by a changeset. Pre-flight holds are
    /// released and the task cancels unless it is in progress, which
    /// finishes under its snapshot.
    fn deprecate_task(
        &self,
        tx: &mut dyn KernelTx,
        task_id: TaskId,
        target: crate::core::PlanVersion,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<()> {
        self.invalidate_reservation(tx, task_id, actor, now)?;
        // Reload after the release above, which may have re-queued the row.
        let task =
            tx.task(task_id)?.ok_or_else(|| DomainError::not_found("task", task_id))?;
        // Edges of a removed task retire with it.
        for edge in tx.list_edges(task.project_id)? {
            if edge.from_task != task.id && edge.to_task != task.id {
                continue;
            }
            if !edge.is_active_at(target) {
                continue;
            }
            let mut retired = edge;
            retired.removed_in_plan_version = Some(target);
            tx.update_edge(&retired)?;
            self.emit(
                tx,
                task.project_id,
                EntityKind::Dependency,
                format!("{}->{}", retired.from_task, retired.to_task),
                EventKind::DependencyRemoved,
                json!({
                    "from_task": retired.from_task.get(),
                    "to_task": retired.to_task.get(),
                }),
                actor.as_str(),
                now,
            )?;
        }
        let cancel = !matches!(task.state, TaskState::InProgress) && !task.state.is_terminal();
        if cancel
            && let Some(lease) = tx.active_lease_for_task(task.id)?
        {
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
                actor.as_str(),
                now,
            )?;
        }
        let from = task.state;
        let mut deprecated = task;
        let expected = deprecated.version;
        deprecated.deprecated_in_plan_version = Some(target);
        if cancel {
            deprecated.state = TaskState::Cancelled;
        }
        deprecated.version = deprecated.version.saturating_add(1);
        deprecated.updated_at = now;
        commit_task(tx, &deprecated, expected)?;
        if cancel {
            self.emit(
                tx,
                deprecated.project_id,
                EntityKind::Task,
                deprecated.id.to_string(),
                EventKind::TaskTransitioned,
                json!({
                    "task_id": deprecated.id.get(),
                    "from": from.as_str(),
                    "to": deprecated.state.as_str(),
                }),
                actor.as_str(),
                now,
            )?;
        }
        Ok(())
    }

    /// Releases an active reservation during invalidation.
    fn invalidate_reservation(
        &self,
        tx: &mut dyn KernelTx,
        task_id: TaskId,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<()> {
        let Some(reservation) = tx.active_reservation_for_task(task_id)? else {
            return Ok(());
        };
        let task =
            tx.task(task_id)?.ok_or_else(|| DomainError::not_found("task", task_id))?;
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
            actor.as_str(),
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
                actor.as_str(),
                now,
            )?;
        }
        Ok(())
    }

    /// Invalidates an active claim during a material replan. The next claim
    /// on the task receives a strictly greater fencing counter.
    fn invalidate_claim(
        &self,
        tx: &mut dyn KernelTx,
        task_id: TaskId,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<()> {
        let Some(lease) = tx.active_lease_for_task(task_id)? else {
            return Ok(());
        };
        let task =
            tx.task(task_id)?.ok_or_else(|| DomainError::not_found("task", task_id))?;
        if task.state != TaskState::Claimed {
            return Ok(());
        }
        let mut released = lease;
        released.status = LeaseStatus::Released;
        tx.update_lease(&released)?;
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
            EventKind::TaskClaimInvalidated,
            json!({ "task_id": requeued.id.get(), "lease_id": released.id.get() }),
            actor.as_str(),
            now,
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Gate policy engine
    // ------------------------------------------------------------------

    /// Creates or replaces a gate rule.
    ///
    /// # Errors
    ///
    /// Returns `INVARIANT_VIOLATION` when thresholds are zero.
    pub fn create_gate_rule(
        &self,
        tx: &mut dyn KernelTx,
        draft: &GateRuleDraft,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<GateRule> {
        let project = require_project(tx, draft.project_id)?;
        if draft.pending_threshold == 0 || draft.max_batch == 0 {
            return Err(DomainError::new(
                ErrorCode::InvariantViolation,
                "gate thresholds must be greater than zero",
            )
            .into());
        }
        let id = allocate(tx, IdKind::GateRule, GateRuleId::from_raw)?;
        let rule = GateRule {
            id,
            project_id: project.id,
            scope: draft.scope.clone(),
            kind: draft.kind,
            pending_threshold: draft.pending_threshold,
            age_threshold_secs: draft.age_threshold_secs,
            max_batch: draft.max_batch,
            require_distinct_reviewer: draft.require_distinct_reviewer,
            is_active: true,
            created_at: now,
        };
        tx.insert_gate_rule(&rule)?;
        self.emit(
            tx,
            project.id,
            EntityKind::GateRule,
            rule.id.to_string(),
            EventKind::GateRuleCreated,
            json!({ "rule_id": rule.id.get(), "kind": rule.kind.task_class().as_str() }),
            actor.as_str(),
            now,
        )?;
        Ok(rule)
    }

    /// Evaluates every active rule, generating gate tasks for fired
    /// triggers. Returns the generated gate task ids.
    ///
    /// # Errors
    ///
    /// Returns storage faults; rules that do not fire are skipped silently.
    pub fn evaluate_gate_rules(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<Vec<TaskId>> {
        let project = require_project(tx, project_id)?;
        let mut generated = Vec::new();
        let rules = tx.list_gate_rules(project.id)?;
        for rule in rules {
            let view = self.load_view(tx, project.id)?;
            let governed = governed_candidates(tx, &view)?;
            if self.rule_has_active_gate(tx, &view, rule.id)? {
                continue;
            }
            let tasks: Vec<&Task> = view.tasks.values().collect();
            let governed_list: Vec<TaskId> = governed.iter().copied().collect();
            let Some(trigger) = evaluate_rule(&rule, &tasks, &governed_list, now) else {
                continue;
            };
            let gate_task_id =
                self.generate_gate_task(tx, &view, &rule, &trigger.candidates, actor, now)?;
            generated.push(gate_task_id);
        }
        Ok(generated)
    }

    /// Returns true when an undecided gate task generated by the rule is
    /// still live.
    fn rule_has_active_gate(
        &self,
        tx: &mut dyn KernelTx,
        view: &crate::core::ProjectView,
        rule_id: GateRuleId,
    ) -> CoordinatorResult<bool> {
        for task in view.tasks.values() {
            if !task.task_class.is_gate() || task.state.is_terminal() {
                continue;
            }
            let links = tx.links_for_gate(task.id)?;
            if links.iter().any(|link| link.rule_id == Some(rule_id)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Generates one gate task with its candidate links.
    fn generate_gate_task(
        &self,
        tx: &mut dyn KernelTx,
        view: &crate::core::ProjectView,
        rule: &GateRule,
        candidates: &[TaskId],
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<TaskId> {
        // The gate lands under the milestone of the newest candidate so its
        // short id stays inside the scope it governs.
        let newest = candidates
            .iter()
            .filter_map(|candidate| view.tasks.get(candidate))
            .max_by_key(|task| (task.created_at, task.id))
            .ok_or_else(|| {
                DomainError::new(ErrorCode::InvariantViolation, "gate trigger had no candidates")
            })?;
        let milestone = tx
            .milestone(newest.milestone_id)?
            .ok_or_else(|| DomainError::not_found("milestone", newest.milestone_id))?;
        let short_ids: Vec<String> = candidates
            .iter()
            .filter_map(|candidate| view.tasks.get(candidate))
            .map(|task| task.short_id.to_string())
            .collect();
        let draft = TaskDraft {
            milestone_id: milestone.id,
            title: format!("{} over {} candidate(s)", gate_title(rule.kind), candidates.len()),
            description: String::new(),
            priority: 0,
            task_class: rule.kind.task_class(),
            capability_tags: Vec::new(),
            expected_touches: Vec::new(),
            exclusive_paths: Vec::new(),
            shared_paths: Vec::new(),
            work_spec: WorkSpec {
                objective: format!(
                    "Review and decide integration for: {}",
                    short_ids.join(", ")
                ),
                constraints: Vec::new(),
                acceptance_criteria: vec![
                    "A decision is recorded with evidence references".to_string(),
                ],
                interfaces: Vec::new(),
                path_hints: Vec::new(),
                extensions: std::collections::BTreeMap::new(),
            },
        };
        let gate_task =
            self.insert_task_from_draft(tx, &milestone, &draft, view.plan_version, actor, now)?;
        for (position, candidate) in candidates.iter().enumerate() {
            tx.insert_gate_link(&GateCandidateLink {
                gate_task_id: gate_task.id,
                candidate_task_id: *candidate,
                rule_id: Some(rule.id),
                position: u32::try_from(position).unwrap_or(u32::MAX),
            })?;
        }
        self.emit(
            tx,
            gate_task.project_id,
            EntityKind::Task,
            gate_task.id.to_string(),
            EventKind::GateGenerated,
            json!({
                "gate_task_id": gate_task.id.get(),
                "rule_id": rule.id.get(),
                "candidates": candidates.iter().map(|id| id.get()).collect::<Vec<_>>(),
            }),
            actor.as_str(),
            now,
        )?;
        self.refresh_readiness(tx, gate_task.project_id, now)?;
        Ok(gate_task.id)
    }

    /// Records an immutable gate decision and applies its candidate effects.
    ///
    /// # Errors
    ///
    /// Returns `INVARIANT_VIOLATION` when the task is not gate-class, the
    /// reason is empty, or the actor authored a governed candidate under a
    /// distinct-reviewer rule.
    pub fn record_gate_decision(
        &self,
        tx: &mut dyn KernelTx,
        draft: &GateDecisionDraft,
    ) -> CoordinatorResult<GateDecision> {
        let gate_task = self.resolve_task(tx, &draft.gate_task)?;
        if !gate_task.task_class.is_gate() {
            return Err(DomainError::invariant(
                sub_codes::STATE_NOT_ELIGIBLE,
                format!("task {} is not a gate task", gate_task.id),
            )
            .into());
        }
        if draft.reason.trim().is_empty() {
            return Err(DomainError::new(
                ErrorCode::InvariantViolation,
                "gate decisions require a reason",
            )
            .into());
        }
        let links = tx.links_for_gate(gate_task.id)?;
        let rule_id = links.iter().find_map(|link| link.rule_id);
        let distinct_required = match rule_id {
            Some(rule_id) => {
                tx.gate_rule(rule_id)?.is_some_and(|rule| rule.require_distinct_reviewer)
            }
            None => true,
        };
        if distinct_required {
            for link in &links {
                let author = tx
                    .list_artifacts(link.candidate_task_id)?
                    .last()
                    .map(|artifact| artifact.agent_id.clone());
                if author.is_some_and(|author| author == draft.actor) {
                    return Err(DomainError::invariant(
                        sub_codes::REVIEWER_IS_AUTHOR,
                        "decision actor authored a governed candidate",
                    )
                    .into());
                }
            }
        }
        let id = allocate(tx, IdKind::GateDecision, GateDecisionId::from_raw)?;
        let decision = GateDecision {
            id,
            rule_id,
            gate_task_id: gate_task.id,
            outcome: draft.outcome,
            actor: draft.actor.clone(),
            reason: draft.reason.clone(),
            evidence_refs: draft.evidence_refs.clone(),
            decided_at: draft.now,
        };
        tx.insert_gate_decision(&decision)?;
        self.emit(
            tx,
            gate_task.project_id,
            EntityKind::GateDecision,
            decision.id.to_string(),
            EventKind::GateDecisionRecorded,
            json!({
                "decision_id": decision.id.get(),
                "gate_task_id": gate_task.id.get(),
                "outcome": decision.outcome.as_str(),
            }),
            draft.actor.as_str(),
            draft.now,
        )?;
        if decision.outcome == GateOutcome::Rejected {
            for link in &links {
                let Some(candidate) = tx.task(link.candidate_task_id)? else {
                    continue;
                };
                if candidate.state.is_terminal() || candidate.state == TaskState::Blocked {
                    continue;
                }
                let from = candidate.state;
                let mut blocked = candidate;
                let expected = blocked.version;
                blocked.state = TaskState::Blocked;
                blocked.version = blocked.version.saturating_add(1);
                blocked.updated_at = draft.now;
                commit_task(tx, &blocked, expected)?;
                self.emit(
                    tx,
                    blocked.project_id,
                    EntityKind::Task,
                    blocked.id.to_string(),
                    EventKind::TaskTransitioned,
                    json!({
                        "task_id": blocked.id.get(),
                        "from": from.as_str(),
                        "to": blocked.state.as_str(),
                    }),
                    draft.actor.as_str(),
                    draft.now,
                )?;
            }
        }
        Ok(decision)
    }

    // ------------------------------------------------------------------
    // Context projection
    // ------------------------------------------------------------------

    /// Assembles the bounded context projection for one task.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when the task reference does not resolve.
    pub fn get_task_context(
        &self,
        tx: &mut dyn KernelTx,
        task_ref: &TaskRef,
        ancestor_depth: u32,
        dependent_depth: u32,
    ) -> CoordinatorResult<TaskContext> {
        let task = self.resolve_task(tx, task_ref)?;
        let view = self.load_view(tx, task.project_id)?;
        let effective_work_spec = if task.state.is_in_flight() {
            tx.latest_snapshot_for_task(task.id)?
                .map_or_else(|| task.work_spec.clone(), |snapshot| snapshot.work_spec)
        } else {
            task.work_spec.clone()
        };
        let recent_events = tx.events_for_entity(
            task.project_id,
            EntityKind::Task,
            &task.id.to_string(),
            self.config().context_event_limit,
        )?;
        Ok(context::assemble(
            &view,
            &task,
            effective_work_spec,
            ancestor_depth,
            dependent_depth,
            recent_events,
        ))
    }

    // ------------------------------------------------------------------
    // Event cursor
    // ------------------------------------------------------------------

    /// Reads events after a cursor, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when the project is missing.
    pub fn read_events(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        after: EventSeq,
        limit: usize,
    ) -> CoordinatorResult<Vec<EventRecord>> {
        let _ = require_project(tx, project_id)?;
        Ok(tx.events_after(project_id, after, limit)?)
    }

    // ------------------------------------------------------------------
    // API keys
    // ------------------------------------------------------------------

    /// Creates a project-scoped API key record from a fingerprint. The raw
    /// key never reaches the kernel.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when the project is missing.
    pub fn create_api_key(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        name: &str,
        fingerprint: &str,
        role_scopes: RoleScopes,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<ApiKey> {
        let project = require_project(tx, project_id)?;
        let id = allocate(tx, IdKind::ApiKey, ApiKeyId::from_raw)?;
        let key = ApiKey {
            id,
            project_id: project.id,
            name: name.to_string(),
            fingerprint: fingerprint.to_string(),
            role_scopes,
            status: ApiKeyStatus::Active,
            created_at: now,
            revoked_at: None,
        };
        tx.insert_api_key(&key)?;
        self.emit(
            tx,
            project.id,
            EntityKind::ApiKey,
            key.id.to_string(),
            EventKind::ApiKeyCreated,
            json!({ "api_key_id": key.id.get(), "name": key.name }),
            actor.as_str(),
            now,
        )?;
        Ok(key)
    }

    /// Revokes an API key permanently.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when the key does not exist in the project.
    pub fn revoke_api_key(
        &self,
        tx: &mut dyn KernelTx,
        project_id: ProjectId,
        key_id: ApiKeyId,
        actor: &AgentId,
        now: Timestamp,
    ) -> CoordinatorResult<ApiKey> {
        let key = tx
            .list_api_keys(project_id)?
            .into_iter()
            .find(|key| key.id == key_id)
            .ok_or_else(|| DomainError::not_found("api key", key_id))?;
        let mut revoked = key;
        revoked.status = ApiKeyStatus::Revoked;
        revoked.revoked_at = Some(now);
        tx.update_api_key(&revoked)?;
        self.emit(
            tx,
            project_id,
            EntityKind::ApiKey,
            revoked.id.to_string(),
            EventKind::ApiKeyRevoked,
            json!({ "api_key_id": revoked.id.get() }),
            actor.as_str(),
            now,
        )?;
        Ok(revoked)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Applies a task patch row-level, bumping the version.
fn apply_patch(
    tx: &mut dyn KernelTx,
    task_id: TaskId,
    patch: &TaskPatch,
    now: Timestamp,
) -> CoordinatorResult<()> {
    let task = tx.task(task_id)?.ok_or_else(|| DomainError::not_found("task", task_id))?;
    let mut updated = task;
    let expected = updated.version;
    if let Some(title) = &patch.title {
        updated.title.clone_from(title);
    }
    if let Some(description) = &patch.description {
        updated.description.clone_from(description);
    }
    if let Some(priority) = patch.priority {
        updated.priority = priority;
    }
    if let Some(task_class) = patch.task_class {
        updated.task_class = task_class;
    }
    if let Some(tags) = &patch.capability_tags {
        updated.capability_tags = tags.iter().cloned().collect();
    }
    if let Some(touches) = &patch.expected_touches {
        updated.expected_touches.clone_from(touches);
    }
    if let Some(paths) = &patch.exclusive_paths {
        updated.exclusive_paths.clone_from(paths);
    }
    if let Some(paths) = &patch.shared_paths {
        updated.shared_paths.clone_from(paths);
    }
    if let Some(work_spec) = &patch.work_spec {
        work_spec.validate()?;
        updated.work_spec = work_spec.clone();
    }
    updated.version = updated.version.saturating_add(1);
    updated.updated_at = now;
    commit_task(tx, &updated, expected)?;
    Ok(())
}

/// Builds the scope index for changeset validation.
fn scope_index(tx: &mut dyn KernelTx, project_id: ProjectId) -> CoordinatorResult<ScopeIndex> {
    let phases = tx.list_phases(project_id)?.into_iter().map(|phase| phase.id).collect();
    let milestones =
        tx.list_milestones(project_id)?.into_iter().map(|milestone| milestone.id).collect();
    Ok(ScopeIndex {
        phases,
        milestones,
    })
}

/// Human title prefix for a gate kind.
const fn gate_title(kind: GateKind) -> &'static str {
    match kind {
        GateKind::ReviewGate => "Review gate",
        GateKind::MergeGate => "Merge gate",
    }
}
