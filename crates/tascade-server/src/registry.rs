// crates/tascade-server/src/registry.rs
// ============================================================================
// Module: Operation Registry
// Description: Explicit operation table mapping names to kernel handlers.
// Purpose: One dispatch path shared by the REST surface and the tool surface.
// Dependencies: axum, serde, serde_json, tascade-core, tascade-store-sqlite
// ============================================================================

//! ## Overview
//! Every kernel operation is one entry in an explicit table built at
//! startup: name, REST binding, required role scope, and handler. REST
//! routes and the tool-call surface both dispatch through this table, so
//! the two surfaces cannot drift. Handlers open exactly one store
//! transaction, enforce project scoping after resolution, and let the
//! error mapper translate kernel failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::json;
use tascade_core::AgentId;
use tascade_core::ApiKeyId;
use tascade_core::ArtifactDraft;
use tascade_core::AttemptId;
use tascade_core::CapabilityInput;
use tascade_core::ChangeOp;
use tascade_core::ChangeSetId;
use tascade_core::CheckStatus;
use tascade_core::ClaimRequest;
use tascade_core::CoordinatorError;
use tascade_core::DomainError;
use tascade_core::ErrorCode;
use tascade_core::EventSeq;
use tascade_core::GateDecisionDraft;
use tascade_core::GateOutcome;
use tascade_core::GateRuleDraft;
use tascade_core::HeartbeatRequest;
use tascade_core::IntegrationResult;
use tascade_core::LeaseToken;
use tascade_core::MilestoneId;
use tascade_core::PhaseId;
use tascade_core::PlanVersion;
use tascade_core::ProjectId;
use tascade_core::RoleScopes;
use tascade_core::StoreError;
use tascade_core::TaskDraft;
use tascade_core::TaskRef;
use tascade_core::TaskState;
use tascade_core::TransitionRequest;
use tascade_core::UnlockOn;

use crate::auth::AuthedActor;
use crate::auth::key_fingerprint;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// SECTION: Dispatch Plumbing
// ============================================================================

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        CoordinatorError::from(error).into()
    }
}

/// Handler signature shared by every operation.
pub type OperationHandler = fn(&AppState, &AuthedActor, Value) -> Result<Value, ApiError>;

/// One operation table entry.
#[derive(Clone)]
pub struct OperationDef {
    /// Stable operation name (tool-surface identifier).
    pub name: &'static str,
    /// REST method binding.
    pub method: &'static str,
    /// REST path binding.
    pub path: &'static str,
    /// Role scopes the key must grant.
    pub required: RoleScopes,
    /// Handler function.
    pub handler: OperationHandler,
}

/// Wire summary of one operation for the tool listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    /// Stable operation name.
    pub name: String,
    /// REST method binding.
    pub method: String,
    /// REST path binding.
    pub path: String,
}

/// Explicit operation table built at startup.
pub struct OperationRegistry {
    /// Operations keyed by stable name.
    ops: BTreeMap<&'static str, OperationDef>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    /// Builds the full operation table.
    #[must_use]
    pub fn new() -> Self {
        let mut ops = BTreeMap::new();
        for def in operation_table() {
            ops.insert(def.name, def);
        }
        Self {
            ops,
        }
    }

    /// Returns the table entries in name order.
    #[must_use]
    pub fn list(&self) -> Vec<OperationSummary> {
        self.ops
            .values()
            .map(|def| OperationSummary {
                name: def.name.to_string(),
                method: def.method.to_string(),
                path: def.path.to_string(),
            })
            .collect()
    }

    /// Looks up one entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OperationDef> {
        self.ops.get(name)
    }

    /// Dispatches one operation: scope check, then handler.
    ///
    /// # Errors
    ///
    /// Returns `AUTH_DENIED` on missing scopes, `NOT_FOUND` for unknown
    /// names, and the handler's error otherwise.
    pub fn dispatch(
        &self,
        state: &AppState,
        actor: &AuthedActor,
        name: &str,
        payload: Value,
    ) -> Result<Value, ApiError> {
        let def = self.get(name).ok_or_else(|| ApiError::unknown_operation(name))?;
        actor.require(def.required)?;
        (def.handler)(state, actor, payload)
    }
}

/// Deserializes an operation payload, failing closed on shape errors.
fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    serde_json::from_value(payload).map_err(|err| ApiError::bad_request(err.to_string()))
}

/// Serializes a handler result.
fn respond<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|err| ApiError::bad_request(err.to_string()))
}

/// Parses a wire task reference.
fn task_ref(raw: &str, project_id: Option<ProjectId>) -> Result<TaskRef, ApiError> {
    TaskRef::parse(raw, project_id).map_err(|err| ApiError::bad_request(err.to_string()))
}

/// Parses an optional capability filter with the stable domain code.
fn capability_filter(raw: Option<Value>) -> Result<Option<CapabilityInput>, ApiError> {
    raw.map(|value| {
        serde_json::from_value::<CapabilityInput>(value).map_err(|_| {
            ApiError::from(DomainError::new(
                ErrorCode::InvalidCapabilities,
                "capabilities must be a string list or a comma-delimited string",
            ))
        })
    })
    .transpose()
}

/// Generates a fresh opaque lease token from host entropy.
fn fresh_lease_token() -> LeaseToken {
    let mut bytes = [0_u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut token = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        token.push_str(&format!("{byte:02x}"));
    }
    LeaseToken::new(token)
}

/// Generates a fresh raw API key from host entropy.
fn fresh_api_key() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut key = String::with_capacity(8 + bytes.len() * 2);
    key.push_str("tsc_");
    for byte in bytes {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}

// ============================================================================
// SECTION: Operation Table
// ============================================================================

/// Builds the full operation list. The REST router is generated from the
/// same entries, so the two surfaces stay mechanically in sync.
#[allow(
    clippy::too_many_lines,
    reason = "The table is intentionally one flat, explicit listing."
)]
fn operation_table() -> Vec<OperationDef> {
    vec![
        OperationDef {
            name: "project.create",
            method: "POST",
            path: "/v1/projects",
            required: RoleScopes::PLANNER,
            handler: op_project_create,
        },
        OperationDef {
            name: "project.list",
            method: "GET",
            path: "/v1/projects",
            required: RoleScopes::from_bits(0),
            handler: op_project_list,
        },
        OperationDef {
            name: "project.get",
            method: "GET",
            path: "/v1/projects/{id}",
            required: RoleScopes::from_bits(0),
            handler: op_project_get,
        },
        OperationDef {
            name: "phase.create",
            method: "POST",
            path: "/v1/phases",
            required: RoleScopes::PLANNER,
            handler: op_phase_create,
        },
        OperationDef {
            name: "milestone.create",
            method: "POST",
            path: "/v1/milestones",
            required: RoleScopes::PLANNER,
            handler: op_milestone_create,
        },
        OperationDef {
            name: "task.create",
            method: "POST",
            path: "/v1/tasks",
            required: RoleScopes::PLANNER,
            handler: op_task_create,
        },
        OperationDef {
            name: "task.get",
            method: "GET",
            path: "/v1/tasks/{id}",
            required: RoleScopes::from_bits(0),
            handler: op_task_get,
        },
        OperationDef {
            name: "task.list",
            method: "GET",
            path: "/v1/tasks",
            required: RoleScopes::from_bits(0),
            handler: op_task_list,
        },
        OperationDef {
            name: "dependency.create",
            method: "POST",
            path: "/v1/dependencies",
            required: RoleScopes::PLANNER,
            handler: op_dependency_create,
        },
        OperationDef {
            name: "dependency.list",
            method: "GET",
            path: "/v1/dependencies",
            required: RoleScopes::from_bits(0),
            handler: op_dependency_list,
        },
        OperationDef {
            name: "task.context",
            method: "GET",
            path: "/v1/tasks/{id}/context",
            required: RoleScopes::from_bits(0),
            handler: op_task_context,
        },
        OperationDef {
            name: "task.ready",
            method: "GET",
            path: "/v1/tasks/ready",
            required: RoleScopes::AGENT,
            handler: op_task_ready,
        },
        OperationDef {
            name: "task.claim",
            method: "POST",
            path: "/v1/tasks/{id}/claim",
            required: RoleScopes::AGENT,
            handler: op_task_claim,
        },
        OperationDef {
            name: "task.heartbeat",
            method: "POST",
            path: "/v1/tasks/{id}/heartbeat",
            required: RoleScopes::AGENT,
            handler: op_task_heartbeat,
        },
        OperationDef {
            name: "task.release",
            method: "POST",
            path: "/v1/tasks/{id}/release",
            required: RoleScopes::AGENT,
            handler: op_task_release,
        },
        OperationDef {
            name: "task.assign",
            method: "POST",
            path: "/v1/tasks/{id}/assign",
            required: RoleScopes::OPERATOR,
            handler: op_task_assign,
        },
        OperationDef {
            name: "task.transition",
            method: "POST",
            path: "/v1/tasks/{id}/state",
            required: RoleScopes::AGENT,
            handler: op_task_transition,
        },
        OperationDef {
            name: "artifact.create",
            method: "POST",
            path: "/v1/tasks/{id}/artifacts",
            required: RoleScopes::AGENT,
            handler: op_artifact_create,
        },
        OperationDef {
            name: "artifact.list",
            method: "GET",
            path: "/v1/tasks/{id}/artifacts",
            required: RoleScopes::from_bits(0),
            handler: op_artifact_list,
        },
        OperationDef {
            name: "integration.enqueue",
            method: "POST",
            path: "/v1/integration-attempts",
            required: RoleScopes::AGENT,
            handler: op_integration_enqueue,
        },
        OperationDef {
            name: "integration.update",
            method: "POST",
            path: "/v1/integration-attempts/{id}/result",
            required: RoleScopes::AGENT,
            handler: op_integration_update,
        },
        OperationDef {
            name: "integration.list",
            method: "GET",
            path: "/v1/integration-attempts",
            required: RoleScopes::from_bits(0),
            handler: op_integration_list,
        },
        OperationDef {
            name: "gate_rule.create",
            method: "POST",
            path: "/v1/gate-rules",
            required: RoleScopes::OPERATOR,
            handler: op_gate_rule_create,
        },
        OperationDef {
            name: "gate.evaluate",
            method: "POST",
            path: "/v1/gates/evaluate",
            required: RoleScopes::OPERATOR,
            handler: op_gate_evaluate,
        },
        OperationDef {
            name: "gate_decision.create",
            method: "POST",
            path: "/v1/gate-decisions",
            required: RoleScopes::REVIEWER,
            handler: op_gate_decision_create,
        },
        OperationDef {
            name: "changeset.create",
            method: "POST",
            path: "/v1/plans/changesets",
            required: RoleScopes::PLANNER,
            handler: op_changeset_create,
        },
        OperationDef {
            name: "changeset.validate",
            method: "POST",
            path: "/v1/plans/changesets/{id}/validate",
            required: RoleScopes::PLANNER,
            handler: op_changeset_validate,
        },
        OperationDef {
            name: "changeset.apply",
            method: "POST",
            path: "/v1/plans/changesets/{id}/apply",
            required: RoleScopes::PLANNER,
            handler: op_changeset_apply,
        },
        OperationDef {
            name: "changelog.note",
            method: "POST",
            path: "/v1/tasks/{id}/changelog",
            required: RoleScopes::AGENT,
            handler: op_changelog_note,
        },
        OperationDef {
            name: "changelog.list",
            method: "GET",
            path: "/v1/tasks/{id}/changelog",
            required: RoleScopes::from_bits(0),
            handler: op_changelog_list,
        },
        OperationDef {
            name: "event.list",
            method: "GET",
            path: "/v1/events",
            required: RoleScopes::from_bits(0),
            handler: op_event_list,
        },
        OperationDef {
            name: "api_key.create",
            method: "POST",
            path: "/v1/api-keys",
            required: RoleScopes::OPERATOR,
            handler: op_api_key_create,
        },
        OperationDef {
            name: "api_key.revoke",
            method: "POST",
            path: "/v1/api-keys/{id}/revoke",
            required: RoleScopes::OPERATOR,
            handler: op_api_key_revoke,
        },
    ]
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Payload for `project.create`.
#[derive(Debug, Deserialize)]
struct ProjectCreatePayload {
    /// Project name.
    name: String,
    /// Acting identity.
    actor: String,
}

/// Payload naming a project.
#[derive(Debug, Deserialize)]
struct ProjectScopedPayload {
    /// Target project.
    project_id: ProjectId,
}

/// Payload for `phase.create`.
#[derive(Debug, Deserialize)]
struct PhaseCreatePayload {
    /// Target project.
    project_id: ProjectId,
    /// Phase name.
    name: String,
    /// Acting identity.
    actor: String,
}

/// Payload for `milestone.create`.
#[derive(Debug, Deserialize)]
struct MilestoneCreatePayload {
    /// Parent phase.
    phase_id: PhaseId,
    /// Milestone name.
    name: String,
    /// Acting identity.
    actor: String,
}

/// Payload for `task.create`: a task draft with an explicit parent.
#[derive(Debug, Deserialize)]
struct TaskCreatePayload {
    /// Parent milestone; required for task creation.
    milestone_id: Option<MilestoneId>,
    /// Task title.
    title: String,
    /// Task description.
    #[serde(default)]
    description: String,
    /// Scheduling priority.
    #[serde(default)]
    priority: i32,
    /// Task class wire form.
    task_class: String,
    /// Required claimer capabilities.
    #[serde(default)]
    capability_tags: Vec<String>,
    /// Paths the work is expected to touch.
    #[serde(default)]
    expected_touches: Vec<String>,
    /// Exclusive path patterns.
    #[serde(default)]
    exclusive_paths: Vec<String>,
    /// Shared path patterns.
    #[serde(default)]
    shared_paths: Vec<String>,
    /// Structured execution contract.
    work_spec: tascade_core::WorkSpec,
    /// Acting identity.
    actor: String,
}

/// Payload naming a task.
#[derive(Debug, Deserialize)]
struct TaskScopedPayload {
    /// Task reference: opaque id or dotted short id.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
}

/// Payload for `dependency.create`.
#[derive(Debug, Deserialize)]
struct DependencyCreatePayload {
    /// Predecessor reference.
    from: String,
    /// Dependent reference.
    to: String,
    /// Unlock criterion wire form.
    unlock_on: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Acting identity.
    actor: String,
}

/// Payload for `task.context`.
#[derive(Debug, Deserialize)]
struct TaskContextPayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Upstream depth.
    #[serde(default = "default_ancestor_depth")]
    ancestor_depth: u32,
    /// Downstream depth.
    #[serde(default = "default_dependent_depth")]
    dependent_depth: u32,
}

/// Returns the default ancestor depth.
const fn default_ancestor_depth() -> u32 {
    tascade_core::core::context::DEFAULT_ANCESTOR_DEPTH
}

/// Returns the default dependent depth.
const fn default_dependent_depth() -> u32 {
    tascade_core::core::context::DEFAULT_DEPENDENT_DEPTH
}

/// Payload for `task.ready`.
#[derive(Debug, Deserialize)]
struct ReadyPayload {
    /// Target project.
    project_id: ProjectId,
    /// Calling agent.
    agent_id: String,
    /// Optional capability filter (list or comma-delimited string).
    #[serde(default)]
    capabilities: Option<Value>,
}

/// Payload for `task.claim`.
#[derive(Debug, Deserialize)]
struct ClaimPayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Claiming agent.
    agent_id: String,
    /// Optional capability filter.
    #[serde(default)]
    capabilities: Option<Value>,
}

/// Payload for `task.heartbeat`.
#[derive(Debug, Deserialize)]
struct HeartbeatPayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Heartbeating agent.
    agent_id: String,
    /// Lease token.
    lease_token: String,
    /// Plan version the agent last observed.
    #[serde(default)]
    seen_plan_version: Option<u64>,
}

/// Payload for `task.release`.
#[derive(Debug, Deserialize)]
struct ReleasePayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Releasing agent.
    agent_id: String,
    /// Lease token.
    lease_token: String,
}

/// Payload for `task.assign`.
#[derive(Debug, Deserialize)]
struct AssignPayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Designated assignee.
    assignee: String,
    /// Optional TTL override in seconds.
    #[serde(default)]
    ttl_secs: Option<u64>,
    /// Acting identity.
    actor: String,
}

/// Payload for `task.transition`.
#[derive(Debug, Deserialize)]
struct TransitionPayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Target state wire form.
    target: String,
    /// Acting identity.
    actor: String,
    /// Reviewer for integration transitions.
    #[serde(default)]
    reviewed_by: Option<String>,
    /// Evidence references for integration transitions.
    #[serde(default)]
    evidence_refs: Vec<String>,
    /// Rationale; required in force mode.
    #[serde(default)]
    rationale: Option<String>,
    /// Bypass evidence invariants (requires the force scope).
    #[serde(default)]
    force: bool,
    /// Lease token for in-flight transitions.
    #[serde(default)]
    lease_token: Option<String>,
}

/// Payload for `artifact.create`.
#[derive(Debug, Deserialize)]
struct ArtifactCreatePayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Submitting agent.
    agent_id: String,
    /// Branch identifier.
    branch: String,
    /// Head commit identifier.
    #[serde(default)]
    commit: Option<String>,
    /// External check reference.
    #[serde(default)]
    check_ref: Option<String>,
    /// Check status wire form.
    #[serde(default = "default_check_status")]
    check_status: String,
    /// Touched paths.
    #[serde(default)]
    touched_paths: Vec<String>,
    /// Lease token while an active lease holds the task.
    #[serde(default)]
    lease_token: Option<String>,
}

/// Returns the default check status wire form.
fn default_check_status() -> String {
    "pending".to_string()
}

/// Payload for `integration.enqueue`.
#[derive(Debug, Deserialize)]
struct IntegrationEnqueuePayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Base identifier.
    base_ref: String,
    /// Head identifier.
    head_ref: String,
    /// Acting identity.
    actor: String,
}

/// Payload for `integration.update`.
#[derive(Debug, Deserialize)]
struct IntegrationUpdatePayload {
    /// Attempt identifier.
    attempt_id: AttemptId,
    /// Terminal result wire form.
    result: String,
    /// Diagnostics payload.
    #[serde(default)]
    diagnostics: Option<Value>,
    /// Acting identity.
    actor: String,
}

/// Payload for `gate.evaluate`.
#[derive(Debug, Deserialize)]
struct GateEvaluatePayload {
    /// Target project.
    project_id: ProjectId,
    /// Acting identity.
    actor: String,
}

/// Payload for `gate_decision.create`.
#[derive(Debug, Deserialize)]
struct GateDecisionPayload {
    /// Gate task reference.
    gate_task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Outcome wire form.
    outcome: String,
    /// Deciding actor.
    actor: String,
    /// Reason for the decision.
    reason: String,
    /// Evidence references.
    #[serde(default)]
    evidence_refs: Vec<String>,
}

/// Payload for `changeset.create`.
#[derive(Debug, Deserialize)]
struct ChangesetCreatePayload {
    /// Target project.
    project_id: ProjectId,
    /// Base plan version the changeset was authored against.
    base_plan_version: u64,
    /// Ordered operations.
    operations: Vec<ChangeOp>,
    /// Acting identity.
    actor: String,
}

/// Payload naming a changeset.
#[derive(Debug, Deserialize)]
struct ChangesetScopedPayload {
    /// Target changeset.
    changeset_id: ChangeSetId,
}

/// Payload for `changeset.apply`.
#[derive(Debug, Deserialize)]
struct ChangesetApplyPayload {
    /// Target changeset.
    changeset_id: ChangeSetId,
    /// Accept a lagging base version and rebase onto the current graph.
    #[serde(default)]
    allow_rebase: bool,
    /// Acting identity.
    actor: String,
}

/// Payload for `event.list`.
#[derive(Debug, Deserialize)]
struct EventListPayload {
    /// Target project.
    project_id: ProjectId,
    /// Cursor: last sequence already consumed.
    #[serde(default)]
    after_seq: u64,
    /// Page size.
    #[serde(default = "default_event_limit")]
    limit: usize,
}

/// Returns the default event page size.
const fn default_event_limit() -> usize {
    256
}

/// Payload for `api_key.create`.
#[derive(Debug, Deserialize)]
struct ApiKeyCreatePayload {
    /// Target project.
    project_id: ProjectId,
    /// Key label.
    name: String,
    /// Role scope bitmask.
    role_scopes: u32,
    /// Acting identity.
    actor: String,
}

/// Payload for `api_key.revoke`.
#[derive(Debug, Deserialize)]
struct ApiKeyRevokePayload {
    /// Target project.
    project_id: ProjectId,
    /// Key to revoke.
    api_key_id: ApiKeyId,
    /// Acting identity.
    actor: String,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `project.create`
fn op_project_create(
    state: &AppState,
    _actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ProjectCreatePayload = parse(payload)?;
    let now = state.clock.now();
    let project = state.store.with_tx(|tx| {
        state
            .coordinator
            .create_project(tx, &payload.name, &AgentId::new(payload.actor.as_str()), now)
            .map_err(ApiError::from)
    })?;
    respond(&project)
}

/// `project.list`
fn op_project_list(
    state: &AppState,
    _actor: &AuthedActor,
    _payload: Value,
) -> Result<Value, ApiError> {
    let projects =
        state.store.with_tx(|tx| tx.list_projects().map_err(ApiError::from))?;
    respond(&projects)
}

/// `project.get`
fn op_project_get(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ProjectScopedPayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let project = state.store.with_tx(|tx| {
        tx.project(payload.project_id).map_err(ApiError::from)
    })?;
    project.map_or_else(
        || {
            Err(ApiError::from(DomainError::not_found("project", payload.project_id)))
        },
        |project| respond(&project),
    )
}

/// `phase.create`
fn op_phase_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: PhaseCreatePayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let now = state.clock.now();
    let phase = state.store.with_tx(|tx| {
        state
            .coordinator
            .create_phase(tx, payload.project_id, &payload.name, &AgentId::new(payload.actor.as_str()), now)
            .map_err(ApiError::from)
    })?;
    respond(&phase)
}

/// `milestone.create`
fn op_milestone_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: MilestoneCreatePayload = parse(payload)?;
    let now = state.clock.now();
    let milestone = state.store.with_tx(|tx| {
        let phase = tx.phase(payload.phase_id)?.ok_or_else(|| {
            ApiError::from(DomainError::new(
                ErrorCode::IdentifierParentRequired,
                format!("phase not found: {}", payload.phase_id),
            ))
        })?;
        actor.ensure_project(phase.project_id)?;
        state
            .coordinator
            .create_milestone(tx, payload.phase_id, &payload.name, &AgentId::new(payload.actor.as_str()), now)
            .map_err(ApiError::from)
    })?;
    respond(&milestone)
}

/// `task.create`
fn op_task_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: TaskCreatePayload = parse(payload)?;
    let milestone_id = payload.milestone_id.ok_or_else(|| {
        ApiError::from(DomainError::new(
            ErrorCode::IdentifierParentRequired,
            "task creation requires milestone_id",
        ))
    })?;
    let task_class = payload
        .task_class
        .parse::<tascade_core::TaskClass>()
        .map_err(ApiError::from)?;
    let draft = TaskDraft {
        milestone_id,
        title: payload.title,
        description: payload.description,
        priority: payload.priority,
        task_class,
        capability_tags: payload.capability_tags,
        expected_touches: payload.expected_touches,
        exclusive_paths: payload.exclusive_paths,
        shared_paths: payload.shared_paths,
        work_spec: payload.work_spec,
    };
    let now = state.clock.now();
    let task = state.store.with_tx(|tx| {
        let milestone = tx
            .milestone(milestone_id)?
            .ok_or_else(|| {
                ApiError::from(DomainError::new(
                    ErrorCode::IdentifierParentRequired,
                    format!("milestone not found: {milestone_id}"),
                ))
            })?;
        actor.ensure_project(milestone.project_id)?;
        state
            .coordinator
            .create_task(tx, &draft, &AgentId::new(payload.actor.as_str()), now)
            .map_err(ApiError::from)
    })?;
    respond(&task)
}

/// `task.get`
fn op_task_get(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: TaskScopedPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let task = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        Ok::<_, ApiError>(task)
    })?;
    respond(&task)
}

/// `task.list`
fn op_task_list(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ProjectScopedPayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let tasks = state
        .store
        .with_tx(|tx| tx.list_tasks(payload.project_id).map_err(ApiError::from))?;
    respond(&tasks)
}

/// `dependency.create`
fn op_dependency_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: DependencyCreatePayload = parse(payload)?;
    let scope = payload.project_id.or(actor.project_id);
    let from = task_ref(&payload.from, scope)?;
    let to = task_ref(&payload.to, scope)?;
    let unlock_on = payload.unlock_on.parse::<UnlockOn>().map_err(ApiError::from)?;
    let now = state.clock.now();
    let edge = state.store.with_tx(|tx| {
        let from_task = state.coordinator.resolve_task(tx, &from)?;
        actor.ensure_project(from_task.project_id)?;
        state
            .coordinator
            .create_dependency(tx, &from, &to, unlock_on, &AgentId::new(payload.actor.as_str()), now)
            .map_err(ApiError::from)
    })?;
    respond(&edge)
}

/// `dependency.list`
fn op_dependency_list(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ProjectScopedPayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let edges = state
        .store
        .with_tx(|tx| tx.list_edges(payload.project_id).map_err(ApiError::from))?;
    respond(&edges)
}

/// `task.context`
fn op_task_context(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: TaskContextPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let context = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state
            .coordinator
            .get_task_context(tx, &reference, payload.ancestor_depth, payload.dependent_depth)
            .map_err(ApiError::from)
    })?;
    respond(&context)
}

/// `task.ready`
fn op_task_ready(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ReadyPayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let capabilities = capability_filter(payload.capabilities)?;
    let entries = state.store.with_tx(|tx| {
        state
            .coordinator
            .list_ready_tasks(
                tx,
                payload.project_id,
                &AgentId::new(payload.agent_id.as_str()),
                capabilities.as_ref(),
            )
            .map_err(ApiError::from)
    })?;
    respond(&entries)
}

/// `task.claim`
fn op_task_claim(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ClaimPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let capabilities = capability_filter(payload.capabilities)?;
    let request = ClaimRequest {
        task: reference.clone(),
        agent_id: AgentId::new(payload.agent_id.as_str()),
        capabilities,
        token: fresh_lease_token(),
        now: state.clock.now(),
    };
    let result = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state.coordinator.claim_task(tx, &request).map_err(ApiError::from)
    })?;
    respond(&result)
}

/// `task.heartbeat`
fn op_task_heartbeat(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: HeartbeatPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let request = HeartbeatRequest {
        task: reference.clone(),
        agent_id: AgentId::new(payload.agent_id.as_str()),
        token: LeaseToken::new(payload.lease_token),
        seen_plan_version: payload.seen_plan_version.map(PlanVersion::new),
        now: state.clock.now(),
    };
    let result = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state.coordinator.heartbeat(tx, &request).map_err(ApiError::from)
    })?;
    respond(&result)
}

/// `task.release`
fn op_task_release(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ReleasePayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let now = state.clock.now();
    let task = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state
            .coordinator
            .release_lease(
                tx,
                &reference,
                &AgentId::new(payload.agent_id.as_str()),
                &LeaseToken::new(payload.lease_token),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&task)
}

/// `task.assign`
fn op_task_assign(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: AssignPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let now = state.clock.now();
    let reservation = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state
            .coordinator
            .assign_task(
                tx,
                &reference,
                &AgentId::new(payload.assignee.as_str()),
                payload.ttl_secs,
                &AgentId::new(payload.actor.as_str()),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&reservation)
}

/// `task.transition`
fn op_task_transition(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: TransitionPayload = parse(payload)?;
    if payload.force {
        actor.require(RoleScopes::FORCE)?;
    }
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let target = payload.target.parse::<TaskState>().map_err(ApiError::from)?;
    let request = TransitionRequest {
        target,
        actor: AgentId::new(payload.actor.as_str()),
        reviewed_by: payload.reviewed_by.map(AgentId::new),
        evidence_refs: payload.evidence_refs,
        rationale: payload.rationale,
        force: payload.force,
    };
    let lease_token = payload.lease_token.map(LeaseToken::new);
    let now = state.clock.now();
    let task = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state
            .coordinator
            .transition_task(tx, &reference, &request, lease_token.as_ref(), now)
            .map_err(ApiError::from)
    })?;
    respond(&task)
}

/// `artifact.create`
fn op_artifact_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ArtifactCreatePayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let check_status = match payload.check_status.as_str() {
        "pending" => CheckStatus::Pending,
        "passed" => CheckStatus::Passed,
        "failed" => CheckStatus::Failed,
        other => {
            return Err(ApiError::bad_request(format!("unknown check status: {other}")));
        }
    };
    let draft = ArtifactDraft {
        task: reference.clone(),
        agent_id: AgentId::new(payload.agent_id.as_str()),
        branch: payload.branch,
        commit: payload.commit,
        check_ref: payload.check_ref,
        check_status,
        touched_paths: payload.touched_paths,
        lease_token: payload.lease_token.map(LeaseToken::new),
        now: state.clock.now(),
    };
    let artifact = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state.coordinator.record_artifact(tx, &draft).map_err(ApiError::from)
    })?;
    respond(&artifact)
}

/// `artifact.list`
fn op_artifact_list(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: TaskScopedPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let artifacts = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        tx.list_artifacts(task.id).map_err(ApiError::from)
    })?;
    respond(&artifacts)
}

/// `integration.enqueue`
fn op_integration_enqueue(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: IntegrationEnqueuePayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let now = state.clock.now();
    let attempt = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state
            .coordinator
            .enqueue_integration(
                tx,
                &reference,
                &payload.base_ref,
                &payload.head_ref,
                &AgentId::new(payload.actor.as_str()),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&attempt)
}

/// `integration.update`
fn op_integration_update(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: IntegrationUpdatePayload = parse(payload)?;
    let result = match payload.result.as_str() {
        "success" => IntegrationResult::Success,
        "conflict" => IntegrationResult::Conflict,
        "failed_checks" => IntegrationResult::FailedChecks,
        other => {
            return Err(ApiError::bad_request(format!("unknown attempt result: {other}")));
        }
    };
    let now = state.clock.now();
    let attempt = state.store.with_tx(|tx| {
        let attempt = tx.attempt(payload.attempt_id)?.ok_or_else(|| {
            ApiError::from(DomainError::not_found("integration attempt", payload.attempt_id))
        })?;
        let task = state
            .coordinator
            .resolve_task(tx, &TaskRef::by_id(attempt.task_id))?;
        actor.ensure_project(task.project_id)?;
        state
            .coordinator
            .complete_integration(
                tx,
                payload.attempt_id,
                result,
                payload.diagnostics,
                &AgentId::new(payload.actor.as_str()),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&attempt)
}

/// `integration.list`
fn op_integration_list(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: TaskScopedPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let attempts = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        tx.list_attempts(task.id).map_err(ApiError::from)
    })?;
    respond(&attempts)
}

/// `gate_rule.create`
fn op_gate_rule_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let draft: GateRuleDraft = parse(payload)?;
    actor.ensure_project(draft.project_id)?;
    let now = state.clock.now();
    let rule = state.store.with_tx(|tx| {
        state
            .coordinator
            .create_gate_rule(tx, &draft, &AgentId::new(actor.subject.as_str()), now)
            .map_err(ApiError::from)
    })?;
    respond(&rule)
}

/// `gate.evaluate`
fn op_gate_evaluate(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: GateEvaluatePayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let now = state.clock.now();
    let generated = state.store.with_tx(|tx| {
        state
            .coordinator
            .evaluate_gate_rules(tx, payload.project_id, &AgentId::new(payload.actor.as_str()), now)
            .map_err(ApiError::from)
    })?;
    respond(&json!({ "generated_gate_tasks": generated }))
}

/// `gate_decision.create`
fn op_gate_decision_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: GateDecisionPayload = parse(payload)?;
    let reference = task_ref(&payload.gate_task, payload.project_id.or(actor.project_id))?;
    let outcome = match payload.outcome.as_str() {
        "approved" => GateOutcome::Approved,
        "rejected" => GateOutcome::Rejected,
        "approved_with_risk" => GateOutcome::ApprovedWithRisk,
        other => {
            return Err(ApiError::bad_request(format!("unknown gate outcome: {other}")));
        }
    };
    let draft = GateDecisionDraft {
        gate_task: reference.clone(),
        outcome,
        actor: AgentId::new(payload.actor.as_str()),
        reason: payload.reason,
        evidence_refs: payload.evidence_refs,
        now: state.clock.now(),
    };
    let decision = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state.coordinator.record_gate_decision(tx, &draft).map_err(ApiError::from)
    })?;
    respond(&decision)
}

/// `changeset.create`
fn op_changeset_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ChangesetCreatePayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let now = state.clock.now();
    let changeset = state.store.with_tx(|tx| {
        state
            .coordinator
            .create_changeset(
                tx,
                payload.project_id,
                PlanVersion::new(payload.base_plan_version),
                payload.operations,
                &AgentId::new(payload.actor.as_str()),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&changeset)
}

/// `changeset.validate`
fn op_changeset_validate(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ChangesetScopedPayload = parse(payload)?;
    let impact = state.store.with_tx(|tx| {
        let changeset = tx.changeset(payload.changeset_id)?.ok_or_else(|| {
            ApiError::from(DomainError::not_found("changeset", payload.changeset_id))
        })?;
        actor.ensure_project(changeset.project_id)?;
        state
            .coordinator
            .validate_changeset_by_id(tx, payload.changeset_id)
            .map_err(ApiError::from)
    })?;
    respond(&impact)
}

/// `changeset.apply`
fn op_changeset_apply(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ChangesetApplyPayload = parse(payload)?;
    let now = state.clock.now();
    let result = state.store.with_tx(|tx| {
        let changeset = tx.changeset(payload.changeset_id)?.ok_or_else(|| {
            ApiError::from(DomainError::not_found("changeset", payload.changeset_id))
        })?;
        actor.ensure_project(changeset.project_id)?;
        state
            .coordinator
            .apply_changeset(
                tx,
                payload.changeset_id,
                payload.allow_rebase,
                &AgentId::new(payload.actor.as_str()),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&result)
}

/// Payload for `changelog.note`.
#[derive(Debug, Deserialize)]
struct ChangelogNotePayload {
    /// Task reference.
    task: String,
    /// Optional project scope for short-id resolution.
    #[serde(default)]
    project_id: Option<ProjectId>,
    /// Note author.
    author: String,
    /// Note body.
    body: String,
    /// Artifact references attached to the note.
    #[serde(default)]
    artifact_refs: Vec<tascade_core::ArtifactId>,
}

/// `changelog.note`
fn op_changelog_note(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ChangelogNotePayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let now = state.clock.now();
    let entry = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state
            .coordinator
            .add_changelog_note(
                tx,
                &reference,
                &AgentId::new(payload.author.as_str()),
                &payload.body,
                payload.artifact_refs.clone(),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&entry)
}

/// `changelog.list`
fn op_changelog_list(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: TaskScopedPayload = parse(payload)?;
    let reference = task_ref(&payload.task, payload.project_id.or(actor.project_id))?;
    let entries = state.store.with_tx(|tx| {
        let task = state.coordinator.resolve_task(tx, &reference)?;
        actor.ensure_project(task.project_id)?;
        state.coordinator.list_changelog(tx, &reference).map_err(ApiError::from)
    })?;
    respond(&entries)
}

/// `event.list`
fn op_event_list(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: EventListPayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let events = state.store.with_tx(|tx| {
        state
            .coordinator
            .read_events(tx, payload.project_id, EventSeq::new(payload.after_seq), payload.limit)
            .map_err(ApiError::from)
    })?;
    respond(&events)
}

/// `api_key.create`: returns the record plus the raw key, shown exactly
/// once.
fn op_api_key_create(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ApiKeyCreatePayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let raw_key = fresh_api_key();
    let fingerprint = key_fingerprint(&raw_key);
    let now = state.clock.now();
    let key = state.store.with_tx(|tx| {
        state
            .coordinator
            .create_api_key(
                tx,
                payload.project_id,
                &payload.name,
                &fingerprint,
                RoleScopes::from_bits(payload.role_scopes),
                &AgentId::new(payload.actor.as_str()),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&json!({ "key": key, "raw_key": raw_key }))
}

/// `api_key.revoke`
fn op_api_key_revoke(
    state: &AppState,
    actor: &AuthedActor,
    payload: Value,
) -> Result<Value, ApiError> {
    let payload: ApiKeyRevokePayload = parse(payload)?;
    actor.ensure_project(payload.project_id)?;
    let now = state.clock.now();
    let key = state.store.with_tx(|tx| {
        state
            .coordinator
            .revoke_api_key(
                tx,
                payload.project_id,
                payload.api_key_id,
                &AgentId::new(payload.actor.as_str()),
                now,
            )
            .map_err(ApiError::from)
    })?;
    respond(&key)
}
