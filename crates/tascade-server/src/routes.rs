// crates/tascade-server/src/routes.rs
// ============================================================================
// Module: REST Routes
// Description: Axum router wiring the canonical /v1 surface to the registry.
// Purpose: Serve the REST and tool-call surfaces over one dispatch path.
// Dependencies: axum, serde_json, tascade-core, tokio
// ============================================================================

//! ## Overview
//! Every REST endpoint assembles an operation payload from its path, query,
//! and body, then dispatches through the shared operation registry. The
//! tool-call surface (`/v1/tools`, `/v1/tools/call`) is the same table
//! exposed by name, so the two surfaces cannot drift.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthAuditEvent;
use crate::auth::AuthAuditSink;
use crate::auth::AuthedActor;
use crate::auth::authenticate;
use crate::auth::parse_bearer;
use crate::error::ApiError;
use crate::registry::OperationRegistry;
use crate::state::AppState;

// ============================================================================
// SECTION: Server Context
// ============================================================================

/// Shared context handed to every route handler.
pub struct ServerContext {
    /// Application state.
    pub app: AppState,
    /// Operation table.
    pub registry: OperationRegistry,
    /// Audit sink for auth decisions.
    pub audit: Arc<dyn AuthAuditSink>,
}

/// Handle type used by axum state extraction.
pub type SharedContext = Arc<ServerContext>;

/// Server startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound or served.
    #[error("server io error: {0}")]
    Io(String),
}

/// Query parameter map extracted from GET endpoints.
type Params = BTreeMap<String, String>;

/// Optional JSON body extracted from POST endpoints.
type Body = Option<Json<Value>>;

/// Uniform handler result.
type Reply = Result<Json<Value>, ApiError>;

// ============================================================================
// SECTION: Dispatch Helpers
// ============================================================================

/// Authenticates a request and audits the decision.
fn authorize(
    ctx: &ServerContext,
    headers: &HeaderMap,
    operation: &str,
) -> Result<AuthedActor, ApiError> {
    if ctx.app.config.server.auth_disabled {
        return Ok(AuthedActor::unscoped());
    }
    let header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    let outcome = parse_bearer(header).and_then(|token| {
        ctx.app
            .store
            .with_tx(|tx| authenticate(tx, &token))
            .map_err(ApiError::from)
    });
    match outcome {
        Ok(actor) => {
            ctx.audit.record(&AuthAuditEvent::allowed(operation, &actor));
            Ok(actor)
        }
        Err(error) => {
            ctx.audit.record(&AuthAuditEvent::denied(operation, &error.body.message));
            Err(error)
        }
    }
}

/// Runs one operation end to end.
fn dispatch(
    ctx: &ServerContext,
    headers: &HeaderMap,
    operation: &str,
    payload: Value,
) -> Reply {
    let actor = authorize(ctx, headers, operation)?;
    ctx.registry.dispatch(&ctx.app, &actor, operation, payload).map(Json)
}

/// Converts query parameters into an operation payload, coercing integers
/// and booleans so typed payloads deserialize.
fn query_payload(params: &Params) -> Value {
    let mut object = serde_json::Map::new();
    for (key, raw) in params {
        let value = if let Ok(number) = raw.parse::<u64>() {
            Value::from(number)
        } else {
            match raw.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(raw.clone()),
            }
        };
        object.insert(key.clone(), value);
    }
    Value::Object(object)
}

/// Inserts one field into a payload object, coercing decimal strings.
fn merge_field(payload: &mut Value, key: &str, raw: &str) {
    let value = raw
        .parse::<u64>()
        .map_or_else(|_| Value::String(raw.to_string()), Value::from);
    if let Value::Object(object) = payload {
        object.insert(key.to_string(), value);
    }
}

/// Normalizes an optional JSON body into an object payload.
fn body_payload(body: Body) -> Value {
    match body {
        Some(Json(Value::Object(object))) => Value::Object(object),
        Some(Json(Value::Null)) | None => json!({}),
        Some(Json(other)) => other,
    }
}

/// Dispatches a collection-level POST endpoint.
fn collection_post(
    ctx: &ServerContext,
    headers: &HeaderMap,
    operation: &str,
    body: Body,
) -> Reply {
    dispatch(ctx, headers, operation, body_payload(body))
}

/// Dispatches a collection-level GET endpoint.
fn collection_get(
    ctx: &ServerContext,
    headers: &HeaderMap,
    operation: &str,
    params: &Params,
) -> Reply {
    dispatch(ctx, headers, operation, query_payload(params))
}

/// Dispatches an id-scoped POST endpoint.
fn id_post(
    ctx: &ServerContext,
    headers: &HeaderMap,
    operation: &str,
    key: &str,
    id: &str,
    body: Body,
) -> Reply {
    let mut payload = body_payload(body);
    merge_field(&mut payload, key, id);
    dispatch(ctx, headers, operation, payload)
}

/// Dispatches an id-scoped GET endpoint.
fn id_get(
    ctx: &ServerContext,
    headers: &HeaderMap,
    operation: &str,
    key: &str,
    id: &str,
    params: &Params,
) -> Reply {
    let mut payload = query_payload(params);
    merge_field(&mut payload, key, id);
    dispatch(ctx, headers, operation, payload)
}

// ============================================================================
// SECTION: Fixed Handlers
// ============================================================================

/// Liveness probe.
async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Lists the operation table.
async fn tools_list(State(ctx): State<SharedContext>) -> Json<Value> {
    Json(json!({ "operations": ctx.registry.list() }))
}

/// Tool-call surface: `{ "operation": ..., "payload": ... }`.
async fn tools_call(
    State(ctx): State<SharedContext>,
    headers: HeaderMap,
    body: Body,
) -> Reply {
    let body = body_payload(body);
    let operation = body
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("missing operation name"))?
        .to_string();
    let payload = body.get("payload").cloned().unwrap_or_else(|| json!({}));
    dispatch(&ctx, &headers, &operation, payload)
}

// ============================================================================
// SECTION: REST Handlers
// ============================================================================

/// Declares a collection-level POST handler bound to one operation.
macro_rules! post_handler {
    ($(#[$doc:meta])* $name:ident, $operation:literal) => {
        $(#[$doc])*
        async fn $name(
            State(ctx): State<SharedContext>,
            headers: HeaderMap,
            body: Body,
        ) -> Reply {
            collection_post(&ctx, &headers, $operation, body)
        }
    };
}

/// Declares a collection-level GET handler bound to one operation.
macro_rules! get_handler {
    ($(#[$doc:meta])* $name:ident, $operation:literal) => {
        $(#[$doc])*
        async fn $name(
            State(ctx): State<SharedContext>,
            headers: HeaderMap,
            Query(params): Query<Params>,
        ) -> Reply {
            collection_get(&ctx, &headers, $operation, &params)
        }
    };
}

/// Declares an id-scoped POST handler bound to one operation.
macro_rules! post_id_handler {
    ($(#[$doc:meta])* $name:ident, $operation:literal, $key:literal) => {
        $(#[$doc])*
        async fn $name(
            State(ctx): State<SharedContext>,
            Path(id): Path<String>,
            headers: HeaderMap,
            body: Body,
        ) -> Reply {
            id_post(&ctx, &headers, $operation, $key, &id, body)
        }
    };
}

/// Declares an id-scoped GET handler bound to one operation.
macro_rules! get_id_handler {
    ($(#[$doc:meta])* $name:ident, $operation:literal, $key:literal) => {
        $(#[$doc])*
        async fn $name(
            State(ctx): State<SharedContext>,
            Path(id): Path<String>,
            headers: HeaderMap,
            Query(params): Query<Params>,
        ) -> Reply {
            id_get(&ctx, &headers, $operation, $key, &id, &params)
        }
    };
}

post_handler!(
    /// `POST /v1/projects`
    create_project,
    "project.create"
);
get_handler!(
    /// `GET /v1/projects`
    list_projects,
    "project.list"
);
get_id_handler!(
    /// `GET /v1/projects/{id}`
    get_project,
    "project.get",
    "project_id"
);
post_handler!(
    /// `POST /v1/phases`
    create_phase,
    "phase.create"
);
post_handler!(
    /// `POST /v1/milestones`
    create_milestone,
    "milestone.create"
);
post_handler!(
    /// `POST /v1/tasks`
    create_task,
    "task.create"
);
get_handler!(
    /// `GET /v1/tasks`
    list_tasks,
    "task.list"
);
get_handler!(
    /// `GET /v1/tasks/ready`
    list_ready,
    "task.ready"
);
get_id_handler!(
    /// `GET /v1/tasks/{id}`
    get_task,
    "task.get",
    "task"
);
get_id_handler!(
    /// `GET /v1/tasks/{id}/context`
    get_task_context,
    "task.context",
    "task"
);
post_id_handler!(
    /// `POST /v1/tasks/{id}/claim`
    claim_task,
    "task.claim",
    "task"
);
post_id_handler!(
    /// `POST /v1/tasks/{id}/heartbeat`
    heartbeat_task,
    "task.heartbeat",
    "task"
);
post_id_handler!(
    /// `POST /v1/tasks/{id}/release`
    release_task,
    "task.release",
    "task"
);
post_id_handler!(
    /// `POST /v1/tasks/{id}/assign`
    assign_task,
    "task.assign",
    "task"
);
post_id_handler!(
    /// `POST /v1/tasks/{id}/state`
    transition_task,
    "task.transition",
    "task"
);
post_id_handler!(
    /// `POST /v1/tasks/{id}/artifacts`
    create_artifact,
    "artifact.create",
    "task"
);
get_id_handler!(
    /// `GET /v1/tasks/{id}/artifacts`
    list_artifacts,
    "artifact.list",
    "task"
);
post_handler!(
    /// `POST /v1/dependencies`
    create_dependency,
    "dependency.create"
);
get_handler!(
    /// `GET /v1/dependencies`
    list_dependencies,
    "dependency.list"
);
post_handler!(
    /// `POST /v1/integration-attempts`
    enqueue_integration,
    "integration.enqueue"
);
get_handler!(
    /// `GET /v1/integration-attempts`
    list_integration,
    "integration.list"
);
post_id_handler!(
    /// `POST /v1/integration-attempts/{id}/result`
    update_integration,
    "integration.update",
    "attempt_id"
);
post_handler!(
    /// `POST /v1/gate-rules`
    create_gate_rule,
    "gate_rule.create"
);
post_handler!(
    /// `POST /v1/gates/evaluate`
    evaluate_gates,
    "gate.evaluate"
);
post_handler!(
    /// `POST /v1/gate-decisions`
    create_gate_decision,
    "gate_decision.create"
);
post_handler!(
    /// `POST /v1/plans/changesets`
    create_changeset,
    "changeset.create"
);
post_id_handler!(
    /// `POST /v1/plans/changesets/{id}/validate`
    validate_changeset,
    "changeset.validate",
    "changeset_id"
);
post_id_handler!(
    /// `POST /v1/plans/changesets/{id}/apply`
    apply_changeset,
    "changeset.apply",
    "changeset_id"
);
post_id_handler!(
    /// `POST /v1/tasks/{id}/changelog`
    add_changelog_note,
    "changelog.note",
    "task"
);
get_id_handler!(
    /// `GET /v1/tasks/{id}/changelog`
    list_changelog,
    "changelog.list",
    "task"
);
get_handler!(
    /// `GET /v1/events`
    list_events,
    "event.list"
);
post_handler!(
    /// `POST /v1/api-keys`
    create_api_key,
    "api_key.create"
);
post_id_handler!(
    /// `POST /v1/api-keys/{id}/revoke`
    revoke_api_key,
    "api_key.revoke",
    "api_key_id"
);

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full `/v1` router.
#[must_use]
pub fn build_router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/tools", get(tools_list))
        .route("/v1/tools/call", post(tools_call))
        .route("/v1/projects", post(create_project).get(list_projects))
        .route("/v1/projects/{id}", get(get_project))
        .route("/v1/phases", post(create_phase))
        .route("/v1/milestones", post(create_milestone))
        .route("/v1/tasks", post(create_task).get(list_tasks))
        .route("/v1/tasks/ready", get(list_ready))
        .route("/v1/tasks/{id}", get(get_task))
        .route("/v1/tasks/{id}/context", get(get_task_context))
        .route("/v1/tasks/{id}/claim", post(claim_task))
        .route("/v1/tasks/{id}/heartbeat", post(heartbeat_task))
        .route("/v1/tasks/{id}/release", post(release_task))
        .route("/v1/tasks/{id}/assign", post(assign_task))
        .route("/v1/tasks/{id}/state", post(transition_task))
        .route("/v1/tasks/{id}/artifacts", post(create_artifact).get(list_artifacts))
        .route(
            "/v1/tasks/{id}/changelog",
            post(add_changelog_note).get(list_changelog),
        )
        .route("/v1/dependencies", post(create_dependency).get(list_dependencies))
        .route(
            "/v1/integration-attempts",
            post(enqueue_integration).get(list_integration),
        )
        .route("/v1/integration-attempts/{id}/result", post(update_integration))
        .route("/v1/gate-rules", post(create_gate_rule))
        .route("/v1/gates/evaluate", post(evaluate_gates))
        .route("/v1/gate-decisions", post(create_gate_decision))
        .route("/v1/plans/changesets", post(create_changeset))
        .route("/v1/plans/changesets/{id}/validate", post(validate_changeset))
        .route("/v1/plans/changesets/{id}/apply", post(apply_changeset))
        .route("/v1/events", get(list_events))
        .route("/v1/api-keys", post(create_api_key))
        .route("/v1/api-keys/{id}/revoke", post(revoke_api_key))
        .with_state(ctx)
}

/// Binds the configured address and serves until shutdown.
///
/// # Errors
///
/// Returns [`ServerError::Io`] when binding or serving fails.
pub async fn serve(ctx: SharedContext, addr: SocketAddr) -> Result<(), ServerError> {
    let app = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ServerError::Io(err.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|err| ServerError::Io(err.to_string()))
}
