// crates/tascade-server/tests/registry_dispatch.rs
// ============================================================================
// Module: Registry Dispatch Tests
// Description: Operation table dispatch, scope gating, and error mapping.
// ============================================================================
//! ## Overview
//! Drives kernel operations through the shared operation table exactly as
//! the REST and tool surfaces do, over a tempfile-backed SQLite store.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tascade_config::TascadeConfig;
use tascade_core::ErrorCode;
use tascade_core::RoleScopes;
use tascade_server::AppState;
use tascade_server::AuthedActor;
use tascade_server::FixedClock;
use tascade_server::OperationRegistry;
use tascade_server::error::status_for;
use tascade_store_sqlite::SqliteStore;
use tascade_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

/// Test harness: registry + state over a fresh database.
struct Harness {
    /// Keeps the database directory alive.
    _dir: TempDir,
    /// Application state.
    state: AppState,
    /// Operation table.
    registry: OperationRegistry,
}

/// Builds a fresh harness with a fixed clock.
fn harness() -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteStore::open(&SqliteStoreConfig::for_path(dir.path().join("t.db")))
        .expect("open");
    let mut config = TascadeConfig::default();
    config.server.auth_disabled = true;
    let state = AppState::new(
        config,
        store,
        Arc::new(FixedClock(tascade_core::Timestamp::from_unix_millis(1_000))),
    );
    Harness {
        _dir: dir,
        state,
        registry: OperationRegistry::new(),
    }
}

impl Harness {
    /// Dispatches as the unscoped (auth-disabled) actor.
    fn call(&self, operation: &str, payload: Value) -> Result<Value, tascade_server::ApiError> {
        self.registry.dispatch(
            &self.state,
            &AuthedActor::unscoped(),
            operation,
            payload,
        )
    }

    /// Dispatches and unwraps the success value.
    fn ok(&self, operation: &str, payload: Value) -> Value {
        self.call(operation, payload).expect(operation)
    }

    /// Seeds project/phase/milestone and returns their ids.
    fn seed(&self) -> (u64, u64, u64) {
        let project = self.ok("project.create", json!({ "name": "api", "actor": "planner" }));
        let project_id = project["id"].as_u64().expect("project id");
        let phase = self.ok(
            "phase.create",
            json!({ "project_id": project_id, "name": "core", "actor": "planner" }),
        );
        let phase_id = phase["id"].as_u64().expect("phase id");
        let milestone = self.ok(
            "milestone.create",
            json!({ "phase_id": phase_id, "name": "kernel", "actor": "planner" }),
        );
        (project_id, phase_id, milestone["id"].as_u64().expect("milestone id"))
    }

    /// Creates a task and returns its payload.
    fn create_task(&self, milestone_id: u64, title: &str) -> Value {
        self.ok(
            "task.create",
            json!({
                "milestone_id": milestone_id,
                "title": title,
                "task_class": "backend",
                "work_spec": { "objective": format!("build {title}") },
                "actor": "planner",
            }),
        )
    }
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Tests the REST-shaped payloads drive a full create-claim cycle through
/// the table.
#[test]
fn test_table_drives_claim_cycle() {
    let harness = harness();
    let (project_id, _, milestone_id) = harness.seed();
    let task = harness.create_task(milestone_id, "kernel work");
    assert_eq!(task["short_id"], json!("P1.M1.T1"));
    assert_eq!(task["state"], json!("ready"));

    let ready = harness.ok(
        "task.ready",
        json!({ "project_id": project_id, "agent_id": "alice" }),
    );
    assert_eq!(ready.as_array().map(Vec::len), Some(1));

    let claim = harness.ok(
        "task.claim",
        json!({ "task": "P1.M1.T1", "project_id": project_id, "agent_id": "alice" }),
    );
    assert_eq!(claim["task"]["state"], json!("claimed"));
    assert!(claim["lease"]["token"].as_str().is_some());
    assert_eq!(claim["lease"]["fencing"], json!(1));
}

/// Tests unknown operations fail with `NOT_FOUND`.
#[test]
fn test_unknown_operation() {
    let harness = harness();
    let error = harness.call("task.frobnicate", json!({})).expect_err("unknown");
    assert_eq!(error.body.code, "NOT_FOUND");
}

/// Tests malformed payloads fail closed as bad requests.
#[test]
fn test_malformed_payload() {
    let harness = harness();
    let error = harness
        .call("project.create", json!({ "unexpected": true }))
        .expect_err("malformed");
    assert_eq!(error.status.as_u16(), 400);
}

/// Tests task creation without a milestone fails with the parent code.
#[test]
fn test_task_requires_parent() {
    let harness = harness();
    harness.seed();
    let error = harness
        .call(
            "task.create",
            json!({
                "title": "orphan",
                "task_class": "backend",
                "work_spec": { "objective": "float" },
                "actor": "planner",
            }),
        )
        .expect_err("orphan task");
    assert_eq!(error.body.code, "IDENTIFIER_PARENT_REQUIRED");
}

/// Tests a malformed capability filter maps to the stable code.
#[test]
fn test_invalid_capabilities_code() {
    let harness = harness();
    let (project_id, _, _) = harness.seed();
    let error = harness
        .call(
            "task.ready",
            json!({
                "project_id": project_id,
                "agent_id": "alice",
                "capabilities": { "bad": "shape" },
            }),
        )
        .expect_err("bad capabilities");
    assert_eq!(error.body.code, "INVALID_CAPABILITIES");
}

// ============================================================================
// SECTION: Scope Gating
// ============================================================================

/// Tests role scopes gate operations before handlers run.
#[test]
fn test_scope_gating() {
    let harness = harness();
    let agent_only = AuthedActor {
        project_id: None,
        scopes: RoleScopes::AGENT,
        subject: "agent-key".to_string(),
    };
    let denied = harness
        .registry
        .dispatch(
            &harness.state,
            &agent_only,
            "project.create",
            json!({ "name": "nope", "actor": "alice" }),
        )
        .expect_err("planner-only");
    assert_eq!(denied.body.code, "AUTH_DENIED");
}

/// Tests forced transitions require the force scope even with others
/// granted.
#[test]
fn test_force_requires_force_scope() {
    let harness = harness();
    let (project_id, _, milestone_id) = harness.seed();
    harness.create_task(milestone_id, "guarded");
    let agent_only = AuthedActor {
        project_id: None,
        scopes: RoleScopes::AGENT,
        subject: "agent-key".to_string(),
    };
    let denied = harness
        .registry
        .dispatch(
            &harness.state,
            &agent_only,
            "task.transition",
            json!({
                "task": "P1.M1.T1",
                "project_id": project_id,
                "target": "cancelled",
                "actor": "alice",
                "force": true,
                "rationale": "trying to skip review",
            }),
        )
        .expect_err("force scope required");
    assert_eq!(denied.body.code, "AUTH_DENIED");
}

/// Tests minted keys authenticate until revoked, and never afterwards.
#[test]
fn test_key_lifecycle_authentication() {
    let harness = harness();
    let (project_id, _, _) = harness.seed();
    let minted = harness.ok(
        "api_key.create",
        json!({
            "project_id": project_id,
            "name": "worker",
            "role_scopes": 2,
            "actor": "operator",
        }),
    );
    let raw_key = minted["raw_key"].as_str().expect("raw key").to_string();
    let key_id = minted["key"]["id"].as_u64().expect("key id");

    let actor = harness
        .state
        .store
        .with_tx(|tx| tascade_server::auth::authenticate(tx, &raw_key))
        .expect("active key authenticates");
    assert_eq!(actor.subject, "worker");
    assert!(actor.scopes.grants(RoleScopes::AGENT));

    harness.ok(
        "api_key.revoke",
        json!({ "project_id": project_id, "api_key_id": key_id, "actor": "operator" }),
    );
    let denied = harness
        .state
        .store
        .with_tx(|tx| tascade_server::auth::authenticate(tx, &raw_key))
        .expect_err("revoked key must not authenticate");
    assert_eq!(denied.code(), Some(ErrorCode::AuthDenied));

    let unknown = harness
        .state
        .store
        .with_tx(|tx| tascade_server::auth::authenticate(tx, "tsc_never_minted"))
        .expect_err("unknown key must not authenticate");
    assert_eq!(unknown.code(), Some(ErrorCode::AuthDenied));
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Tests the deterministic domain-code to HTTP-status mapping.
#[test]
fn test_status_mapping() {
    assert_eq!(status_for(ErrorCode::InvariantViolation).as_u16(), 422);
    assert_eq!(status_for(ErrorCode::DependencyCycle).as_u16(), 409);
    assert_eq!(status_for(ErrorCode::PlanStale).as_u16(), 409);
    assert_eq!(status_for(ErrorCode::LeaseFenced).as_u16(), 412);
    assert_eq!(status_for(ErrorCode::LeaseStale).as_u16(), 412);
    assert_eq!(status_for(ErrorCode::AuthDenied).as_u16(), 403);
    assert_eq!(status_for(ErrorCode::NotFound).as_u16(), 404);
    assert_eq!(status_for(ErrorCode::AmbiguousReference).as_u16(), 400);
}

/// Tests a cycle surfaced through the table carries its code.
#[test]
fn test_cycle_code_through_table() {
    let harness = harness();
    let (project_id, _, milestone_id) = harness.seed();
    harness.create_task(milestone_id, "a");
    harness.create_task(milestone_id, "b");
    harness.ok(
        "dependency.create",
        json!({
            "from": "P1.M1.T1",
            "to": "P1.M1.T2",
            "unlock_on": "implemented",
            "project_id": project_id,
            "actor": "planner",
        }),
    );
    let error = harness
        .call(
            "dependency.create",
            json!({
                "from": "P1.M1.T2",
                "to": "P1.M1.T1",
                "unlock_on": "implemented",
                "project_id": project_id,
                "actor": "planner",
            }),
        )
        .expect_err("cycle");
    assert_eq!(error.body.code, "DEPENDENCY_CYCLE");
    assert_eq!(error.status.as_u16(), 409);
}
