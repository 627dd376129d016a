// crates/tascade-server/src/auth.rs
// ============================================================================
// Module: Server Authn/Authz
// Description: Bearer-key authentication with project and role scoping.
// Purpose: Provide strict, fail-closed auth for every kernel operation.
// Dependencies: tascade-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Requests authenticate with `Authorization: Bearer <key>`. The store holds
//! only sha-256 fingerprints; lookup is by fingerprint, so raw keys never
//! rest anywhere. Keys carry a project scope and a role-scope bitmask;
//! cross-project access and role-insufficient calls fail closed with the
//! stable `AUTH_DENIED` code. Every decision emits a JSON-line audit event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use tascade_core::ApiKeyStatus;
use tascade_core::CoordinatorError;
use tascade_core::KernelTx;
use tascade_core::ProjectId;
use tascade_core::RoleScopes;
use tascade_core::hashing::hash_bytes;

use crate::error::ApiError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upper bound on accepted authorization header length.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Authenticated Actor
// ============================================================================

/// Authorization context attached to one request.
///
/// # Invariants
/// - With auth disabled, the actor is unscoped and grants every role.
#[derive(Debug, Clone)]
pub struct AuthedActor {
    /// Project the key is scoped to; `None` only with auth disabled.
    pub project_id: Option<ProjectId>,
    /// Granted role scopes.
    pub scopes: RoleScopes,
    /// Key label used for audit events.
    pub subject: String,
}

impl AuthedActor {
    /// Builds the unscoped actor used when authentication is disabled.
    #[must_use]
    pub fn unscoped() -> Self {
        Self {
            project_id: None,
            scopes: RoleScopes::all(),
            subject: "auth-disabled".to_string(),
        }
    }

    /// Fails closed unless the actor's key grants every required scope.
    ///
    /// # Errors
    ///
    /// Returns `AUTH_DENIED` on missing scopes.
    pub fn require(&self, required: RoleScopes) -> Result<(), ApiError> {
        if self.scopes.grants(required) {
            Ok(())
        } else {
            Err(ApiError::auth_denied("key lacks the required role scope"))
        }
    }

    /// Fails closed unless the actor's key is scoped to the project.
    ///
    /// # Errors
    ///
    /// Returns `AUTH_DENIED` on cross-project access.
    pub fn ensure_project(&self, project_id: ProjectId) -> Result<(), ApiError> {
        match self.project_id {
            None => Ok(()),
            Some(scoped) if scoped == project_id => Ok(()),
            Some(_) => Err(ApiError::auth_denied("key is scoped to a different project")),
        }
    }
}

// ============================================================================
// SECTION: Bearer Parsing
// ============================================================================

/// Extracts the bearer token from an authorization header value.
///
/// # Errors
///
/// Returns `AUTH_DENIED` for missing, oversized, or malformed headers.
pub fn parse_bearer(header: Option<&str>) -> Result<String, ApiError> {
    let header = header.ok_or_else(|| ApiError::auth_denied("missing authorization"))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(ApiError::auth_denied("authorization header too large"));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(ApiError::auth_denied("invalid authorization header"));
    }
    Ok(token.to_string())
}

/// Computes the sha-256 fingerprint stored for a raw key.
#[must_use]
pub fn key_fingerprint(raw_key: &str) -> String {
    hash_bytes(raw_key.as_bytes())
}

/// Resolves a bearer token against the key store.
///
/// # Errors
///
/// Returns `AUTH_DENIED` for unknown or revoked keys.
pub fn authenticate(
    tx: &mut dyn KernelTx,
    raw_key: &str,
) -> Result<AuthedActor, CoordinatorError> {
    let fingerprint = key_fingerprint(raw_key);
    let key = tx.api_key_by_fingerprint(&fingerprint)?;
    match key {
        Some(key) if key.status == ApiKeyStatus::Active => Ok(AuthedActor {
            project_id: Some(key.project_id),
            scopes: key.role_scopes,
            subject: key.name,
        }),
        Some(_) => Err(tascade_core::DomainError::new(
            tascade_core::ErrorCode::AuthDenied,
            "key is revoked",
        )
        .into()),
        None => Err(tascade_core::DomainError::new(
            tascade_core::ErrorCode::AuthDenied,
            "unknown key",
        )
        .into()),
    }
}

// ============================================================================
// SECTION: Audit Events
// ============================================================================

/// Auth decision audit payload.
#[derive(Debug, Serialize)]
pub struct AuthAuditEvent {
    /// Event identifier.
    event: &'static str,
    /// Decision outcome.
    decision: &'static str,
    /// Operation name.
    operation: String,
    /// Caller subject, when authenticated.
    subject: Option<String>,
    /// Failure reason for deny events.
    reason: Option<String>,
}

impl AuthAuditEvent {
    /// Builds an allow event.
    #[must_use]
    pub fn allowed(operation: &str, actor: &AuthedActor) -> Self {
        Self {
            event: "tascade_authz",
            decision: "allow",
            operation: operation.to_string(),
            subject: Some(actor.subject.clone()),
            reason: None,
        }
    }

    /// Builds a deny event.
    #[must_use]
    pub fn denied(operation: &str, reason: &str) -> Self {
        Self {
            event: "tascade_authz",
            decision: "deny",
            operation: operation.to_string(),
            subject: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// Audit sink for auth decisions.
pub trait AuthAuditSink: Send + Sync {
    /// Records one audit event.
    fn record(&self, event: &AuthAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuthAuditSink for StderrAuditSink {
    #[allow(
        clippy::print_stderr,
        reason = "The stderr sink exists to write audit lines to stderr."
    )]
    fn record(&self, event: &AuthAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            eprintln!("{payload}");
        }
    }
}

/// No-op audit sink for tests.
pub struct NoopAuditSink;

impl AuthAuditSink for NoopAuditSink {
    fn record(&self, _event: &AuthAuditEvent) {}
}
