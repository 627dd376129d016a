// crates/tascade-core/src/core/apikey.rs
// ============================================================================
// Module: Tascade API Keys
// Description: Project-scoped credentials with role-scope bitmasks.
// Purpose: Model the credential records the auth layer enforces with.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! API keys are project-scoped bearer credentials. The store holds only a
//! sha-256 fingerprint of the raw key, never the key itself. Role scopes are
//! a bitmask: planners mutate the graph, agents claim and submit, reviewers
//! record decisions, operators administer, and force authorizes invariant
//! bypasses.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ApiKeyId;
use crate::core::identifiers::ProjectId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Role Scopes
// ============================================================================

/// Bitmask of role scopes granted to a key.
///
/// # Invariants
/// - Bit assignments are stable wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleScopes(u32);

impl RoleScopes {
    /// Graph and plan mutations.
    pub const PLANNER: Self = Self(1);
    /// Claiming, heartbeats, artifacts.
    pub const AGENT: Self = Self(1 << 1);
    /// Gate decisions and integration review.
    pub const REVIEWER: Self = Self(1 << 2);
    /// Administration: reservations, rules, keys.
    pub const OPERATOR: Self = Self(1 << 3);
    /// Invariant bypass authorization.
    pub const FORCE: Self = Self(1 << 4);

    /// Creates a scope mask from a raw value.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw mask value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true when every bit of `required` is granted.
    #[must_use]
    pub const fn grants(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }

    /// Returns a mask granting every scope.
    #[must_use]
    pub const fn all() -> Self {
        Self::PLANNER
            .union(Self::AGENT)
            .union(Self::REVIEWER)
            .union(Self::OPERATOR)
            .union(Self::FORCE)
    }
}

// ============================================================================
// SECTION: API Key Record
// ============================================================================

/// Key lifecycle status.
///
/// # Invariants
/// - Revoked keys never authenticate again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    /// Key authenticates.
    Active,
    /// Key is permanently revoked.
    Revoked,
}

impl ApiKeyStatus {
    /// Returns the stable wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

/// Project-scoped bearer credential record.
///
/// # Invariants
/// - `fingerprint` is the sha-256 hex of the raw key; the raw key is never
///   stored or logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Opaque key identifier.
    pub id: ApiKeyId,
    /// Project the key is scoped to.
    pub project_id: ProjectId,
    /// Human-readable label.
    pub name: String,
    /// sha-256 hex fingerprint of the raw key.
    pub fingerprint: String,
    /// Granted role scopes.
    pub role_scopes: RoleScopes,
    /// Lifecycle status.
    pub status: ApiKeyStatus,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Revocation timestamp, when revoked.
    pub revoked_at: Option<Timestamp>,
}
