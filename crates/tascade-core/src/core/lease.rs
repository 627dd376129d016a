// crates/tascade-core/src/core/lease.rs
// ============================================================================
// Module: Tascade Leases and Reservations
// Description: Time-bound exclusive claims and directed hard assignments.
// Purpose: Model the at-most-one-executor invariant with fencing and TTLs.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A lease is a time-bound exclusive hold on a task by a specific agent,
//! extended by heartbeats and fenced by a monotonic counter. A reservation is
//! a pre-claim hard assignment excluding every other claimer until it expires
//! or is consumed. Both carry explicit expiry; the sweeper releases them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AgentId;
use crate::core::identifiers::FencingToken;
use crate::core::identifiers::LeaseId;
use crate::core::identifiers::LeaseToken;
use crate::core::identifiers::ReservationId;
use crate::core::identifiers::TaskId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default reservation TTL in seconds.
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 1_800;

// ============================================================================
// SECTION: Lease
// ============================================================================

/// Lease lifecycle status.
///
/// # Invariants
/// - At most one `active` lease exists per task at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    /// Lease is live and fencing writes.
    Active,
    /// Lease lapsed without a heartbeat; released by the sweeper.
    Expired,
    /// Lease was invalidated or given up before completion.
    Released,
    /// Lease was consumed by task completion.
    Consumed,
}

impl LeaseStatus {
    /// Returns the stable wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Released => "released",
            Self::Consumed => "consumed",
        }
    }
}

/// Time-bound exclusive claim on a task.
///
/// # Invariants
/// - `fencing` is strictly greater than every prior lease on the same task.
/// - `expires_at` only moves forward; heartbeats are monotone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Opaque lease identifier.
    pub id: LeaseId,
    /// Claimed task.
    pub task_id: TaskId,
    /// Holding agent.
    pub agent_id: AgentId,
    /// Opaque token presented on lease-authenticated writes.
    pub token: LeaseToken,
    /// Monotonic fencing counter for this task.
    pub fencing: FencingToken,
    /// Lifecycle status.
    pub status: LeaseStatus,
    /// Grant timestamp.
    pub granted_at: Timestamp,
    /// Expiry deadline; writes after this instant are rejected once swept.
    pub expires_at: Timestamp,
    /// Last heartbeat timestamp.
    pub heartbeat_at: Timestamp,
}

impl Lease {
    /// Returns true when the lease is active and unexpired at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.status == LeaseStatus::Active && now <= self.expires_at
    }
}

// ============================================================================
// SECTION: Reservation
// ============================================================================

/// Reservation assignment mode.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationMode {
    /// Hard assignment: only the assignee may claim.
    Hard,
}

/// Reservation lifecycle status.
///
/// # Invariants
/// - At most one `active` reservation exists per task at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Reservation is live and excludes other claimers.
    Active,
    /// Reservation lapsed; released by the sweeper.
    Expired,
    /// Reservation was consumed by the assignee's claim.
    Consumed,
    /// Reservation was released by replanning or operator action.
    Released,
}

impl ReservationStatus {
    /// Returns the stable wire form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Consumed => "consumed",
            Self::Released => "released",
        }
    }
}

/// Directed hard assignment of a task to a future claimer.
///
/// # Invariants
/// - Only the assignee may claim while the reservation is active.
/// - Non-assignees must not see the task in their ready queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Opaque reservation identifier.
    pub id: ReservationId,
    /// Reserved task.
    pub task_id: TaskId,
    /// Designated future claimer.
    pub assignee: AgentId,
    /// Assignment mode.
    pub mode: ReservationMode,
    /// Lifecycle status.
    pub status: ReservationStatus,
    /// TTL in seconds granted at creation.
    pub ttl_secs: u64,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Expiry deadline.
    pub expires_at: Timestamp,
}

impl Reservation {
    /// Returns true when the reservation is active and unexpired at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.status == ReservationStatus::Active && now <= self.expires_at
    }
}
