// crates/tascade-core/src/core/event.rs
// ============================================================================
// Module: Tascade Event Log
// Description: Append-only transition events and the replay projection.
// Purpose: Record every state change for audit, projections, and metrics.
// Dependencies: crate::core::{identifiers, lease, task}, serde, serde_json
// ============================================================================

//! ## Overview
//! Every state-changing kernel operation appends at least one immutable event
//! in the same transaction as its primary write. Events carry a monotonic
//! per-project sequence; consumers pull by cursor and must be idempotent.
//! Replaying from sequence zero reproduces task states, lease and reservation
//! statuses, and plan versions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::error::DomainError;
use crate::core::error::ErrorCode;
use crate::core::identifiers::EventSeq;
use crate::core::identifiers::LeaseId;
use crate::core::identifiers::PlanVersion;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::ReservationId;
use crate::core::identifiers::TaskId;
use crate::core::lease::LeaseStatus;
use crate::core::lease::ReservationStatus;
use crate::core::task::TaskState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Entity Kinds
// ============================================================================

/// Entity classification for event records.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Project entity.
    Project,
    /// Phase entity.
    Phase,
    /// Milestone entity.
    Milestone,
    /// Task entity.
    Task,
    /// Dependency edge entity.
    Dependency,
    /// Lease entity.
    Lease,
    /// Reservation entity.
    Reservation,
    /// Artifact entity.
    Artifact,
    /// Integration attempt entity.
    IntegrationAttempt,
    /// Gate rule entity.
    GateRule,
    /// Gate decision entity.
    GateDecision,
    /// Plan changeset entity.
    ChangeSet,
    /// API key entity.
    ApiKey,
}

impl EntityKind {
    /// Returns the stable wire form of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Phase => "phase",
            Self::Milestone => "milestone",
            Self::Task => "task",
            Self::Dependency => "dependency",
            Self::Lease => "lease",
            Self::Reservation => "reservation",
            Self::Artifact => "artifact",
            Self::IntegrationAttempt => "integration_attempt",
            Self::GateRule => "gate_rule",
            Self::GateDecision => "gate_decision",
            Self::ChangeSet => "changeset",
            Self::ApiKey => "api_key",
        }
    }
}

// ============================================================================
// SECTION: Event Kinds
// ============================================================================

/// Event type classification with stable dotted wire forms.
///
/// # Invariants
/// - Wire strings are never renamed; projections key off them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Project created.
    ProjectCreated,
    /// Phase created.
    PhaseCreated,
    /// Milestone created.
    MilestoneCreated,
    /// Task created.
    TaskCreated,
    /// Dependency edge created.
    DependencyCreated,
    /// Dependency edge removed by replanning.
    DependencyRemoved,
    /// Task promoted into the ready set.
    TaskReady,
    /// Task demoted back to backlog.
    TaskBacklogged,
    /// Reservation created for a designated assignee.
    ReservationCreated,
    /// Task reserved for a designated assignee.
    TaskReserved,
    /// Task claimed under a fresh lease.
    TaskClaimed,
    /// Claim invalidated by a material replan.
    TaskClaimInvalidated,
    /// Generic validated state transition.
    TaskTransitioned,
    /// Reservation expired.
    ReservationExpired,
    /// Reservation released without consumption.
    ReservationReleased,
    /// Reservation consumed by the assignee's claim.
    ReservationConsumed,
    /// Lease expired without heartbeat.
    LeaseExpired,
    /// Lease released before completion.
    LeaseReleased,
    /// Lease consumed by task completion.
    LeaseConsumed,
    /// Artifact recorded.
    ArtifactCreated,
    /// Integration attempt enqueued.
    IntegrationEnqueued,
    /// Integration attempt reached a terminal result.
    IntegrationCompleted,
    /// Gate rule created or replaced.
    GateRuleCreated,
    /// Gate task generated from a rule.
    GateGenerated,
    /// Gate decision recorded.
    GateDecisionRecorded,
    /// Plan changeset created.
    ChangeSetCreated,
    /// Plan changeset applied; plan version bumped.
    PlanApplied,
    /// API key created.
    ApiKeyCreated,
    /// API key revoked.
    ApiKeyRevoked,
}

impl EventKind {
    /// Returns the stable wire form of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProjectCreated => "project.created",
            Self::PhaseCreated => "phase.created",
            Self::MilestoneCreated => "milestone.created",
            Self::TaskCreated => "task.created",
            Self::DependencyCreated => "dependency.created",
            Self::DependencyRemoved => "dependency.removed",
            Self::TaskReady => "task.ready",
            Self::TaskBacklogged => "task.backlogged",
            Self::ReservationCreated => "reservation.created",
            Self::TaskReserved => "task.reserved",
            Self::TaskClaimed => "task.claimed",
            Self::TaskClaimInvalidated => "task.claim_invalidated",
            Self::TaskTransitioned => "task.transitioned",
            Self::ReservationExpired => "reservation.expired",
            Self::ReservationReleased => "reservation.released",
            Self::ReservationConsumed => "reservation.consumed",
            Self::LeaseExpired => "lease.expired",
            Self::LeaseReleased => "lease.released",
            Self::LeaseConsumed => "lease.consumed",
            Self::ArtifactCreated => "artifact.created",
            Self::IntegrationEnqueued => "integration.enqueued",
            Self::IntegrationCompleted => "integration.completed",
            Self::GateRuleCreated => "gate.rule_created",
            Self::GateGenerated => "gate.generated",
            Self::GateDecisionRecorded => "gate.decision_recorded",
            Self::ChangeSetCreated => "changeset.created",
            Self::PlanApplied => "plan.applied",
            Self::ApiKeyCreated => "api_key.created",
            Self::ApiKeyRevoked => "api_key.revoked",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DomainError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "project.created" => Ok(Self::ProjectCreated),
            "phase.created" => Ok(Self::PhaseCreated),
            "milestone.created" => Ok(Self::MilestoneCreated),
            "task.created" => Ok(Self::TaskCreated),
            "dependency.created" => Ok(Self::DependencyCreated),
            "dependency.removed" => Ok(Self::DependencyRemoved),
            "task.ready" => Ok(Self::TaskReady),
            "task.backlogged" => Ok(Self::TaskBacklogged),
            "reservation.created" => Ok(Self::ReservationCreated),
            "task.reserved" => Ok(Self::TaskReserved),
            "task.claimed" => Ok(Self::TaskClaimed),
            "task.claim_invalidated" => Ok(Self::TaskClaimInvalidated),
            "task.transitioned" => Ok(Self::TaskTransitioned),
            "reservation.expired" => Ok(Self::ReservationExpired),
            "reservation.released" => Ok(Self::ReservationReleased),
            "reservation.consumed" => Ok(Self::ReservationConsumed),
            "lease.expired" => Ok(Self::LeaseExpired),
            "lease.released" => Ok(Self::LeaseReleased),
            "lease.consumed" => Ok(Self::LeaseConsumed),
            "artifact.created" => Ok(Self::ArtifactCreated),
            "integration.enqueued" => Ok(Self::IntegrationEnqueued),
            "integration.completed" => Ok(Self::IntegrationCompleted),
            "gate.rule_created" => Ok(Self::GateRuleCreated),
            "gate.generated" => Ok(Self::GateGenerated),
            "gate.decision_recorded" => Ok(Self::GateDecisionRecorded),
            "changeset.created" => Ok(Self::ChangeSetCreated),
            "plan.applied" => Ok(Self::PlanApplied),
            "api_key.created" => Ok(Self::ApiKeyCreated),
            "api_key.revoked" => Ok(Self::ApiKeyRevoked),
            other => Err(DomainError::new(
                ErrorCode::InvariantViolation,
                format!("unknown event kind: {other}"),
            )),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Event Records
// ============================================================================

/// Immutable event appended to the per-project log.
///
/// # Invariants
/// - `seq` is assigned by the store inside the writing transaction and is
///   monotonic per project.
/// - Payloads never embed secrets or raw credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic per-project sequence.
    pub seq: EventSeq,
    /// Owning project.
    pub project_id: ProjectId,
    /// Entity classification.
    pub entity_kind: EntityKind,
    /// Entity identifier in wire form.
    pub entity_id: String,
    /// Event classification.
    pub kind: EventKind,
    /// Structured payload.
    pub payload: Value,
    /// Acting agent or system actor.
    pub actor: String,
    /// Event timestamp.
    pub recorded_at: Timestamp,
}

/// Event content prior to sequence assignment.
///
/// # Invariants
/// - Becomes an [`EventRecord`] only through the store's append path.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Owning project.
    pub project_id: ProjectId,
    /// Entity classification.
    pub entity_kind: EntityKind,
    /// Entity identifier in wire form.
    pub entity_id: String,
    /// Event classification.
    pub kind: EventKind,
    /// Structured payload.
    pub payload: Value,
    /// Acting agent or system actor.
    pub actor: String,
    /// Event timestamp.
    pub recorded_at: Timestamp,
}

// ============================================================================
// SECTION: Replay Projection
// ============================================================================

/// Read model rebuilt purely from the event log.
///
/// # Invariants
/// - Applying the full log from sequence zero reproduces the live store's
///   task states, lease/reservation statuses, and plan versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Task states keyed by task id.
    pub task_states: BTreeMap<TaskId, TaskState>,
    /// Lease statuses keyed by lease id.
    pub lease_statuses: BTreeMap<LeaseId, LeaseStatus>,
    /// Reservation statuses keyed by reservation id.
    pub reservation_statuses: BTreeMap<ReservationId, ReservationStatus>,
    /// Plan versions keyed by project id.
    pub plan_versions: BTreeMap<ProjectId, PlanVersion>,
}

/// Reads a raw u64 payload field.
fn payload_u64(payload: &Value, field: &str) -> Option<u64> {
    payload.get(field).and_then(Value::as_u64)
}

/// Reads a task id payload field.
fn payload_task(payload: &Value) -> Option<TaskId> {
    payload_u64(payload, "task_id").and_then(TaskId::from_raw)
}

/// Reads a lease id payload field.
fn payload_lease(payload: &Value) -> Option<LeaseId> {
    payload_u64(payload, "lease_id").and_then(LeaseId::from_raw)
}

/// Reads a reservation id payload field.
fn payload_reservation(payload: &Value) -> Option<ReservationId> {
    payload_u64(payload, "reservation_id").and_then(ReservationId::from_raw)
}

impl Projection {
    /// Replays a full event stream from sequence zero.
    #[must_use]
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a EventRecord>) -> Self {
        let mut projection = Self::default();
        for event in events {
            projection.apply(event);
        }
        projection
    }

    /// Applies one event. Unknown or partial payloads are ignored rather
    /// than failing: projections must tolerate forward-compatible payloads.
    pub fn apply(&mut self, event: &EventRecord) {
        match event.kind {
            EventKind::ProjectCreated => {
                self.plan_versions.insert(event.project_id, PlanVersion::INITIAL);
            }
            EventKind::PlanApplied => {
                if let Some(version) = payload_u64(&event.payload, "target_version") {
                    self.plan_versions.insert(event.project_id, PlanVersion::new(version));
                }
            }
            EventKind::TaskCreated => {
                if let Some(task_id) = payload_task(&event.payload) {
                    let state = event
                        .payload
                        .get("state")
                        .and_then(Value::as_str)
                        .and_then(|raw| raw.parse().ok())
                        .unwrap_or(TaskState::Backlog);
                    self.task_states.insert(task_id, state);
                }
            }
            EventKind::TaskReady => {
                self.set_task_state(&event.payload, TaskState::Ready);
            }
            EventKind::TaskBacklogged => {
                self.set_task_state(&event.payload, TaskState::Backlog);
            }
            EventKind::ReservationCreated => {
                if let Some(reservation) = payload_reservation(&event.payload) {
                    self.reservation_statuses.insert(reservation, ReservationStatus::Active);
                }
            }
            EventKind::TaskReserved => {
                self.set_task_state(&event.payload, TaskState::Reserved);
            }
            EventKind::TaskClaimed => {
                self.set_task_state(&event.payload, TaskState::Claimed);
                if let Some(lease) = payload_lease(&event.payload) {
                    self.lease_statuses.insert(lease, LeaseStatus::Active);
                }
            }
            EventKind::TaskClaimInvalidated => {
                self.set_task_state(&event.payload, TaskState::Ready);
                if let Some(lease) = payload_lease(&event.payload) {
                    self.lease_statuses.insert(lease, LeaseStatus::Released);
                }
            }
            EventKind::TaskTransitioned => {
                if let (Some(task_id), Some(to)) = (
                    payload_task(&event.payload),
                    event
                        .payload
                        .get("to")
                        .and_then(Value::as_str)
                        .and_then(|raw| raw.parse::<TaskState>().ok()),
                ) {
                    self.task_states.insert(task_id, to);
                }
            }
            EventKind::ReservationExpired => {
                self.set_reservation_status(&event.payload, ReservationStatus::Expired);
            }
            EventKind::ReservationReleased => {
                self.set_reservation_status(&event.payload, ReservationStatus::Released);
            }
            EventKind::ReservationConsumed => {
                self.set_reservation_status(&event.payload, ReservationStatus::Consumed);
            }
            EventKind::LeaseExpired => {
                self.set_lease_status(&event.payload, LeaseStatus::Expired);
                self.set_task_state(&event.payload, TaskState::Ready);
            }
            EventKind::LeaseReleased => {
                self.set_lease_status(&event.payload, LeaseStatus::Released);
            }
            EventKind::LeaseConsumed => {
                self.set_lease_status(&event.payload, LeaseStatus::Consumed);
            }
            EventKind::PhaseCreated
            | EventKind::MilestoneCreated
            | EventKind::DependencyCreated
            | EventKind::DependencyRemoved
            | EventKind::ArtifactCreated
            | EventKind::IntegrationEnqueued
            | EventKind::IntegrationCompleted
            | EventKind::GateRuleCreated
            | EventKind::GateGenerated
            | EventKind::GateDecisionRecorded
            | EventKind::ChangeSetCreated
            | EventKind::ApiKeyCreated
            | EventKind::ApiKeyRevoked => {}
        }
    }

    /// Sets a task state from a payload task id.
    fn set_task_state(&mut self, payload: &Value, state: TaskState) {
        if let Some(task_id) = payload_task(payload) {
            self.task_states.insert(task_id, state);
        }
    }

    /// Sets a lease status from a payload lease id.
    fn set_lease_status(&mut self, payload: &Value, status: LeaseStatus) {
        if let Some(lease) = payload_lease(payload) {
            self.lease_statuses.insert(lease, status);
        }
    }

    /// Sets a reservation status from a payload reservation id.
    fn set_reservation_status(&mut self, payload: &Value, status: ReservationStatus) {
        if let Some(reservation) = payload_reservation(payload) {
            self.reservation_statuses.insert(reservation, status);
        }
    }
}
