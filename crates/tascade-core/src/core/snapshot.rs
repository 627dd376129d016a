// crates/tascade-core/src/core/snapshot.rs
// ============================================================================
// Module: Tascade Execution Snapshots
// Description: Immutable work-spec capture at the claim boundary.
// Purpose: Bind the contract an in-progress task finishes against.
// Dependencies: crate::core::{hashing, identifiers, task, time}, serde
// ============================================================================

//! ## Overview
//! When a task is claimed, the kernel captures the effective work spec
//! verbatim together with the plan version and the lease. The snapshot is
//! never mutated afterwards: material replans leave in-progress work
//! finishing under the contract it started with.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::LeaseId;
use crate::core::identifiers::PlanVersion;
use crate::core::identifiers::SnapshotId;
use crate::core::identifiers::TaskId;
use crate::core::task::WorkSpec;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Execution Snapshot
// ============================================================================

/// Immutable execution contract captured at the claim boundary.
///
/// # Invariants
/// - Never mutated after capture; replans do not touch it.
/// - `work_spec_hash` is the canonical hash of `work_spec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Opaque snapshot identifier.
    pub id: SnapshotId,
    /// Task the snapshot belongs to.
    pub task_id: TaskId,
    /// Lease under which the snapshot was captured.
    pub lease_id: LeaseId,
    /// Plan version at capture time.
    pub plan_version: PlanVersion,
    /// Verbatim work spec payload.
    pub work_spec: WorkSpec,
    /// Canonical hash of the work spec payload.
    pub work_spec_hash: String,
    /// Capture timestamp.
    pub captured_at: Timestamp,
}

impl ExecutionSnapshot {
    /// Captures a snapshot for a task's effective work spec.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when the work spec cannot be canonically hashed.
    pub fn capture(
        id: SnapshotId,
        task_id: TaskId,
        lease_id: LeaseId,
        plan_version: PlanVersion,
        work_spec: WorkSpec,
        captured_at: Timestamp,
    ) -> Result<Self, HashError> {
        let work_spec_hash = hash_canonical_json(&work_spec)?;
        Ok(Self {
            id,
            task_id,
            lease_id,
            plan_version,
            work_spec,
            work_spec_hash,
            captured_at,
        })
    }
}
