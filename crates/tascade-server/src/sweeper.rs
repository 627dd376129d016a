// crates/tascade-server/src/sweeper.rs
// ============================================================================
// Module: Expiry Sweeper
// Description: Background task driving lease and reservation expiry.
// Purpose: Guarantee the sweep runs at least once per TTL interval.
// Dependencies: tascade-core, tokio
// ============================================================================

//! ## Overview
//! The sweeper ticks on a bounded interval (half the lease TTL by default)
//! and runs the kernel's expiry sweep in one transaction per tick. After a
//! coordinator restart the first tick catches up on everything that expired
//! while the process was down; durable state alone is sufficient.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use tascade_core::CoordinatorError;
use tascade_core::SweepReport;

use crate::state::AppState;

// ============================================================================
// SECTION: Sweeper
// ============================================================================

/// Runs one sweep tick.
///
/// # Errors
///
/// Returns the coordinator's storage fault; domain guards cannot fail the
/// sweep.
pub fn sweep_once(state: &AppState) -> Result<SweepReport, CoordinatorError> {
    let now = state.clock.now();
    state.store.with_tx(|tx| state.coordinator.sweep_expired(tx, now))
}

/// Spawns the background sweep loop on the current tokio runtime.
pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval_secs = state.config.scheduling.effective_sweep_interval_secs();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            // Sweep failures are transient storage faults; the next tick
            // retries from durable state.
            let _ = sweep_once(&state);
        }
    })
}
