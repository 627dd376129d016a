// crates/tascade-server/src/state.rs
// ============================================================================
// Module: Server State
// Description: Shared application state and the host clock seam.
// Purpose: Tie the coordinator, store, config, and clock into one handle.
// Dependencies: tascade-config, tascade-core, tascade-store-sqlite
// ============================================================================

//! ## Overview
//! The application state owns the durable store, the coordinator, and the
//! clock. The kernel never reads wall-clock time itself; every handler asks
//! the state's clock for `now` and passes it down, which keeps tests
//! deterministic with a fixed clock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tascade_config::TascadeConfig;
use tascade_core::Coordinator;
use tascade_core::CoordinatorConfig;
use tascade_core::Timestamp;
use tascade_store_sqlite::SqliteStore;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Host clock seam; the kernel takes explicit timestamps only.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp::from_unix_millis(millis)
    }
}

/// Fixed clock for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Timestamp);

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

// ============================================================================
// SECTION: App State
// ============================================================================

/// Shared server state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Durable kernel store.
    pub store: SqliteStore,
    /// Orchestration kernel.
    pub coordinator: Coordinator,
    /// Loaded configuration.
    pub config: Arc<TascadeConfig>,
    /// Host clock.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Builds state from a loaded config and an opened store.
    #[must_use]
    pub fn new(config: TascadeConfig, store: SqliteStore, clock: Arc<dyn Clock>) -> Self {
        let coordinator = Coordinator::new(CoordinatorConfig {
            default_lease_ttl_secs: config.scheduling.lease_ttl_secs,
            default_reservation_ttl_secs: config.scheduling.reservation_ttl_secs,
            heartbeat_grace_secs: config.scheduling.heartbeat_grace_secs,
            context_event_limit: 20,
        });
        Self {
            store,
            coordinator,
            config: Arc::new(config),
            clock,
        }
    }
}
