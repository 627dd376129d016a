// crates/tascade-config/src/lib.rs
// ============================================================================
// Module: Tascade Configuration Library
// Description: Public API surface for configuration loading.
// Purpose: Expose config types, env overrides, and validation.
// Dependencies: crate::config
// ============================================================================

//! ## Overview
//! Declarative configuration for the Tascade coordinator: database target,
//! server listen address, auth toggle, lease and reservation TTLs, the
//! heartbeat grace window, and migration discovery overrides.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::DatabaseConfig;
pub use config::SchedulingConfig;
pub use config::ServerConfig;
pub use config::TascadeConfig;
