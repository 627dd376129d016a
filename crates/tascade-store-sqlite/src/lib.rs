// crates/tascade-store-sqlite/src/lib.rs
// ============================================================================
// Module: Tascade SQLite Store Library
// Description: Public API surface for the durable kernel store.
// Purpose: Expose the SQLite-backed KernelTx implementation.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! Durable persistence for the Tascade kernel: a relational schema with
//! scoped short-id uniqueness, partial unique indexes for the
//! at-most-one-active invariants, a per-project monotonic event log, and an
//! idempotent migration table bootstrapped at startup.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteJournalMode;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
