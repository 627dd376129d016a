// crates/tascade-server/src/lib.rs
// ============================================================================
// Module: Tascade Server Library
// Description: Public API surface for the HTTP coordinator server.
// Purpose: Expose the router, registry, auth, and sweeper to the CLI host.
// Dependencies: crate::{auth, error, registry, routes, state, sweeper}
// ============================================================================

//! ## Overview
//! The server exposes the kernel over a JSON/HTTP REST surface under `/v1`
//! and a tool-call surface mechanically derived from the same operation
//! table. Authentication is bearer keys with project and role scoping; a
//! background sweeper drives lease and reservation expiry.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod error;
pub mod registry;
pub mod routes;
pub mod state;
pub mod sweeper;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use auth::AuthAuditSink;
pub use auth::AuthedActor;
pub use auth::NoopAuditSink;
pub use auth::StderrAuditSink;
pub use error::ApiError;
pub use error::ErrorBody;
pub use registry::OperationRegistry;
pub use routes::ServerContext;
pub use routes::ServerError;
pub use routes::SharedContext;
pub use routes::build_router;
pub use routes::serve;
pub use state::AppState;
pub use state::Clock;
pub use state::FixedClock;
pub use state::SystemClock;
