// crates/tascade-core/src/core/hashing.rs
// ============================================================================
// Module: Tascade Canonical Hashing
// Description: Canonical JSON bytes and sha-256 digests.
// Purpose: Produce stable hashes for execution snapshots and key fingerprints.
// Dependencies: serde, serde_json, sha2, thiserror
// ============================================================================

//! ## Overview
//! Canonical hashing serializes a value to JSON with sorted object keys (the
//! default `serde_json` map ordering) and digests the bytes with sha-256.
//! Hashes are lowercase hex and stable across replays.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Canonical hashing errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum HashError {
    /// Value could not be serialized to canonical JSON.
    #[error("canonical serialization failed: {0}")]
    Serialize(String),
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Serializes a value into canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError::Serialize`] when the value cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_json::to_vec(value).map_err(|err| HashError::Serialize(err.to_string()))
}

/// Digests raw bytes with sha-256 into lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hashes a serializable value via canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError`] when canonical serialization fails.
pub fn hash_canonical_json<T: Serialize>(value: &T) -> Result<String, HashError> {
    Ok(hash_bytes(&canonical_json_bytes(value)?))
}
