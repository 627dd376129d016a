// crates/tascade-core/src/core/capabilities.rs
// ============================================================================
// Module: Tascade Capability Input
// Description: Flexible capability input parsing and normalization.
// Purpose: Accept list or comma-delimited capability shapes, fail closed otherwise.
// Dependencies: crate::core::error, serde
// ============================================================================

//! ## Overview
//! Callers may supply capabilities as an ordered sequence of strings or as a
//! single comma-delimited string. Both normalize into a membership-only set;
//! any other shape fails `INVALID_CAPABILITIES` at ingress.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::error::DomainError;
use crate::core::error::ErrorCode;

// ============================================================================
// SECTION: Capability Input
// ============================================================================

/// Untagged wire shape for capability filters.
///
/// # Invariants
/// - Only a string list or a single comma-delimited string deserializes;
///   anything else is rejected by serde and surfaced as `INVALID_CAPABILITIES`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityInput {
    /// Ordered sequence of capability strings.
    List(Vec<String>),
    /// Single comma-delimited capability string.
    Csv(String),
}

impl CapabilityInput {
    /// Normalizes the input into a capability set.
    ///
    /// Whitespace around entries is trimmed; empty entries are dropped.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_CAPABILITIES` when an entry is empty after trimming
    /// in list form (a signal of a malformed caller payload).
    pub fn normalize(&self) -> Result<BTreeSet<String>, DomainError> {
        match self {
            Self::List(entries) => {
                let mut set = BTreeSet::new();
                for entry in entries {
                    let trimmed = entry.trim();
                    if trimmed.is_empty() {
                        return Err(DomainError::new(
                            ErrorCode::InvalidCapabilities,
                            "capability entries must be non-empty",
                        ));
                    }
                    set.insert(trimmed.to_string());
                }
                Ok(set)
            }
            Self::Csv(raw) => Ok(raw
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ToString::to_string)
                .collect()),
        }
    }
}

/// Returns true when `required` is a subset of `held`.
///
/// An empty requirement is satisfied by any holder.
#[must_use]
pub fn covers(held: &BTreeSet<String>, required: &BTreeSet<String>) -> bool {
    required.is_subset(held)
}
