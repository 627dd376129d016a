// crates/tascade-core/src/core/paths.rs
// ============================================================================
// Module: Tascade Path Patterns
// Description: Deterministic overlap detection for exclusive path patterns.
// Purpose: Feed the contention penalty used as a scheduling tie-breaker.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Exclusive path declarations use segment-prefix semantics: a pattern owns
//! its own subtree, with a trailing `*` or `**` segment treated as the
//! subtree wildcard. Two patterns overlap when one's segment list is a
//! prefix of the other's. The test is purely a function of its inputs, so
//! the contention penalty built on it is deterministic.

// ============================================================================
// SECTION: Pattern Overlap
// ============================================================================

/// Splits a pattern into normalized segments, dropping empty segments and a
/// trailing subtree wildcard.
fn segments(pattern: &str) -> Vec<&str> {
    let mut parts: Vec<&str> =
        pattern.split('/').map(str::trim).filter(|part| !part.is_empty()).collect();
    while matches!(parts.last(), Some(&"*") | Some(&"**")) {
        parts.pop();
    }
    parts
}

/// Returns true when two path patterns overlap under segment-prefix
/// semantics.
#[must_use]
pub fn patterns_overlap(left: &str, right: &str) -> bool {
    let left_segments = segments(left);
    let right_segments = segments(right);
    let shared = left_segments.len().min(right_segments.len());
    left_segments.iter().take(shared).eq(right_segments.iter().take(shared))
}

/// Returns true when any pattern in `left` overlaps any pattern in `right`.
#[must_use]
pub fn pattern_sets_overlap(left: &[String], right: &[String]) -> bool {
    left.iter().any(|a| right.iter().any(|b| patterns_overlap(a, b)))
}

/// Counts the in-flight path sets that overlap the candidate's exclusive
/// paths. This is the contention penalty used as a ranking tie-breaker.
#[must_use]
pub fn contention_penalty(candidate: &[String], in_flight: &[&[String]]) -> u32 {
    let mut penalty: u32 = 0;
    for paths in in_flight {
        if pattern_sets_overlap(candidate, paths) {
            penalty = penalty.saturating_add(1);
        }
    }
    penalty
}
