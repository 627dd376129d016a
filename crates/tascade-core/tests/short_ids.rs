// crates/tascade-core/tests/short_ids.rs
// ============================================================================
// Module: Short Identifier Tests
// Description: Dotted grammar parsing, formatting, and task references.
// ============================================================================
//! ## Overview
//! Validates the `P<n>`, `P<n>.M<m>`, `P<n>.M<m>.T<t>` grammar round trips
//! and that task references resolve wire inputs correctly.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use tascade_core::ShortId;
use tascade_core::TaskId;
use tascade_core::TaskRef;

// ============================================================================
// SECTION: Grammar
// ============================================================================

/// Tests every grammar level round trips through parse and display.
#[test]
fn test_short_id_round_trip() {
    for raw in ["P1", "P3.M2", "P12.M4.T99"] {
        let parsed: ShortId = raw.parse().expect("parse");
        assert_eq!(parsed.to_string(), raw);
    }
}

/// Tests zero components are rejected: indexes are 1-based.
#[test]
fn test_short_id_rejects_zero_components() {
    for raw in ["P0", "P1.M0", "P1.M1.T0"] {
        assert!(raw.parse::<ShortId>().is_err(), "accepted {raw}");
    }
}

/// Tests malformed inputs are rejected.
#[test]
fn test_short_id_rejects_malformed() {
    for raw in ["", "P", "M1", "P1.T1", "P1.M1.T1.X1", "P1.M.T1", "Pa", "p1", "P1.m1"] {
        assert!(raw.parse::<ShortId>().is_err(), "accepted {raw}");
    }
}

/// Tests task-level detection.
#[test]
fn test_short_id_task_detection() {
    let phase: ShortId = "P1".parse().expect("parse");
    let task: ShortId = "P1.M1.T1".parse().expect("parse");
    assert!(!phase.is_task());
    assert!(task.is_task());
}

// ============================================================================
// SECTION: Task References
// ============================================================================

/// Tests decimal inputs resolve to opaque id references.
#[test]
fn test_task_ref_parses_opaque_id() {
    let reference = TaskRef::parse("42", None).expect("parse");
    assert_eq!(reference, TaskRef::by_id(TaskId::from_raw(42).expect("id")));
}

/// Tests dotted inputs resolve to short-id references.
#[test]
fn test_task_ref_parses_short_id() {
    let reference = TaskRef::parse("P1.M2.T3", None).expect("parse");
    match reference {
        TaskRef::ByShortId {
            project_id: None,
            short_id,
        } => assert_eq!(short_id.to_string(), "P1.M2.T3"),
        other => panic!("unexpected reference: {other:?}"),
    }
}

/// Tests non-task short ids and zero ids are rejected at the reference
/// boundary.
#[test]
fn test_task_ref_rejects_non_task_inputs() {
    assert!(TaskRef::parse("P1.M2", None).is_err());
    assert!(TaskRef::parse("0", None).is_err());
    assert!(TaskRef::parse("not-a-ref", None).is_err());
}
