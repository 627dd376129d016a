// crates/tascade-core/tests/ready_ranking.rs
// ============================================================================
// Module: Ready Engine Tests
// Description: Eligibility filtering, reservation visibility, and ranking.
// ============================================================================
//! ## Overview
//! Validates the ready set respects dependency unlock, reservation
//! visibility, and the stable ranking key: priority, contention penalty,
//! creation time, short id.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

mod common;

use common::agent;
use common::claim;
use common::create_task;
use common::draft;
use common::fixture;
use common::t;
use tascade_core::CapabilityInput;
use tascade_core::core::paths::contention_penalty;
use tascade_core::core::paths::patterns_overlap;

/// Lists ready short ids for an agent.
fn ready_ids(
    fx: &common::Fixture,
    caller: &str,
    capabilities: Option<CapabilityInput>,
) -> Vec<String> {
    fx.store
        .with_tx(|tx| {
            fx.coordinator.list_ready_tasks(
                tx,
                fx.project.id,
                &agent(caller),
                capabilities.as_ref(),
            )
        })
        .expect("ready")
        .into_iter()
        .map(|entry| entry.task.short_id.to_string())
        .collect()
}

// ============================================================================
// SECTION: Ranking
// ============================================================================

/// Tests priority ascending, then creation time, then short id.
#[test]
fn test_stable_ranking_order() {
    let fx = fixture();
    let mut low = draft(&fx, "low priority");
    low.priority = 50;
    let mut urgent_late = draft(&fx, "urgent late");
    urgent_late.priority = 1;
    let mut urgent_early = draft(&fx, "urgent early");
    urgent_early.priority = 1;
    create_task(&fx, &low, t(10));
    create_task(&fx, &urgent_early, t(20));
    create_task(&fx, &urgent_late, t(30));

    assert_eq!(
        ready_ids(&fx, "alice", None),
        vec!["P1.M1.T2", "P1.M1.T3", "P1.M1.T1"],
    );
}

/// Tests the contention penalty breaks priority ties deterministically.
#[test]
fn test_contention_penalty_tiebreak() {
    let fx = fixture();
    let mut contended = draft(&fx, "api work");
    contended.exclusive_paths = vec!["src/api/**".to_string()];
    let mut clear = draft(&fx, "docs work");
    clear.exclusive_paths = vec!["docs/**".to_string()];
    let mut in_flight = draft(&fx, "api refactor");
    in_flight.exclusive_paths = vec!["src/api/routes/**".to_string()];

    // Same creation instant so only the penalty separates them.
    create_task(&fx, &contended, t(10));
    create_task(&fx, &clear, t(10));
    let holder = create_task(&fx, &in_flight, t(10));
    claim(&fx, holder.id, "bob", "token-b", t(20)).expect("claim");

    assert_eq!(ready_ids(&fx, "alice", None), vec!["P1.M1.T2", "P1.M1.T1"]);
}

// ============================================================================
// SECTION: Visibility
// ============================================================================

/// Tests reserved tasks are invisible to non-assignees and prioritized for
/// the assignee.
#[test]
fn test_reservation_visibility() {
    let fx = fixture();
    create_task(&fx, &draft(&fx, "open"), t(10));
    let reserved = create_task(&fx, &draft(&fx, "reserved"), t(11));
    fx.store
        .with_tx(|tx| {
            fx.coordinator.assign_task(
                tx,
                &tascade_core::TaskRef::by_id(reserved.id),
                &agent("bob"),
                None,
                &agent("operator"),
                t(12),
            )
        })
        .expect("assign");

    assert_eq!(ready_ids(&fx, "alice", None), vec!["P1.M1.T1"]);
    assert_eq!(ready_ids(&fx, "bob", None), vec!["P1.M1.T2", "P1.M1.T1"]);
}

/// Tests capability filtering: tags must be a subset of the caller's.
#[test]
fn test_capability_filtering() {
    let fx = fixture();
    let mut tagged = draft(&fx, "needs sql");
    tagged.capability_tags = vec!["sql".to_string()];
    create_task(&fx, &tagged, t(10));
    create_task(&fx, &draft(&fx, "untagged"), t(11));

    let all = ready_ids(&fx, "alice", None);
    assert_eq!(all.len(), 2);
    let filtered = ready_ids(
        &fx,
        "alice",
        Some(CapabilityInput::Csv("frontend".to_string())),
    );
    assert_eq!(filtered, vec!["P1.M1.T2"]);
    let matched = ready_ids(
        &fx,
        "alice",
        Some(CapabilityInput::Csv("sql, frontend".to_string())),
    );
    assert_eq!(matched.len(), 2);
}

/// Tests leased tasks leave the ready set.
#[test]
fn test_leased_tasks_excluded() {
    let fx = fixture();
    let task = create_task(&fx, &draft(&fx, "solo"), t(10));
    assert_eq!(ready_ids(&fx, "alice", None).len(), 1);
    claim(&fx, task.id, "bob", "token-1", t(20)).expect("claim");
    assert!(ready_ids(&fx, "alice", None).is_empty());
}

/// Tests a malformed capability shape fails with the stable code.
#[test]
fn test_invalid_capability_shape() {
    let fx = fixture();
    create_task(&fx, &draft(&fx, "any"), t(10));
    let error = fx
        .store
        .with_tx(|tx| {
            fx.coordinator.list_ready_tasks(
                tx,
                fx.project.id,
                &agent("alice"),
                Some(&CapabilityInput::List(vec![" ".to_string()])),
            )
        })
        .expect_err("must fail");
    common::assert_code(&error, tascade_core::ErrorCode::InvalidCapabilities);
}

// ============================================================================
// SECTION: Path Overlap
// ============================================================================

/// Tests segment-prefix overlap semantics.
#[test]
fn test_pattern_overlap() {
    assert!(patterns_overlap("src/api/**", "src/api/routes/**"));
    assert!(patterns_overlap("src/api", "src/api"));
    assert!(!patterns_overlap("src/api/**", "src/web/**"));
    assert!(patterns_overlap("src/**", "src/api/handlers.rs"));
}

/// Tests the penalty counts overlapping in-flight path sets.
#[test]
fn test_penalty_counts_overlaps() {
    let candidate = vec!["src/api/**".to_string()];
    let flight_a = vec!["src/api/routes/**".to_string()];
    let flight_b = vec!["docs/**".to_string()];
    let flight_c = vec!["src/**".to_string()];
    assert_eq!(
        contention_penalty(
            &candidate,
            &[flight_a.as_slice(), flight_b.as_slice(), flight_c.as_slice()],
        ),
        2,
    );
}
