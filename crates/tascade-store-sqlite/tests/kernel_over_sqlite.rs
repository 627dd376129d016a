// crates/tascade-store-sqlite/tests/kernel_over_sqlite.rs
// ============================================================================
// Module: Kernel-over-SQLite Tests
// Description: Coordinator operations running on the durable store.
// ============================================================================
//! ## Overview
//! Exercises the coordinator against the SQLite `KernelTx`: claims survive
//! process restarts, sweeps catch up from durable state alone, and the
//! event log replays to the live projection.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use tascade_core::AgentId;
use tascade_core::ClaimRequest;
use tascade_core::Coordinator;
use tascade_core::CoordinatorConfig;
use tascade_core::CoordinatorError;
use tascade_core::EventSeq;
use tascade_core::LeaseToken;
use tascade_core::Projection;
use tascade_core::TaskClass;
use tascade_core::TaskDraft;
use tascade_core::TaskRef;
use tascade_core::TaskState;
use tascade_core::Timestamp;
use tascade_core::WorkSpec;
use tascade_store_sqlite::SqliteStore;
use tascade_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

/// Builds a timestamp from raw millis.
const fn t(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// Seeds a project scaffold with one claimable task on the durable store.
fn seed(
    store: &SqliteStore,
    coordinator: &Coordinator,
) -> (tascade_core::Project, tascade_core::Task) {
    let planner = AgentId::new("planner");
    store
        .with_tx(|tx| {
            let project = coordinator.create_project(tx, "durable", &planner, t(1))?;
            let phase = coordinator.create_phase(tx, project.id, "core", &planner, t(2))?;
            let milestone =
                coordinator.create_milestone(tx, phase.id, "kernel", &planner, t(3))?;
            let task = coordinator.create_task(
                tx,
                &TaskDraft {
                    milestone_id: milestone.id,
                    title: "durable task".to_string(),
                    description: String::new(),
                    priority: 0,
                    task_class: TaskClass::Backend,
                    capability_tags: Vec::new(),
                    expected_touches: Vec::new(),
                    exclusive_paths: Vec::new(),
                    shared_paths: Vec::new(),
                    work_spec: WorkSpec {
                        objective: "survive restarts".to_string(),
                        ..WorkSpec::default()
                    },
                },
                &planner,
                t(4),
            )?;
            Ok::<_, CoordinatorError>((project, task))
        })
        .expect("seed")
}

// ============================================================================
// SECTION: Durability
// ============================================================================

/// Tests a claim made before a restart is visible and fenced after
/// reopening the database.
#[test]
fn test_claim_survives_restart() {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteStoreConfig::for_path(dir.path().join("tascade.db"));
    let coordinator = Coordinator::new(CoordinatorConfig::default());

    let task_id = {
        let store = SqliteStore::open(&config).expect("open");
        let (_, task) = seed(&store, &coordinator);
        store
            .with_tx(|tx| {
                coordinator.claim_task(tx, &ClaimRequest {
                    task: TaskRef::by_id(task.id),
                    agent_id: AgentId::new("alice"),
                    capabilities: None,
                    token: LeaseToken::new("restart-token"),
                    now: t(10),
                })
            })
            .expect("claim");
        task.id
    };

    let reopened = SqliteStore::open(&config).expect("reopen");
    let (state, lease) = reopened
        .with_tx(|tx| {
            let state = tx.task(task_id)?.expect("task").state;
            let lease = tx.active_lease_for_task(task_id)?;
            Ok::<_, CoordinatorError>((state, lease))
        })
        .expect("load");
    assert_eq!(state, TaskState::Claimed);
    assert_eq!(
        lease.map(|lease| lease.token),
        Some(LeaseToken::new("restart-token")),
    );
}

/// Tests the first sweep after a restart expires everything that lapsed
/// while the process was down.
#[test]
fn test_sweep_catches_up_after_restart() {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteStoreConfig::for_path(dir.path().join("tascade.db"));
    let coordinator = Coordinator::new(CoordinatorConfig::default());

    let task_id = {
        let store = SqliteStore::open(&config).expect("open");
        let (_, task) = seed(&store, &coordinator);
        store
            .with_tx(|tx| {
                coordinator.claim_task(tx, &ClaimRequest {
                    task: TaskRef::by_id(task.id),
                    agent_id: AgentId::new("alice"),
                    capabilities: None,
                    token: LeaseToken::new("lapsing"),
                    now: t(10),
                })
            })
            .expect("claim");
        task.id
    };

    let reopened = SqliteStore::open(&config).expect("reopen");
    let report = reopened
        .with_tx(|tx| coordinator.sweep_expired(tx, t(10).plus_secs(3_600)))
        .expect("sweep");
    assert_eq!(report.leases_expired, 1);
    let state = reopened
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(tx.task(task_id)?.expect("task").state)
        })
        .expect("load");
    assert_eq!(state, TaskState::Ready);
}

// ============================================================================
// SECTION: Replay Parity
// ============================================================================

/// Tests replaying the durable log reproduces the durable task states.
#[test]
fn test_replay_matches_durable_state() {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteStoreConfig::for_path(dir.path().join("tascade.db"));
    let coordinator = Coordinator::new(CoordinatorConfig::default());
    let store = SqliteStore::open(&config).expect("open");
    let (project, task) = seed(&store, &coordinator);
    store
        .with_tx(|tx| {
            coordinator.claim_task(tx, &ClaimRequest {
                task: TaskRef::by_id(task.id),
                agent_id: AgentId::new("alice"),
                capabilities: None,
                token: LeaseToken::new("replayed"),
                now: t(10),
            })
        })
        .expect("claim");

    let (events, live_states) = store
        .with_tx(|tx| {
            let events = tx.events_after(project.id, EventSeq::ORIGIN, 100_000)?;
            let states: Vec<(tascade_core::TaskId, TaskState)> = tx
                .list_tasks(project.id)?
                .into_iter()
                .map(|task| (task.id, task.state))
                .collect();
            Ok::<_, CoordinatorError>((events, states))
        })
        .expect("read");

    let projection = Projection::replay(events.iter());
    for (task_id, state) in live_states {
        assert_eq!(projection.task_states.get(&task_id), Some(&state));
    }
}
