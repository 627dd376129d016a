// crates/tascade-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Migrations, row round trips, invariant indexes, rollback.
// ============================================================================
//! ## Overview
//! Validates the durable store: idempotent bootstrap, record round trips,
//! the partial unique indexes behind the at-most-one-active invariants,
//! per-project event sequences, and transaction rollback on error.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use tascade_core::AgentId;
use tascade_core::EntityKind;
use tascade_core::EventKind;
use tascade_core::EventSeq;
use tascade_core::FencingToken;
use tascade_core::Lease;
use tascade_core::LeaseId;
use tascade_core::LeaseStatus;
use tascade_core::LeaseToken;
use tascade_core::NewEvent;
use tascade_core::PlanVersion;
use tascade_core::Project;
use tascade_core::ProjectId;
use tascade_core::ProjectStatus;
use tascade_core::ShortId;
use tascade_core::StoreError;
use tascade_core::Task;
use tascade_core::TaskClass;
use tascade_core::TaskId;
use tascade_core::TaskState;
use tascade_core::Timestamp;
use tascade_core::WorkSpec;
use tascade_store_sqlite::SqliteStore;
use tascade_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

/// Opens a store in a fresh temp directory.
fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteStoreConfig::for_path(dir.path().join("tascade.db"));
    let store = SqliteStore::open(&config).expect("open");
    (dir, store)
}

/// Builds a timestamp from raw millis.
const fn t(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// Inserts a minimal project row.
fn seed_project(store: &SqliteStore, raw_id: u64, name: &str) -> Project {
    let project = Project {
        id: ProjectId::from_raw(raw_id).expect("id"),
        name: name.to_string(),
        status: ProjectStatus::Active,
        current_plan_version: PlanVersion::INITIAL,
        created_at: t(1),
    };
    store
        .with_tx(|tx| tx.insert_project(&project))
        .expect("insert project");
    project
}

/// Builds a minimal task row for direct insertion.
fn seed_task(project: &Project, raw_id: u64, short: ShortId) -> Task {
    Task {
        id: TaskId::from_raw(raw_id).expect("id"),
        project_id: project.id,
        phase_id: tascade_core::PhaseId::from_raw(1).expect("id"),
        milestone_id: tascade_core::MilestoneId::from_raw(1).expect("id"),
        short_id: short,
        title: "row".to_string(),
        description: String::new(),
        state: TaskState::Backlog,
        priority: 0,
        task_class: TaskClass::Other,
        capability_tags: std::collections::BTreeSet::new(),
        expected_touches: Vec::new(),
        exclusive_paths: Vec::new(),
        shared_paths: Vec::new(),
        work_spec: WorkSpec {
            objective: "persist".to_string(),
            ..WorkSpec::default()
        },
        introduced_in_plan_version: PlanVersion::INITIAL,
        deprecated_in_plan_version: None,
        version: 1,
        created_at: t(1),
        updated_at: t(1),
    }
}

/// Builds a lease row.
fn lease_row(raw_id: u64, task: TaskId, status: LeaseStatus, token: &str) -> Lease {
    Lease {
        id: LeaseId::from_raw(raw_id).expect("id"),
        task_id: task,
        agent_id: AgentId::new("alice"),
        token: LeaseToken::new(token),
        fencing: FencingToken::new(raw_id),
        status,
        granted_at: t(10),
        expires_at: t(10).plus_secs(900),
        heartbeat_at: t(10),
    }
}

// ============================================================================
// SECTION: Bootstrap
// ============================================================================

/// Tests reopening an existing database is a migration no-op.
#[test]
fn test_migrations_are_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let config = SqliteStoreConfig::for_path(dir.path().join("tascade.db"));
    let store = SqliteStore::open(&config).expect("first open");
    seed_project(&store, 1, "alpha");
    drop(store);

    let reopened = SqliteStore::open(&config).expect("second open");
    reopened.migrate(&config).expect("explicit re-migrate");
    let loaded = reopened
        .with_tx(|tx| tx.project(ProjectId::from_raw(1).expect("id")))
        .expect("load");
    assert_eq!(loaded.map(|project| project.name), Some("alpha".to_string()));
}

// ============================================================================
// SECTION: Round Trips
// ============================================================================

/// Tests task rows survive a full serialize/deserialize round trip with
/// optimistic versioning.
#[test]
fn test_task_round_trip_and_version_guard() {
    let (_dir, store) = open_store();
    let project = seed_project(&store, 1, "alpha");
    let task = seed_task(&project, 1, ShortId::task(1, 1, 1));
    store.with_tx(|tx| tx.insert_task(&task)).expect("insert");

    let loaded = store
        .with_tx(|tx| tx.task(task.id))
        .expect("load")
        .expect("present");
    assert_eq!(loaded, task);

    let mut updated = loaded;
    updated.state = TaskState::Ready;
    updated.version = 2;
    let applied = store
        .with_tx(|tx| tx.update_task(&updated, 1))
        .expect("update");
    assert!(applied);
    let stale = store
        .with_tx(|tx| tx.update_task(&updated, 1))
        .expect("stale update");
    assert!(!stale, "stale version must not apply");
}

/// Tests short-id lookups are project scoped and cross-project ambiguity is
/// observable.
#[test]
fn test_short_id_lookup_scoping() {
    let (_dir, store) = open_store();
    let alpha = seed_project(&store, 1, "alpha");
    let beta = seed_project(&store, 2, "beta");
    store
        .with_tx(|tx| tx.insert_task(&seed_task(&alpha, 1, ShortId::task(1, 1, 1))))
        .expect("insert");
    store
        .with_tx(|tx| tx.insert_task(&seed_task(&beta, 2, ShortId::task(1, 1, 1))))
        .expect("insert");

    let scoped = store
        .with_tx(|tx| tx.task_by_short_id(alpha.id, "P1.M1.T1"))
        .expect("scoped")
        .expect("present");
    assert_eq!(scoped.project_id, alpha.id);

    let all = store
        .with_tx(|tx| tx.tasks_by_short_id("P1.M1.T1"))
        .expect("unscoped");
    assert_eq!(all.len(), 2);
}

// ============================================================================
// SECTION: Invariant Indexes
// ============================================================================

/// Tests the partial unique index rejects a second active lease per task.
#[test]
fn test_one_active_lease_per_task() {
    let (_dir, store) = open_store();
    let project = seed_project(&store, 1, "alpha");
    let task = seed_task(&project, 1, ShortId::task(1, 1, 1));
    store.with_tx(|tx| tx.insert_task(&task)).expect("insert task");
    store
        .with_tx(|tx| tx.insert_lease(&lease_row(1, task.id, LeaseStatus::Active, "one")))
        .expect("first lease");
    let second = store
        .with_tx(|tx| tx.insert_lease(&lease_row(2, task.id, LeaseStatus::Active, "two")));
    assert!(second.is_err(), "second active lease must be rejected");

    // Non-active leases coexist freely.
    store
        .with_tx(|tx| tx.insert_lease(&lease_row(3, task.id, LeaseStatus::Released, "three")))
        .expect("released lease");
    let max = store.with_tx(|tx| tx.max_fencing(task.id)).expect("fencing");
    assert_eq!(max, 3);
}

// ============================================================================
// SECTION: Events and Rollback
// ============================================================================

/// Tests per-project event sequences are monotonic and cursor reads page in
/// order.
#[test]
fn test_event_sequences_per_project() {
    let (_dir, store) = open_store();
    let alpha = seed_project(&store, 1, "alpha");
    let beta = seed_project(&store, 2, "beta");

    for (project, count) in [(&alpha, 3_u64), (&beta, 2_u64)] {
        for index in 0..count {
            store
                .with_tx(|tx| {
                    tx.append_event(&NewEvent {
                        project_id: project.id,
                        entity_kind: EntityKind::Project,
                        entity_id: project.id.to_string(),
                        kind: EventKind::ProjectCreated,
                        payload: serde_json::json!({ "index": index }),
                        actor: "test".to_string(),
                        recorded_at: t(100),
                    })
                })
                .expect("append");
        }
    }

    let alpha_events = store
        .with_tx(|tx| tx.events_after(alpha.id, EventSeq::ORIGIN, 100))
        .expect("read");
    assert_eq!(
        alpha_events.iter().map(|event| event.seq.get()).collect::<Vec<_>>(),
        vec![1, 2, 3],
    );
    let beta_tail = store
        .with_tx(|tx| tx.events_after(beta.id, EventSeq::new(1), 100))
        .expect("read");
    assert_eq!(beta_tail.len(), 1);
    assert_eq!(beta_tail[0].seq.get(), 2);
}

/// Tests an erroring transaction leaves no partial writes behind.
#[test]
fn test_rollback_on_error() {
    let (_dir, store) = open_store();
    let project = seed_project(&store, 1, "alpha");

    let result: Result<(), StoreError> = store.with_tx(|tx| {
        tx.insert_task(&seed_task(&project, 1, ShortId::task(1, 1, 1)))?;
        Err(StoreError::Invalid("forced failure".to_string()))
    });
    assert!(result.is_err());

    let task = store
        .with_tx(|tx| tx.task(TaskId::from_raw(1).expect("id")))
        .expect("load");
    assert!(task.is_none(), "rolled-back task must not persist");
}

/// Tests scoped counters allocate sequentially and never renumber.
#[test]
fn test_scope_counters_are_sequential() {
    let (_dir, store) = open_store();
    let project = seed_project(&store, 1, "alpha");
    let first = store
        .with_tx(|tx| tx.next_phase_index(project.id))
        .expect("alloc");
    let second = store
        .with_tx(|tx| tx.next_phase_index(project.id))
        .expect("alloc");
    assert_eq!((first, second), (1, 2));

    // A rolled-back allocation burns nothing observable after restart.
    let _: Result<u32, StoreError> = store.with_tx(|tx| {
        let _ = tx.next_phase_index(project.id)?;
        Err(StoreError::Invalid("abort".to_string()))
    });
    let third = store
        .with_tx(|tx| tx.next_phase_index(project.id))
        .expect("alloc");
    assert_eq!(third, 3);
}
