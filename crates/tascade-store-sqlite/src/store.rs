// crates/tascade-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Kernel Store
// Description: Durable KernelTx backed by SQLite WAL with idempotent
//              migrations.
// Purpose: Persist the Tascade graph with serializable kernel operations.
// Dependencies: tascade-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable [`KernelTx`] seam over `SQLite`. Every
//! kernel operation runs inside one immediate transaction: SQLite's single
//! writer serializes mutations, which subsumes the project-scoped advisory
//! locks the kernel's cycle checks and changeset applies rely on. Rows store
//! their canonical JSON record next to the columns the indexes need;
//! partial unique indexes enforce the at-most-one-active invariants for
//! leases and reservations at the storage layer as well.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tascade_core::ApiKey;
use tascade_core::Artifact;
use tascade_core::ArtifactId;
use tascade_core::AttemptId;
use tascade_core::ChangeSetId;
use tascade_core::DependencyEdge;
use tascade_core::EntityKind;
use tascade_core::EventRecord;
use tascade_core::EventSeq;
use tascade_core::ExecutionSnapshot;
use tascade_core::GateCandidateLink;
use tascade_core::GateDecision;
use tascade_core::GateRule;
use tascade_core::GateRuleId;
use tascade_core::IdKind;
use tascade_core::IntegrationAttempt;
use tascade_core::KernelTx;
use tascade_core::Lease;
use tascade_core::LeaseId;
use tascade_core::LeaseToken;
use tascade_core::Milestone;
use tascade_core::MilestoneId;
use tascade_core::NewEvent;
use tascade_core::Phase;
use tascade_core::PhaseId;
use tascade_core::PlanChangeSet;
use tascade_core::PlanVersionRecord;
use tascade_core::Project;
use tascade_core::ProjectId;
use tascade_core::Reservation;
use tascade_core::ReservationId;
use tascade_core::StoreError;
use tascade_core::Task;
use tascade_core::TaskChangelogEntry;
use tascade_core::TaskId;
use tascade_core::Timestamp;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Built-in schema migrations applied in order at open time.
const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_0001_BASE)];

/// Base schema: every entity table, the sequence allocators, and the
/// partial unique indexes backing the at-most-one-active invariants.
const MIGRATION_0001_BASE: &str = "
CREATE TABLE IF NOT EXISTS id_sequences (
    kind TEXT PRIMARY KEY,
    next INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS scope_sequences (
    scope_kind TEXT NOT NULL,
    scope_id INTEGER NOT NULL,
    next INTEGER NOT NULL,
    PRIMARY KEY (scope_kind, scope_id)
);
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS phases (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    sequence INTEGER NOT NULL,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS milestones (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    phase_id INTEGER NOT NULL REFERENCES phases(id),
    sequence INTEGER NOT NULL,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    short_id TEXT NOT NULL,
    state TEXT NOT NULL,
    version INTEGER NOT NULL,
    record TEXT NOT NULL,
    UNIQUE (project_id, short_id)
);
CREATE INDEX IF NOT EXISTS ix_tasks_short ON tasks(short_id);
CREATE TABLE IF NOT EXISTS edges (
    from_task INTEGER NOT NULL REFERENCES tasks(id),
    to_task INTEGER NOT NULL REFERENCES tasks(id),
    project_id INTEGER NOT NULL REFERENCES projects(id),
    record TEXT NOT NULL,
    PRIMARY KEY (from_task, to_task)
);
CREATE TABLE IF NOT EXISTS leases (
    id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    status TEXT NOT NULL,
    token TEXT NOT NULL,
    fencing INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    record TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_leases_active
    ON leases(task_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS ix_leases_token ON leases(token);
CREATE TABLE IF NOT EXISTS reservations (
    id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    status TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    record TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_reservations_active
    ON reservations(task_id) WHERE status = 'active';
CREATE TABLE IF NOT EXISTS artifacts (
    id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attempts (
    id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    result TEXT NOT NULL,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS gate_rules (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS gate_decisions (
    id INTEGER PRIMARY KEY,
    gate_task_id INTEGER NOT NULL REFERENCES tasks(id),
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS gate_links (
    gate_task_id INTEGER NOT NULL REFERENCES tasks(id),
    candidate_task_id INTEGER NOT NULL REFERENCES tasks(id),
    position INTEGER NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (gate_task_id, candidate_task_id)
);
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    lease_id INTEGER NOT NULL REFERENCES leases(id),
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS changesets (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS plan_versions (
    project_id INTEGER NOT NULL REFERENCES projects(id),
    version INTEGER NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (project_id, version)
);
CREATE TABLE IF NOT EXISTS changelog (
    id INTEGER PRIMARY KEY,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    project_id INTEGER NOT NULL REFERENCES projects(id),
    seq INTEGER NOT NULL,
    entity_kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (project_id, seq)
);
CREATE INDEX IF NOT EXISTS ix_events_entity
    ON events(project_id, entity_kind, entity_id, seq);
CREATE TABLE IF NOT EXISTS api_keys (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    fingerprint TEXT NOT NULL UNIQUE,
    record TEXT NOT NULL
);
";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the `SQLite` kernel store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// Optional directory of `*.sql` migrations overriding the built-ins.
    #[serde(default)]
    pub migrations_dir: Option<PathBuf>,
}

impl SqliteStoreConfig {
    /// Builds a config with defaults for the given database path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            migrations_dir: None,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding record payloads or credentials.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or serialization mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Invalid store configuration or data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a `rusqlite` error into the store error space.
fn db_err(error: &rusqlite::Error) -> StoreError {
    StoreError::Store(error.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed kernel store with WAL support.
///
/// # Invariants
/// - Connection access is serialized through a mutex; every kernel
///   operation runs in one immediate transaction.
#[derive(Clone)]
pub struct SqliteStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database, applies pragmas, and runs the
    /// idempotent migrations.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the file cannot be opened or a
    /// migration fails.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        }
        let connection = Connection::open(&config.path)
            .map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .execute_batch(&format!(
                "PRAGMA journal_mode = {};",
                config.journal_mode.pragma_value()
            ))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let store = Self {
            connection: Arc::new(Mutex::new(connection)),
        };
        store.migrate(config)?;
        Ok(store)
    }

    /// Applies pending migrations inside one transaction. Re-running against
    /// an up-to-date database is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when a migration statement fails.
    pub fn migrate(&self, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
        let migrations = match &config.migrations_dir {
            Some(dir) => load_migrations_dir(dir)?,
            None => MIGRATIONS
                .iter()
                .map(|(version, sql)| (*version, (*sql).to_string()))
                .collect(),
        };
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("connection mutex poisoned".to_string()))?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        for (version, sql) in &migrations {
            let applied: Option<i64> = tx
                .query_row(
                    "SELECT version FROM schema_migrations WHERE version = ?1",
                    params![version],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if applied.is_some() {
                continue;
            }
            tx.execute_batch(sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at)
                 VALUES (?1, strftime('%s', 'now') * 1000)",
                params![version],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }

    /// Runs one kernel operation in a single immediate transaction,
    /// committing on success and rolling back on error.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error; commit failures surface as store
    /// faults.
    pub fn with_tx<T, E>(
        &self,
        operation: impl FnOnce(&mut dyn KernelTx) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| StoreError::Store("connection mutex poisoned".to_string()))?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_err(&err))?;
        let mut handle = SqliteTx {
            tx,
        };
        match operation(&mut handle) {
            Ok(value) => {
                let SqliteTx {
                    tx,
                } = handle;
                tx.commit().map_err(|err| db_err(&err))?;
                Ok(value)
            }
            Err(error) => {
                // Dropping the transaction rolls it back.
                Err(error)
            }
        }
    }
}

/// Loads `*.sql` migrations from a directory, ordered by file name.
fn load_migrations_dir(dir: &Path) -> Result<Vec<(i64, String)>, SqliteStoreError> {
    let mut names: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|err| SqliteStoreError::Io(err.to_string()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    names.sort();
    let mut migrations = Vec::with_capacity(names.len());
    for (index, path) in names.iter().enumerate() {
        let sql =
            std::fs::read_to_string(path).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        let version = i64::try_from(index)
            .map_err(|_| SqliteStoreError::Invalid("too many migrations".to_string()))?
            .saturating_add(1);
        migrations.push((version, sql));
    }
    Ok(migrations)
}

// ============================================================================
// SECTION: Transaction Handle
// ============================================================================

/// One open kernel transaction over the shared connection.
struct SqliteTx<'conn> {
    /// Underlying `SQLite` transaction; dropped without commit on error.
    tx: rusqlite::Transaction<'conn>,
}

/// Stable label for an identifier family.
const fn id_kind_label(kind: IdKind) -> &'static str {
    match kind {
        IdKind::Project => "project",
        IdKind::Phase => "phase",
        IdKind::Milestone => "milestone",
        IdKind::Task => "task",
        IdKind::Lease => "lease",
        IdKind::Reservation => "reservation",
        IdKind::Artifact => "artifact",
        IdKind::Attempt => "attempt",
        IdKind::GateRule => "gate_rule",
        IdKind::GateDecision => "gate_decision",
        IdKind::ChangeSet => "changeset",
        IdKind::Snapshot => "snapshot",
        IdKind::ApiKey => "api_key",
        IdKind::ChangelogEntry => "changelog_entry",
    }
}

/// Serializes a record to its canonical JSON column value.
fn to_record<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Deserializes a record column back into its type.
fn from_record<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Corrupt(err.to_string()))
}

/// Converts an id to the i64 column form.
fn col(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

impl SqliteTx<'_> {
    /// Bumps and returns a counter row in `scope_sequences`.
    fn next_scope_index(&mut self, scope_kind: &str, scope_id: u64) -> Result<u32, StoreError> {
        let next: i64 = self
            .tx
            .query_row(
                "INSERT INTO scope_sequences (scope_kind, scope_id, next)
                 VALUES (?1, ?2, 1)
                 ON CONFLICT (scope_kind, scope_id) DO UPDATE SET next = next + 1
                 RETURNING next",
                params![scope_kind, col(scope_id)],
                |row| row.get(0),
            )
            .map_err(|err| db_err(&err))?;
        u32::try_from(next).map_err(|_| StoreError::Corrupt("scope counter overflow".to_string()))
    }

    /// Loads a single record column by query.
    fn load_one<T: DeserializeOwned>(
        &mut self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self
            .tx
            .query_row(sql, args, |row| row.get(0))
            .optional()
            .map_err(|err| db_err(&err))?;
        raw.as_deref().map(from_record).transpose()
    }

    /// Loads all record columns returned by a query.
    fn load_many<T: DeserializeOwned>(
        &mut self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<T>, StoreError> {
        let mut statement = self.tx.prepare(sql).map_err(|err| db_err(&err))?;
        let rows = statement
            .query_map(args, |row| row.get::<_, String>(0))
            .map_err(|err| db_err(&err))?;
        let mut records = Vec::new();
        for raw in rows {
            let raw = raw.map_err(|err| db_err(&err))?;
            records.push(from_record(&raw)?);
        }
        Ok(records)
    }

    /// Executes a statement, mapping engine errors.
    fn exec(&mut self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<usize, StoreError> {
        self.tx.execute(sql, args).map_err(|err| db_err(&err))
    }
}

// ============================================================================
// SECTION: KernelTx Implementation
// ============================================================================

#[allow(
    clippy::missing_errors_doc,
    reason = "Trait-level error contract documented on KernelTx."
)]
impl KernelTx for SqliteTx<'_> {
    fn allocate_id(&mut self, kind: IdKind) -> Result<u64, StoreError> {
        let next: i64 = self
            .tx
            .query_row(
                "INSERT INTO id_sequences (kind, next) VALUES (?1, 1)
                 ON CONFLICT (kind) DO UPDATE SET next = next + 1
                 RETURNING next",
                params![id_kind_label(kind)],
                |row| row.get(0),
            )
            .map_err(|err| db_err(&err))?;
        u64::try_from(next).map_err(|_| StoreError::Corrupt("id counter overflow".to_string()))
    }

    fn next_phase_index(&mut self, project_id: ProjectId) -> Result<u32, StoreError> {
        self.next_scope_index("project_phases", project_id.get())
    }

    fn next_milestone_index(&mut self, phase_id: PhaseId) -> Result<u32, StoreError> {
        self.next_scope_index("phase_milestones", phase_id.get())
    }

    fn next_task_index(&mut self, milestone_id: MilestoneId) -> Result<u32, StoreError> {
        self.next_scope_index("milestone_tasks", milestone_id.get())
    }

    fn insert_project(&mut self, project: &Project) -> Result<(), StoreError> {
        let record = to_record(project)?;
        self.exec(
            "INSERT INTO projects (id, name, record) VALUES (?1, ?2, ?3)",
            &[&col(project.id.get()), &project.name, &record],
        )?;
        Ok(())
    }

    fn project(&mut self, project_id: ProjectId) -> Result<Option<Project>, StoreError> {
        self.load_one("SELECT record FROM projects WHERE id = ?1", &[&col(project_id.get())])
    }

    fn project_by_name(&mut self, name: &str) -> Result<Option<Project>, StoreError> {
        self.load_one("SELECT record FROM projects WHERE name = ?1", &[&name])
    }

    fn list_projects(&mut self) -> Result<Vec<Project>, StoreError> {
        self.load_many("SELECT record FROM projects ORDER BY id", &[])
    }

    fn update_project(&mut self, project: &Project) -> Result<(), StoreError> {
        let record = to_record(project)?;
        self.exec(
            "UPDATE projects SET name = ?2, record = ?3 WHERE id = ?1",
            &[&col(project.id.get()), &project.name, &record],
        )?;
        Ok(())
    }

    fn insert_phase(&mut self, phase: &Phase) -> Result<(), StoreError> {
        let record = to_record(phase)?;
        self.exec(
            "INSERT INTO phases (id, project_id, sequence, record) VALUES (?1, ?2, ?3, ?4)",
            &[
                &col(phase.id.get()),
                &col(phase.project_id.get()),
                &phase.sequence,
                &record,
            ],
        )?;
        Ok(())
    }

    fn phase(&mut self, phase_id: PhaseId) -> Result<Option<Phase>, StoreError> {
        self.load_one("SELECT record FROM phases WHERE id = ?1", &[&col(phase_id.get())])
    }

    fn list_phases(&mut self, project_id: ProjectId) -> Result<Vec<Phase>, StoreError> {
        self.load_many(
            "SELECT record FROM phases WHERE project_id = ?1 ORDER BY sequence, id",
            &[&col(project_id.get())],
        )
    }

    fn update_phase(&mut self, phase: &Phase) -> Result<(), StoreError> {
        let record = to_record(phase)?;
        self.exec(
            "UPDATE phases SET sequence = ?2, record = ?3 WHERE id = ?1",
            &[&col(phase.id.get()), &phase.sequence, &record],
        )?;
        Ok(())
    }

    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        let record = to_record(milestone)?;
        self.exec(
            "INSERT INTO milestones (id, project_id, phase_id, sequence, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            &[
                &col(milestone.id.get()),
                &col(milestone.project_id.get()),
                &col(milestone.phase_id.get()),
                &milestone.sequence,
                &record,
            ],
        )?;
        Ok(())
    }

    fn milestone(&mut self, milestone_id: MilestoneId) -> Result<Option<Milestone>, StoreError> {
        self.load_one(
            "SELECT record FROM milestones WHERE id = ?1",
            &[&col(milestone_id.get())],
        )
    }

    fn list_milestones(&mut self, project_id: ProjectId) -> Result<Vec<Milestone>, StoreError> {
        self.load_many(
            "SELECT record FROM milestones WHERE project_id = ?1 ORDER BY phase_id, sequence, id",
            &[&col(project_id.get())],
        )
    }

    fn update_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        let record = to_record(milestone)?;
        self.exec(
            "UPDATE milestones SET sequence = ?2, record = ?3 WHERE id = ?1",
            &[&col(milestone.id.get()), &milestone.sequence, &record],
        )?;
        Ok(())
    }

    fn insert_task(&mut self, task: &Task) -> Result<(), StoreError> {
        let record = to_record(task)?;
        self.exec(
            "INSERT INTO tasks (id, project_id, short_id, state, version, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            &[
                &col(task.id.get()),
                &col(task.project_id.get()),
                &task.short_id.to_string(),
                &task.state.as_str(),
                &col(task.version),
                &record,
            ],
        )?;
        Ok(())
    }

    fn task(&mut self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        self.load_one("SELECT record FROM tasks WHERE id = ?1", &[&col(task_id.get())])
    }

    fn task_by_short_id(
        &mut self,
        project_id: ProjectId,
        short_id: &str,
    ) -> Result<Option<Task>, StoreError> {
        self.load_one(
            "SELECT record FROM tasks WHERE project_id = ?1 AND short_id = ?2",
            &[&col(project_id.get()), &short_id],
        )
    }

    fn tasks_by_short_id(&mut self, short_id: &str) -> Result<Vec<Task>, StoreError> {
        self.load_many(
            "SELECT record FROM tasks WHERE short_id = ?1 ORDER BY id",
            &[&short_id],
        )
    }

    fn list_tasks(&mut self, project_id: ProjectId) -> Result<Vec<Task>, StoreError> {
        self.load_many(
            "SELECT record FROM tasks WHERE project_id = ?1 ORDER BY id",
            &[&col(project_id.get())],
        )
    }

    fn update_task(&mut self, task: &Task, expected_version: u64) -> Result<bool, StoreError> {
        let record = to_record(task)?;
        let changed = self.exec(
            "UPDATE tasks SET short_id = ?2, state = ?3, version = ?4, record = ?5
             WHERE id = ?1 AND version = ?6",
            &[
                &col(task.id.get()),
                &task.short_id.to_string(),
                &task.state.as_str(),
                &col(task.version),
                &record,
                &col(expected_version),
            ],
        )?;
        Ok(changed == 1)
    }

    fn insert_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        let record = to_record(edge)?;
        self.exec(
            "INSERT INTO edges (from_task, to_task, project_id, record)
             VALUES (?1, ?2, ?3, ?4)",
            &[
                &col(edge.from_task.get()),
                &col(edge.to_task.get()),
                &col(edge.project_id.get()),
                &record,
            ],
        )?;
        Ok(())
    }

    fn edge(
        &mut self,
        from_task: TaskId,
        to_task: TaskId,
    ) -> Result<Option<DependencyEdge>, StoreError> {
        self.load_one(
            "SELECT record FROM edges WHERE from_task = ?1 AND to_task = ?2",
            &[&col(from_task.get()), &col(to_task.get())],
        )
    }

    fn list_edges(&mut self, project_id: ProjectId) -> Result<Vec<DependencyEdge>, StoreError> {
        self.load_many(
            "SELECT record FROM edges WHERE project_id = ?1 ORDER BY from_task, to_task",
            &[&col(project_id.get())],
        )
    }

    fn update_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        let record = to_record(edge)?;
        self.exec(
            "UPDATE edges SET record = ?3 WHERE from_task = ?1 AND to_task = ?2",
            &[&col(edge.from_task.get()), &col(edge.to_task.get()), &record],
        )?;
        Ok(())
    }

    fn insert_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        let record = to_record(lease)?;
        self.exec(
            "INSERT INTO leases (id, task_id, status, token, fencing, expires_at, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            &[
                &col(lease.id.get()),
                &col(lease.task_id.get()),
                &lease.status.as_str(),
                &lease.token.as_str(),
                &col(lease.fencing.get()),
                &lease.expires_at.as_unix_millis(),
                &record,
            ],
        )?;
        Ok(())
    }

    fn lease(&mut self, lease_id: LeaseId) -> Result<Option<Lease>, StoreError> {
        self.load_one("SELECT record FROM leases WHERE id = ?1", &[&col(lease_id.get())])
    }

    fn active_lease_for_task(&mut self, task_id: TaskId) -> Result<Option<Lease>, StoreError> {
        self.load_one(
            "SELECT record FROM leases WHERE task_id = ?1 AND status = 'active'",
            &[&col(task_id.get())],
        )
    }

    fn lease_by_token(&mut self, token: &LeaseToken) -> Result<Option<Lease>, StoreError> {
        self.load_one(
            "SELECT record FROM leases WHERE token = ?1 ORDER BY id DESC LIMIT 1",
            &[&token.as_str()],
        )
    }

    fn update_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        let record = to_record(lease)?;
        self.exec(
            "UPDATE leases SET status = ?2, expires_at = ?3, record = ?4 WHERE id = ?1",
            &[
                &col(lease.id.get()),
                &lease.status.as_str(),
                &lease.expires_at.as_unix_millis(),
                &record,
            ],
        )?;
        Ok(())
    }

    fn list_expired_active_leases(&mut self, now: Timestamp) -> Result<Vec<Lease>, StoreError> {
        self.load_many(
            "SELECT record FROM leases
             WHERE status = 'active' AND expires_at < ?1 ORDER BY id",
            &[&now.as_unix_millis()],
        )
    }

    fn active_leases(&mut self, project_id: ProjectId) -> Result<Vec<Lease>, StoreError> {
        self.load_many(
            "SELECT leases.record FROM leases
             JOIN tasks ON tasks.id = leases.task_id
             WHERE tasks.project_id = ?1 AND leases.status = 'active'
             ORDER BY leases.id",
            &[&col(project_id.get())],
        )
    }

    fn max_fencing(&mut self, task_id: TaskId) -> Result<u64, StoreError> {
        let max: Option<i64> = self
            .tx
            .query_row(
                "SELECT MAX(fencing) FROM leases WHERE task_id = ?1",
                params![col(task_id.get())],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_err(&err))?
            .flatten();
        Ok(max.and_then(|value| u64::try_from(value).ok()).unwrap_or(0))
    }

    fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        let record = to_record(reservation)?;
        self.exec(
            "INSERT INTO reservations (id, task_id, status, expires_at, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            &[
                &col(reservation.id.get()),
                &col(reservation.task_id.get()),
                &reservation.status.as_str(),
                &reservation.expires_at.as_unix_millis(),
                &record,
            ],
        )?;
        Ok(())
    }

    fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        self.load_one(
            "SELECT record FROM reservations WHERE id = ?1",
            &[&col(reservation_id.get())],
        )
    }

    fn active_reservation_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Option<Reservation>, StoreError> {
        self.load_one(
            "SELECT record FROM reservations WHERE task_id = ?1 AND status = 'active'",
            &[&col(task_id.get())],
        )
    }

    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        let record = to_record(reservation)?;
        self.exec(
            "UPDATE reservations SET status = ?2, expires_at = ?3, record = ?4 WHERE id = ?1",
            &[
                &col(reservation.id.get()),
                &reservation.status.as_str(),
                &reservation.expires_at.as_unix_millis(),
                &record,
            ],
        )?;
        Ok(())
    }

    fn list_expired_active_reservations(
        &mut self,
        now: Timestamp,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.load_many(
            "SELECT record FROM reservations
             WHERE status = 'active' AND expires_at < ?1 ORDER BY id",
            &[&now.as_unix_millis()],
        )
    }

    fn active_reservations(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.load_many(
            "SELECT reservations.record FROM reservations
             JOIN tasks ON tasks.id = reservations.task_id
             WHERE tasks.project_id = ?1 AND reservations.status = 'active'
             ORDER BY reservations.id",
            &[&col(project_id.get())],
        )
    }

    fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), StoreError> {
        let record = to_record(artifact)?;
        self.exec(
            "INSERT INTO artifacts (id, task_id, record) VALUES (?1, ?2, ?3)",
            &[&col(artifact.id.get()), &col(artifact.task_id.get()), &record],
        )?;
        Ok(())
    }

    fn artifact(&mut self, artifact_id: ArtifactId) -> Result<Option<Artifact>, StoreError> {
        self.load_one("SELECT record FROM artifacts WHERE id = ?1", &[&col(artifact_id.get())])
    }

    fn list_artifacts(&mut self, task_id: TaskId) -> Result<Vec<Artifact>, StoreError> {
        self.load_many(
            "SELECT record FROM artifacts WHERE task_id = ?1 ORDER BY id",
            &[&col(task_id.get())],
        )
    }

    fn insert_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        let record = to_record(attempt)?;
        self.exec(
            "INSERT INTO attempts (id, task_id, result, record) VALUES (?1, ?2, ?3, ?4)",
            &[
                &col(attempt.id.get()),
                &col(attempt.task_id.get()),
                &attempt.result.as_str(),
                &record,
            ],
        )?;
        Ok(())
    }

    fn attempt(
        &mut self,
        attempt_id: AttemptId,
    ) -> Result<Option<IntegrationAttempt>, StoreError> {
        self.load_one("SELECT record FROM attempts WHERE id = ?1", &[&col(attempt_id.get())])
    }

    fn update_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        let record = to_record(attempt)?;
        self.exec(
            "UPDATE attempts SET result = ?2, record = ?3 WHERE id = ?1",
            &[&col(attempt.id.get()), &attempt.result.as_str(), &record],
        )?;
        Ok(())
    }

    fn list_attempts(&mut self, task_id: TaskId) -> Result<Vec<IntegrationAttempt>, StoreError> {
        self.load_many(
            "SELECT record FROM attempts WHERE task_id = ?1 ORDER BY id",
            &[&col(task_id.get())],
        )
    }

    fn insert_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError> {
        let record = to_record(rule)?;
        self.exec(
            "INSERT INTO gate_rules (id, project_id, record) VALUES (?1, ?2, ?3)",
            &[&col(rule.id.get()), &col(rule.project_id.get()), &record],
        )?;
        Ok(())
    }

    fn gate_rule(&mut self, rule_id: GateRuleId) -> Result<Option<GateRule>, StoreError> {
        self.load_one("SELECT record FROM gate_rules WHERE id = ?1", &[&col(rule_id.get())])
    }

    fn list_gate_rules(&mut self, project_id: ProjectId) -> Result<Vec<GateRule>, StoreError> {
        self.load_many(
            "SELECT record FROM gate_rules WHERE project_id = ?1 ORDER BY id",
            &[&col(project_id.get())],
        )
    }

    fn update_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError> {
        let record = to_record(rule)?;
        self.exec(
            "UPDATE gate_rules SET record = ?2 WHERE id = ?1",
            &[&col(rule.id.get()), &record],
        )?;
        Ok(())
    }

    fn insert_gate_decision(&mut self, decision: &GateDecision) -> Result<(), StoreError> {
        let record = to_record(decision)?;
        self.exec(
            "INSERT INTO gate_decisions (id, gate_task_id, record) VALUES (?1, ?2, ?3)",
            &[&col(decision.id.get()), &col(decision.gate_task_id.get()), &record],
        )?;
        Ok(())
    }

    fn list_gate_decisions(
        &mut self,
        gate_task_id: TaskId,
    ) -> Result<Vec<GateDecision>, StoreError> {
        self.load_many(
            "SELECT record FROM gate_decisions WHERE gate_task_id = ?1 ORDER BY id",
            &[&col(gate_task_id.get())],
        )
    }

    fn insert_gate_link(&mut self, link: &GateCandidateLink) -> Result<(), StoreError> {
        let record = to_record(link)?;
        self.exec(
            "INSERT INTO gate_links (gate_task_id, candidate_task_id, position, record)
             VALUES (?1, ?2, ?3, ?4)",
            &[
                &col(link.gate_task_id.get()),
                &col(link.candidate_task_id.get()),
                &link.position,
                &record,
            ],
        )?;
        Ok(())
    }

    fn links_for_gate(
        &mut self,
        gate_task_id: TaskId,
    ) -> Result<Vec<GateCandidateLink>, StoreError> {
        self.load_many(
            "SELECT record FROM gate_links WHERE gate_task_id = ?1 ORDER BY position",
            &[&col(gate_task_id.get())],
        )
    }

    fn links_for_candidate(
        &mut self,
        candidate_task_id: TaskId,
    ) -> Result<Vec<GateCandidateLink>, StoreError> {
        self.load_many(
            "SELECT record FROM gate_links WHERE candidate_task_id = ?1
             ORDER BY gate_task_id, position",
            &[&col(candidate_task_id.get())],
        )
    }

    fn insert_snapshot(&mut self, snapshot: &ExecutionSnapshot) -> Result<(), StoreError> {
        let record = to_record(snapshot)?;
        self.exec(
            "INSERT INTO snapshots (id, task_id, lease_id, record) VALUES (?1, ?2, ?3, ?4)",
            &[
                &col(snapshot.id.get()),
                &col(snapshot.task_id.get()),
                &col(snapshot.lease_id.get()),
                &record,
            ],
        )?;
        Ok(())
    }

    fn latest_snapshot_for_task(
        &mut self,
        task_id: TaskId,
    ) -> Result<Option<ExecutionSnapshot>, StoreError> {
        self.load_one(
            "SELECT record FROM snapshots WHERE task_id = ?1 ORDER BY id DESC LIMIT 1",
            &[&col(task_id.get())],
        )
    }

    fn snapshot_for_lease(
        &mut self,
        lease_id: LeaseId,
    ) -> Result<Option<ExecutionSnapshot>, StoreError> {
        self.load_one(
            "SELECT record FROM snapshots WHERE lease_id = ?1",
            &[&col(lease_id.get())],
        )
    }

    fn insert_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        let record = to_record(changeset)?;
        self.exec(
            "INSERT INTO changesets (id, project_id, record) VALUES (?1, ?2, ?3)",
            &[&col(changeset.id.get()), &col(changeset.project_id.get()), &record],
        )?;
        Ok(())
    }

    fn changeset(
        &mut self,
        changeset_id: ChangeSetId,
    ) -> Result<Option<PlanChangeSet>, StoreError> {
        self.load_one("SELECT record FROM changesets WHERE id = ?1", &[&col(changeset_id.get())])
    }

    fn update_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        let record = to_record(changeset)?;
        self.exec(
            "UPDATE changesets SET record = ?2 WHERE id = ?1",
            &[&col(changeset.id.get()), &record],
        )?;
        Ok(())
    }

    fn list_changesets(
        &mut self,
        project_id: ProjectId,
    ) -> Result<Vec<PlanChangeSet>, StoreError> {
        self.load_many(
            "SELECT record FROM changesets WHERE project_id = ?1 ORDER BY id",
            &[&col(project_id.get())],
        )
    }

    fn insert_plan_version(&mut self, record: &PlanVersionRecord) -> Result<(), StoreError> {
        let payload = to_record(record)?;
        self.exec(
            "INSERT INTO plan_versions (project_id, version, record) VALUES (?1, ?2, ?3)",
            &[&col(record.project_id.get()), &col(record.version.get()), &payload],
        )?;
        Ok(())
    }

    fn insert_changelog_entry(&mut self, entry: &TaskChangelogEntry) -> Result<(), StoreError> {
        let record = to_record(entry)?;
        self.exec(
            "INSERT INTO changelog (id, task_id, record) VALUES (?1, ?2, ?3)",
            &[&col(entry.id.get()), &col(entry.task_id.get()), &record],
        )?;
        Ok(())
    }

    fn list_changelog(
        &mut self,
        task_id: TaskId,
    ) -> Result<Vec<TaskChangelogEntry>, StoreError> {
        self.load_many(
            "SELECT record FROM changelog WHERE task_id = ?1 ORDER BY id",
            &[&col(task_id.get())],
        )
    }

    fn append_event(&mut self, event: &NewEvent) -> Result<EventSeq, StoreError> {
        let next: i64 = self
            .tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE project_id = ?1",
                params![col(event.project_id.get())],
                |row| row.get(0),
            )
            .map_err(|err| db_err(&err))?;
        let seq = EventSeq::new(
            u64::try_from(next)
                .map_err(|_| StoreError::Corrupt("event sequence overflow".to_string()))?,
        );
        let record = EventRecord {
            seq,
            project_id: event.project_id,
            entity_kind: event.entity_kind,
            entity_id: event.entity_id.clone(),
            kind: event.kind,
            payload: event.payload.clone(),
            actor: event.actor.clone(),
            recorded_at: event.recorded_at,
        };
        let payload = to_record(&record)?;
        self.exec(
            "INSERT INTO events (project_id, seq, entity_kind, entity_id, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            &[
                &col(event.project_id.get()),
                &next,
                &record.entity_kind.as_str(),
                &record.entity_id,
                &payload,
            ],
        )?;
        Ok(seq)
    }

    fn events_after(
        &mut self,
        project_id: ProjectId,
        after: EventSeq,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.load_many(
            "SELECT record FROM events
             WHERE project_id = ?1 AND seq > ?2 ORDER BY seq LIMIT ?3",
            &[&col(project_id.get()), &col(after.get()), &col(limit as u64)],
        )
    }

    fn events_for_entity(
        &mut self,
        project_id: ProjectId,
        entity_kind: EntityKind,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut events: Vec<EventRecord> = self.load_many(
            "SELECT record FROM events
             WHERE project_id = ?1 AND entity_kind = ?2 AND entity_id = ?3
             ORDER BY seq DESC LIMIT ?4",
            &[
                &col(project_id.get()),
                &entity_kind.as_str(),
                &entity_id,
                &col(limit as u64),
            ],
        )?;
        events.reverse();
        Ok(events)
    }

    fn insert_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        let record = to_record(key)?;
        self.exec(
            "INSERT INTO api_keys (id, project_id, fingerprint, record)
             VALUES (?1, ?2, ?3, ?4)",
            &[
                &col(key.id.get()),
                &col(key.project_id.get()),
                &key.fingerprint,
                &record,
            ],
        )?;
        Ok(())
    }

    fn api_key_by_fingerprint(
        &mut self,
        fingerprint: &str,
    ) -> Result<Option<ApiKey>, StoreError> {
        self.load_one("SELECT record FROM api_keys WHERE fingerprint = ?1", &[&fingerprint])
    }

    fn update_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        let record = to_record(key)?;
        self.exec(
            "UPDATE api_keys SET record = ?2 WHERE id = ?1",
            &[&col(key.id.get()), &record],
        )?;
        Ok(())
    }

    fn list_api_keys(&mut self, project_id: ProjectId) -> Result<Vec<ApiKey>, StoreError> {
        self.load_many(
            "SELECT record FROM api_keys WHERE project_id = ?1 ORDER BY id",
            &[&col(project_id.get())],
        )
    }
}
