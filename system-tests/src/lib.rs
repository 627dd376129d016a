// system-tests/src/lib.rs
// ============================================================================
// Module: System Test Harness
// Description: Shared harness driving the kernel against the durable store.
// Purpose: One setup path for every end-to-end scenario.
// Dependencies: tascade-core, tascade-store-sqlite
// ============================================================================

//! ## Overview
//! The harness owns a tempfile-backed SQLite store and a coordinator, and
//! exposes the operations the scenarios compose: graph building, claims,
//! transitions, artifacts, integration, gates, and changesets. Timestamps
//! are explicit so every scenario is deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tascade_core::AgentId;
use tascade_core::ArtifactDraft;
use tascade_core::CheckStatus;
use tascade_core::ClaimRequest;
use tascade_core::ClaimResult;
use tascade_core::Coordinator;
use tascade_core::CoordinatorConfig;
use tascade_core::CoordinatorError;
use tascade_core::IntegrationResult;
use tascade_core::LeaseToken;
use tascade_core::Milestone;
use tascade_core::Phase;
use tascade_core::Project;
use tascade_core::Task;
use tascade_core::TaskClass;
use tascade_core::TaskDraft;
use tascade_core::TaskId;
use tascade_core::TaskRef;
use tascade_core::TaskState;
use tascade_core::Timestamp;
use tascade_core::TransitionRequest;
use tascade_core::UnlockOn;
use tascade_core::WorkSpec;
use tascade_store_sqlite::SqliteStore;
use tascade_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: Harness
// ============================================================================

/// End-to-end harness over the durable store.
pub struct Harness {
    /// Keeps the database directory alive for the scenario.
    _dir: tempfile::TempDir,
    /// Durable store.
    pub store: SqliteStore,
    /// Coordinator under test.
    pub coordinator: Coordinator,
    /// Seeded project.
    pub project: Project,
    /// Seeded phase.
    pub phase: Phase,
    /// Seeded milestone.
    pub milestone: Milestone,
}

/// Builds a timestamp from raw millis.
#[must_use]
pub const fn t(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// Builds an agent id.
#[must_use]
pub fn agent(name: &str) -> AgentId {
    AgentId::new(name)
}

impl Harness {
    /// Seeds a project named "P" with phase "P1" and milestone "P1.M1".
    ///
    /// # Panics
    ///
    /// Panics when the scaffold cannot be created; scenarios treat that as
    /// an environment failure.
    #[must_use]
    #[allow(
        clippy::expect_used,
        reason = "Harness setup failures abort the scenario immediately."
    )]
    pub fn new() -> Self {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = SqliteStore::open(&SqliteStoreConfig::for_path(
            dir.path().join("tascade.db"),
        ))
        .expect("open store");
        let coordinator = Coordinator::new(CoordinatorConfig::default());
        let planner = agent("planner");
        let (project, phase, milestone) = store
            .with_tx(|tx| {
                let project = coordinator.create_project(tx, "P", &planner, t(1))?;
                let phase = coordinator.create_phase(tx, project.id, "P1", &planner, t(2))?;
                let milestone =
                    coordinator.create_milestone(tx, phase.id, "P1.M1", &planner, t(3))?;
                Ok::<_, CoordinatorError>((project, phase, milestone))
            })
            .expect("seed scaffold");
        Self {
            _dir: dir,
            store,
            coordinator,
            project,
            phase,
            milestone,
        }
    }

    /// Creates a backend task under the seeded milestone.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn create_task(&self, title: &str, now: i64) -> Result<Task, CoordinatorError> {
        self.store.with_tx(|tx| {
            self.coordinator.create_task(
                tx,
                &TaskDraft {
                    milestone_id: self.milestone.id,
                    title: title.to_string(),
                    description: String::new(),
                    priority: 10,
                    task_class: TaskClass::Backend,
                    capability_tags: Vec::new(),
                    expected_touches: Vec::new(),
                    exclusive_paths: Vec::new(),
                    shared_paths: Vec::new(),
                    work_spec: WorkSpec {
                        objective: format!("implement {title}"),
                        ..WorkSpec::default()
                    },
                },
                &agent("planner"),
                t(now),
            )
        })
    }

    /// Creates a dependency between two tasks.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn link(
        &self,
        from: TaskId,
        to: TaskId,
        unlock_on: UnlockOn,
        now: i64,
    ) -> Result<tascade_core::DependencyEdge, CoordinatorError> {
        self.store.with_tx(|tx| {
            self.coordinator.create_dependency(
                tx,
                &TaskRef::by_id(from),
                &TaskRef::by_id(to),
                unlock_on,
                &agent("planner"),
                t(now),
            )
        })
    }

    /// Lists ready short ids for an agent.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn ready_ids(&self, caller: &str) -> Result<Vec<String>, CoordinatorError> {
        Ok(self
            .store
            .with_tx(|tx| {
                self.coordinator.list_ready_tasks(tx, self.project.id, &agent(caller), None)
            })?
            .into_iter()
            .map(|entry| entry.task.short_id.to_string())
            .collect())
    }

    /// Claims a task with a fixed token.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn claim(
        &self,
        task: TaskId,
        claimer: &str,
        token: &str,
        now: i64,
    ) -> Result<ClaimResult, CoordinatorError> {
        self.store.with_tx(|tx| {
            self.coordinator.claim_task(tx, &ClaimRequest {
                task: TaskRef::by_id(task),
                agent_id: agent(claimer),
                capabilities: None,
                token: LeaseToken::new(token),
                now: t(now),
            })
        })
    }

    /// Applies a state transition.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn transition(
        &self,
        task: TaskId,
        request: &TransitionRequest,
        token: Option<&str>,
        now: i64,
    ) -> Result<Task, CoordinatorError> {
        let token = token.map(LeaseToken::new);
        self.store.with_tx(|tx| {
            self.coordinator.transition_task(
                tx,
                &TaskRef::by_id(task),
                request,
                token.as_ref(),
                t(now),
            )
        })
    }

    /// Records a passed-check artifact under the active lease token.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn passed_artifact(
        &self,
        task: TaskId,
        claimer: &str,
        token: &str,
        now: i64,
    ) -> Result<tascade_core::Artifact, CoordinatorError> {
        self.store.with_tx(|tx| {
            self.coordinator.record_artifact(tx, &ArtifactDraft {
                task: TaskRef::by_id(task),
                agent_id: agent(claimer),
                branch: format!("work/{claimer}"),
                commit: Some("deadbeef".to_string()),
                check_ref: Some("ci://run/1".to_string()),
                check_status: CheckStatus::Passed,
                touched_paths: vec!["src/lib.rs".to_string()],
                lease_token: Some(LeaseToken::new(token)),
                now: t(now),
            })
        })
    }

    /// Runs a successful integration attempt for an implemented task.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn integrate_success(&self, task: TaskId, now: i64) -> Result<(), CoordinatorError> {
        let attempt = self.store.with_tx(|tx| {
            self.coordinator.enqueue_integration(
                tx,
                &TaskRef::by_id(task),
                "main",
                "work/head",
                &agent("integrator"),
                t(now),
            )
        })?;
        self.store.with_tx(|tx| {
            self.coordinator.complete_integration(
                tx,
                attempt.id,
                IntegrationResult::Success,
                None,
                &agent("integrator"),
                t(now + 1),
            )
        })?;
        Ok(())
    }

    /// Walks a ready task through claim, start, artifact, and implemented.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's error verbatim.
    pub fn implement(
        &self,
        task: TaskId,
        claimer: &str,
        token: &str,
        start: i64,
    ) -> Result<(), CoordinatorError> {
        self.claim(task, claimer, token, start)?;
        self.transition(
            task,
            &plain_transition(TaskState::InProgress, claimer),
            Some(token),
            start + 1,
        )?;
        self.passed_artifact(task, claimer, token, start + 2)?;
        self.transition(
            task,
            &plain_transition(TaskState::Implemented, claimer),
            Some(token),
            start + 3,
        )?;
        Ok(())
    }

    /// Loads a task's current state.
    ///
    /// # Errors
    ///
    /// Returns a storage fault or `NOT_FOUND` through the coordinator path.
    pub fn task_state(&self, task: TaskId) -> Result<TaskState, CoordinatorError> {
        Ok(self
            .store
            .with_tx(|tx| self.coordinator.resolve_task(tx, &TaskRef::by_id(task)))?
            .state)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Request Builders
// ============================================================================

/// Builds a plain transition request.
#[must_use]
pub fn plain_transition(target: TaskState, actor: &str) -> TransitionRequest {
    TransitionRequest {
        target,
        actor: agent(actor),
        reviewed_by: None,
        evidence_refs: Vec::new(),
        rationale: None,
        force: false,
    }
}

/// Builds an integration transition request with reviewer and evidence.
#[must_use]
pub fn reviewed_integration(actor: &str, reviewer: &str) -> TransitionRequest {
    TransitionRequest {
        target: TaskState::Integrated,
        actor: agent(actor),
        reviewed_by: Some(agent(reviewer)),
        evidence_refs: vec!["review://r/1".to_string()],
        rationale: None,
        force: false,
    }
}
