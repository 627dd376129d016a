// crates/tascade-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Fixtures
// Description: Shared builders for coordinator tests over the memory store.
// ============================================================================
//! ## Overview
//! Builders for a seeded project graph and helpers that walk tasks through
//! the lifecycle with explicit timestamps and tokens.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    reason = "Test-only helpers; panic-based assertions are permitted."
)]

use tascade_core::AgentId;
use tascade_core::ClaimRequest;
use tascade_core::ClaimResult;
use tascade_core::Coordinator;
use tascade_core::CoordinatorConfig;
use tascade_core::CoordinatorError;
use tascade_core::ErrorCode;
use tascade_core::IntegrationResult;
use tascade_core::LeaseToken;
use tascade_core::MemoryStore;
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
use tascade_core::WorkSpec;

/// Seeded fixture: one project, one phase, one milestone.
pub struct Fixture {
    /// Memory store backing all operations.
    pub store: MemoryStore,
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
pub const fn t(millis: i64) -> Timestamp {
    Timestamp::from_unix_millis(millis)
}

/// Builds an agent id.
pub fn agent(name: &str) -> AgentId {
    AgentId::new(name)
}

/// Builds a minimal valid work spec.
pub fn work_spec(objective: &str) -> WorkSpec {
    WorkSpec {
        objective: objective.to_string(),
        ..WorkSpec::default()
    }
}

/// Builds a task draft under the fixture milestone.
pub fn draft(fixture: &Fixture, title: &str) -> TaskDraft {
    TaskDraft {
        milestone_id: fixture.milestone.id,
        title: title.to_string(),
        description: String::new(),
        priority: 10,
        task_class: TaskClass::Backend,
        capability_tags: Vec::new(),
        expected_touches: Vec::new(),
        exclusive_paths: Vec::new(),
        shared_paths: Vec::new(),
        work_spec: work_spec(&format!("implement {title}")),
    }
}

/// Seeds the project / phase / milestone scaffold.
pub fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let coordinator = Coordinator::new(CoordinatorConfig::default());
    let planner = agent("planner");
    let (project, phase, milestone) = store
        .with_tx(|tx| {
            let project = coordinator.create_project(tx, "orchestrator", &planner, t(1))?;
            let phase = coordinator.create_phase(tx, project.id, "core", &planner, t(2))?;
            let milestone =
                coordinator.create_milestone(tx, phase.id, "kernel", &planner, t(3))?;
            Ok::<_, CoordinatorError>((project, phase, milestone))
        })
        .expect("fixture setup");
    Fixture {
        store,
        coordinator,
        project,
        phase,
        milestone,
    }
}

/// Creates a task from a draft.
pub fn create_task(fixture: &Fixture, task_draft: &TaskDraft, now: Timestamp) -> Task {
    fixture
        .store
        .with_tx(|tx| fixture.coordinator.create_task(tx, task_draft, &agent("planner"), now))
        .expect("create task")
}

/// Claims a task with a fixed token.
pub fn claim(
    fixture: &Fixture,
    task_id: TaskId,
    claimer: &str,
    token: &str,
    now: Timestamp,
) -> Result<ClaimResult, CoordinatorError> {
    fixture.store.with_tx(|tx| {
        fixture.coordinator.claim_task(tx, &ClaimRequest {
            task: TaskRef::by_id(task_id),
            agent_id: agent(claimer),
            capabilities: None,
            token: LeaseToken::new(token),
            now,
        })
    })
}

/// Applies one state transition.
pub fn transition(
    fixture: &Fixture,
    task_id: TaskId,
    request: &TransitionRequest,
    token: Option<&str>,
    now: Timestamp,
) -> Result<Task, CoordinatorError> {
    let token = token.map(LeaseToken::new);
    fixture.store.with_tx(|tx| {
        fixture.coordinator.transition_task(
            tx,
            &TaskRef::by_id(task_id),
            request,
            token.as_ref(),
            now,
        )
    })
}

/// Builds a plain transition request.
pub fn to_state(target: TaskState, actor: &str) -> TransitionRequest {
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
pub fn to_integrated(actor: &str, reviewer: &str) -> TransitionRequest {
    TransitionRequest {
        target: TaskState::Integrated,
        actor: agent(actor),
        reviewed_by: Some(agent(reviewer)),
        evidence_refs: vec!["review://1".to_string()],
        rationale: None,
        force: false,
    }
}

/// Records a passed-check artifact under the active lease token.
pub fn passed_artifact(
    fixture: &Fixture,
    task_id: TaskId,
    claimer: &str,
    token: &str,
    now: Timestamp,
) {
    fixture
        .store
        .with_tx(|tx| {
            fixture.coordinator.record_artifact(tx, &tascade_core::ArtifactDraft {
                task: TaskRef::by_id(task_id),
                agent_id: agent(claimer),
                branch: format!("work/{claimer}"),
                commit: Some("abc123".to_string()),
                check_ref: Some("ci://run/1".to_string()),
                check_status: tascade_core::CheckStatus::Passed,
                touched_paths: vec!["src/lib.rs".to_string()],
                lease_token: Some(LeaseToken::new(token)),
                now,
            })
        })
        .expect("record artifact");
}

/// Walks a ready task all the way to `implemented` under one lease.
pub fn implement(
    fixture: &Fixture,
    task_id: TaskId,
    claimer: &str,
    token: &str,
    start: i64,
) -> ClaimResult {
    let result = claim(fixture, task_id, claimer, token, t(start)).expect("claim");
    transition(
        fixture,
        task_id,
        &to_state(TaskState::InProgress, claimer),
        Some(token),
        t(start + 1),
    )
    .expect("start");
    passed_artifact(fixture, task_id, claimer, token, t(start + 2));
    transition(
        fixture,
        task_id,
        &to_state(TaskState::Implemented, claimer),
        Some(token),
        t(start + 3),
    )
    .expect("implement");
    result
}

/// Runs a successful integration attempt for an implemented task.
pub fn integrate_success(fixture: &Fixture, task_id: TaskId, start: i64) {
    let attempt = fixture
        .store
        .with_tx(|tx| {
            fixture.coordinator.enqueue_integration(
                tx,
                &TaskRef::by_id(task_id),
                "main",
                "work/head",
                &agent("integrator"),
                t(start),
            )
        })
        .expect("enqueue");
    fixture
        .store
        .with_tx(|tx| {
            fixture.coordinator.complete_integration(
                tx,
                attempt.id,
                IntegrationResult::Success,
                None,
                &agent("integrator"),
                t(start + 1),
            )
        })
        .expect("complete");
}

/// Asserts that a coordinator error carries the given domain code.
pub fn assert_code(error: &CoordinatorError, code: ErrorCode) {
    assert_eq!(error.code(), Some(code), "unexpected error: {error}");
}

/// Loads a task's current state.
pub fn task_state(fixture: &Fixture, task_id: TaskId) -> TaskState {
    fixture
        .store
        .with_tx(|tx| {
            Ok::<_, CoordinatorError>(tx.task(task_id)?.expect("task exists").state)
        })
        .expect("load task")
}
