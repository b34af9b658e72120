//! Fleet orchestration integration tests.
//!
//! Tests the full orchestrator with a diamond DAG of tasks using a
//! ConfigurableMockHarness that produces configurable per-task behavior.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drakeward_db::models::{InvariantKind, InvariantScope, Project, ProjectStatus, TaskStatus};
use drakeward_db::queries::agent_events;
use drakeward_db::queries::invariants::{self, NewInvariant};
use drakeward_db::queries::projects as project_db;
use drakeward_db::queries::tasks as task_db;
use drakeward_test_utils::{create_test_db, drop_test_db};

use drakeward_core::harness::types::{AgentEvent, AgentHandle, MaterializedTask};
use drakeward_core::harness::{Harness, HarnessRegistry};
use drakeward_core::isolation::{worktree::WorktreeIsolation, Isolation};
use drakeward_core::orchestrator::{run_orchestrator, OrchestratorConfig, OrchestratorResult};
use drakeward_core::token::TokenConfig;
use drakeward_core::worktree::WorktreeManager;

// ===========================================================================
// Test harness
// ===========================================================================

struct TestHarness {
    pool: PgPool,
    db_name: String,
    repo_dir: tempfile::TempDir,
    worktree_base_dir: tempfile::TempDir,
    repo_path: PathBuf,
}

impl TestHarness {
    async fn new() -> Self {
        let (pool, db_name) = create_test_db().await;
        let (repo_dir, repo_path) = create_temp_git_repo();
        let worktree_base_dir =
            tempfile::TempDir::new().expect("failed to create worktree base dir");

        Self {
            pool,
            db_name,
            repo_dir,
            worktree_base_dir,
            repo_path,
        }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn worktree_base(&self) -> PathBuf {
        self.worktree_base_dir.path().to_path_buf()
    }

    fn worktree_manager(&self) -> WorktreeManager {
        WorktreeManager::new(&self.repo_path, Some(self.worktree_base()))
            .expect("failed to create WorktreeManager")
    }

    fn isolation(&self) -> Arc<dyn Isolation> {
        Arc::new(WorktreeIsolation::new(self.worktree_manager()))
    }

    async fn teardown(self) {
        self.pool.close().await;
        drop_test_db(&self.db_name).await;
        drop(self.worktree_base_dir);
        drop(self.repo_dir);
    }
}

fn create_temp_git_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    let run = |args: &[&str]| {
        let output = Command::new("git")
            .args(args)
            .current_dir(&repo_path)
            .output()
            .unwrap_or_else(|e| panic!("failed to run git {}: {e}", args.join(" ")));
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    };

    run(&["init"]);
    run(&["config", "user.email", "test@drakeward.dev"]);
    run(&["config", "user.name", "Drakeward Test"]);
    std::fs::write(repo_path.join("README.md"), "# Test repo\n").expect("failed to write README");
    run(&["add", "."]);
    run(&["commit", "-m", "Initial commit"]);

    (dir, repo_path)
}

fn test_token_config() -> TokenConfig {
    TokenConfig::new(b"fleet-test-secret-key".to_vec())
}

/// Create a project and walk it through the Wyrm/Wyvern intake pipeline so
/// it lands in `analyzed`, the status `run_orchestrator` expects to pick up.
async fn setup_analyzed_project(pool: &PgPool, name: &str, repo_path: &std::path::Path) -> Project {
    let project = project_db::insert_project(
        pool,
        name,
        &repo_path.to_string_lossy(),
        "main",
        "claude-code",
        "worktree",
    )
    .await
    .expect("insert project");

    project_db::approve_project(pool, project.id)
        .await
        .expect("approve project");
    project_db::assign_wyrm(pool, project.id, "wyrm")
        .await
        .expect("assign wyrm");
    project_db::mark_analyzed(pool, project.id, "deadbeef")
        .await
        .expect("mark analyzed");

    project_db::get_project(pool, project.id)
        .await
        .unwrap()
        .unwrap()
}

// ===========================================================================
// ConfigurableMockHarness
// ===========================================================================

/// Per-task behavior for the mock harness.
#[derive(Clone)]
enum TaskBehavior {
    /// Complete successfully with standard events.
    Complete,
    /// Hang forever (for timeout testing).
    Hang,
}

/// A mock harness where behavior can be configured per task name.
struct ConfigurableMockHarness {
    behaviors: Arc<Mutex<HashMap<String, TaskBehavior>>>,
    default_behavior: TaskBehavior,
    /// Map task_id -> task_name for resolving behavior in events().
    task_names: Arc<Mutex<HashMap<Uuid, String>>>,
    /// Track spawn order for topological assertions.
    spawn_log: Arc<Mutex<Vec<(String, chrono::DateTime<chrono::Utc>)>>>,
}

impl ConfigurableMockHarness {
    fn new(behaviors: HashMap<String, TaskBehavior>) -> Self {
        Self {
            behaviors: Arc::new(Mutex::new(behaviors)),
            default_behavior: TaskBehavior::Complete,
            task_names: Arc::new(Mutex::new(HashMap::new())),
            spawn_log: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Harness for ConfigurableMockHarness {
    fn name(&self) -> &str {
        "mock-harness"
    }

    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle> {
        self.task_names
            .lock()
            .unwrap()
            .insert(task.task_id, task.name.clone());
        self.spawn_log
            .lock()
            .unwrap()
            .push((task.name.clone(), chrono::Utc::now()));

        Ok(AgentHandle {
            pid: 99999,
            stdin: None,
            task_id: task.task_id,
            attempt: 0,
            harness_name: "mock-harness".to_string(),
        })
    }

    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let task_name = {
            let names = self.task_names.lock().unwrap();
            names.get(&handle.task_id).cloned().unwrap_or_default()
        };

        let behavior = {
            let behaviors = self.behaviors.lock().unwrap();
            behaviors
                .get(&task_name)
                .cloned()
                .unwrap_or(self.default_behavior.clone())
        };

        match behavior {
            TaskBehavior::Complete => Box::pin(futures::stream::iter(vec![
                AgentEvent::Message {
                    role: "assistant".to_string(),
                    content: format!("Working on {task_name}"),
                },
                AgentEvent::Completed,
            ])),
            TaskBehavior::Hang => Box::pin(futures::stream::pending()),
        }
    }

    async fn send(&self, _handle: &AgentHandle, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn kill(&self, _handle: &AgentHandle) -> Result<()> {
        Ok(())
    }

    async fn is_running(&self, _handle: &AgentHandle) -> bool {
        false
    }
}

// ===========================================================================
// Diamond DAG helper
// ===========================================================================

/// Create a diamond dependency DAG in an already-analyzed project:
///   foundation -> {api-layer, frontend} -> integration
///
/// All tasks use the given invariant. Returns task ids by name.
async fn create_diamond_dag(
    pool: &PgPool,
    project_id: Uuid,
    invariant_id: Uuid,
    retry_max: i32,
) -> HashMap<String, Uuid> {
    let foundation = task_db::insert_task(
        pool, project_id, "foundation", None, "foundation", "Foundation task", "narrow", "auto",
        retry_max, 0, 0, None,
    )
    .await
    .expect("insert foundation");
    task_db::link_task_invariant(pool, foundation.id, invariant_id)
        .await
        .unwrap();

    let api_layer = task_db::insert_task(
        pool, project_id, "api-layer", None, "api-layer", "API layer task", "narrow", "auto",
        retry_max, 0, 1, None,
    )
    .await
    .expect("insert api-layer");
    task_db::link_task_invariant(pool, api_layer.id, invariant_id)
        .await
        .unwrap();
    task_db::insert_task_dependency(pool, api_layer.id, foundation.id)
        .await
        .unwrap();

    let frontend = task_db::insert_task(
        pool, project_id, "frontend", None, "frontend", "Frontend task", "narrow", "auto",
        retry_max, 0, 1, None,
    )
    .await
    .expect("insert frontend");
    task_db::link_task_invariant(pool, frontend.id, invariant_id)
        .await
        .unwrap();
    task_db::insert_task_dependency(pool, frontend.id, foundation.id)
        .await
        .unwrap();

    let integration = task_db::insert_task(
        pool, project_id, "integration", None, "integration", "Integration task", "narrow",
        "auto", retry_max, 0, 2, None,
    )
    .await
    .expect("insert integration");
    task_db::link_task_invariant(pool, integration.id, invariant_id)
        .await
        .unwrap();
    task_db::insert_task_dependency(pool, integration.id, api_layer.id)
        .await
        .unwrap();
    task_db::insert_task_dependency(pool, integration.id, frontend.id)
        .await
        .unwrap();

    let mut ids = HashMap::new();
    ids.insert("foundation".to_string(), foundation.id);
    ids.insert("api-layer".to_string(), api_layer.id);
    ids.insert("frontend".to_string(), frontend.id);
    ids.insert("integration".to_string(), integration.id);

    ids
}

async fn create_invariant(pool: &PgPool, name: &str, command: &str) -> drakeward_db::models::Invariant {
    invariants::insert_invariant(
        pool,
        &NewInvariant {
            name,
            description: None,
            kind: InvariantKind::Custom,
            command,
            args: &[],
            expected_exit_code: 0,
            threshold: None,
            scope: InvariantScope::Project,
            timeout_secs: 300,
        },
    )
    .await
    .expect("insert invariant")
}

fn make_registry(harness: impl Harness + 'static) -> Arc<HarnessRegistry> {
    let mut registry = HarnessRegistry::new();
    registry.register(harness);
    Arc::new(registry)
}

// ===========================================================================
// Tests
// ===========================================================================

/// Test 1: All tasks succeed in topological order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn diamond_dag_topological_order() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let inv = create_invariant(pool, "pass_inv", "true").await;
    let project = setup_analyzed_project(pool, "diamond-project", &harness.repo_path).await;
    let task_ids = create_diamond_dag(pool, project.id, inv.id, 0).await;

    let mock = ConfigurableMockHarness::new(HashMap::new());
    let spawn_log = mock.spawn_log.clone();
    let registry = make_registry(mock);
    let isolation = harness.isolation();

    let result = run_orchestrator(
        pool,
        project.id,
        &registry,
        &isolation,
        &test_token_config(),
        &OrchestratorConfig {
            max_agents: 4,
            task_timeout: Duration::from_secs(30),
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result, OrchestratorResult::Completed);

    // Verify all tasks are done.
    for (name, id) in &task_ids {
        let task = task_db::get_task(pool, *id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done, "task {} should be done", name);
    }

    // Verify topological order from spawn_log.
    let log = spawn_log.lock().unwrap().clone();
    let names: Vec<&str> = log.iter().map(|(n, _)| n.as_str()).collect();

    let foundation_pos = names.iter().position(|&n| n == "foundation").unwrap();
    let api_pos = names.iter().position(|&n| n == "api-layer").unwrap();
    let frontend_pos = names.iter().position(|&n| n == "frontend").unwrap();
    let integration_pos = names.iter().position(|&n| n == "integration").unwrap();

    assert!(foundation_pos < api_pos, "foundation should start before api-layer");
    assert!(foundation_pos < frontend_pos, "foundation should start before frontend");
    assert!(integration_pos > api_pos, "integration should start after api-layer");
    assert!(integration_pos > frontend_pos, "integration should start after frontend");

    let project_final = project_db::get_project(pool, project.id).await.unwrap().unwrap();
    assert_eq!(project_final.status, ProjectStatus::Completed);

    harness.teardown().await;
}

/// Test 2: Task fails repeatedly until it exhausts its retry budget.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_with_escalation() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let fail_inv = create_invariant(pool, "fail_inv", "false").await;
    let project = setup_analyzed_project(pool, "retry-project", &harness.repo_path).await;

    let task = task_db::insert_task(
        pool,
        project.id,
        "retry-task",
        None,
        "retry-task",
        "Will fail and retry",
        "narrow",
        "auto",
        1, // 1 retry allowed
        0,
        0,
        None,
    )
    .await
    .unwrap();
    task_db::link_task_invariant(pool, task.id, fail_inv.id)
        .await
        .unwrap();

    let mock = ConfigurableMockHarness::new(HashMap::new());
    let registry = make_registry(mock);
    let isolation = harness.isolation();

    let result = run_orchestrator(
        pool,
        project.id,
        &registry,
        &isolation,
        &test_token_config(),
        &OrchestratorConfig {
            max_agents: 4,
            task_timeout: Duration::from_secs(30),
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    match &result {
        OrchestratorResult::Failed { failed_tasks } => {
            assert!(
                failed_tasks.contains(&"retry-task".to_string()),
                "should contain retry-task: {:?}",
                failed_tasks
            );
        }
        other => panic!("expected Failed, got {:?}", other),
    }

    let task_final = task_db::get_task(pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_final.status, TaskStatus::Failed);
    assert_eq!(task_final.attempt, 1);

    harness.teardown().await;
}

/// Test 3: Timeout kills an agent and the task is left failed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timeout_kills_agent() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let inv = create_invariant(pool, "pass_inv", "true").await;
    let project = setup_analyzed_project(pool, "timeout-project", &harness.repo_path).await;

    let task = task_db::insert_task(
        pool,
        project.id,
        "hanging-task",
        None,
        "hanging-task",
        "Will hang and get killed",
        "narrow",
        "auto",
        0, // no retries
        0,
        0,
        None,
    )
    .await
    .unwrap();
    task_db::link_task_invariant(pool, task.id, inv.id)
        .await
        .unwrap();

    let mut behaviors = HashMap::new();
    behaviors.insert("hanging-task".to_string(), TaskBehavior::Hang);
    let mock = ConfigurableMockHarness::new(behaviors);
    let registry = make_registry(mock);
    let isolation = harness.isolation();

    let result = run_orchestrator(
        pool,
        project.id,
        &registry,
        &isolation,
        &test_token_config(),
        &OrchestratorConfig {
            max_agents: 4,
            task_timeout: Duration::from_millis(200), // short timeout
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    match &result {
        OrchestratorResult::Failed { failed_tasks } => {
            assert!(
                failed_tasks.contains(&"hanging-task".to_string()),
                "should contain hanging-task"
            );
        }
        other => panic!("expected Failed, got {:?}", other),
    }

    let task_final = task_db::get_task(pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_final.status, TaskStatus::Failed);

    harness.teardown().await;
}

/// Test 4: Restart recovery -- manually set a task to working, verify the
/// orchestrator resets and retries it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_recovery() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let inv = create_invariant(pool, "pass_inv", "true").await;
    let project = setup_analyzed_project(pool, "restart-project", &harness.repo_path).await;
    project_db::update_project_status(pool, project.id, ProjectStatus::InProgress)
        .await
        .unwrap();

    let task = task_db::insert_task(
        pool,
        project.id,
        "orphan-task",
        None,
        "orphan-task",
        "Was running when crash happened",
        "narrow",
        "auto",
        3,
        0,
        0,
        None,
    )
    .await
    .unwrap();
    task_db::link_task_invariant(pool, task.id, inv.id)
        .await
        .unwrap();

    // Simulate crash: manually set the task to working.
    task_db::assign_task_metadata(pool, task.id, "mock-harness", "/tmp/fake")
        .await
        .unwrap();
    task_db::transition_task_status(
        pool,
        task.id,
        TaskStatus::Unassigned,
        TaskStatus::Working,
        Some(chrono::Utc::now()),
        None,
    )
    .await
    .unwrap();

    let mock = ConfigurableMockHarness::new(HashMap::new());
    let registry = make_registry(mock);
    let isolation = harness.isolation();

    let result = run_orchestrator(
        pool,
        project.id,
        &registry,
        &isolation,
        &test_token_config(),
        &OrchestratorConfig {
            max_agents: 4,
            task_timeout: Duration::from_secs(30),
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result, OrchestratorResult::Completed);

    let task_final = task_db::get_task(pool, task.id).await.unwrap().unwrap();
    assert_eq!(task_final.status, TaskStatus::Done);
    // Attempt should have been incremented (reset to failed, then retried).
    assert_eq!(task_final.attempt, 1);

    harness.teardown().await;
}

/// Test 5: After an orchestrator run, verify progress counts and event log.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_and_log_after_run() {
    let harness = TestHarness::new().await;
    let pool = harness.pool();

    let inv = create_invariant(pool, "pass_inv", "true").await;
    let project = setup_analyzed_project(pool, "status-project", &harness.repo_path).await;

    let task = task_db::insert_task(
        pool,
        project.id,
        "status-task",
        None,
        "status-task",
        "Task for status test",
        "narrow",
        "auto",
        0,
        0,
        0,
        None,
    )
    .await
    .unwrap();
    task_db::link_task_invariant(pool, task.id, inv.id)
        .await
        .unwrap();

    let mock = ConfigurableMockHarness::new(HashMap::new());
    let registry = make_registry(mock);
    let isolation = harness.isolation();

    let result = run_orchestrator(
        pool,
        project.id,
        &registry,
        &isolation,
        &test_token_config(),
        &OrchestratorConfig {
            max_agents: 4,
            task_timeout: Duration::from_secs(30),
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result, OrchestratorResult::Completed);

    let progress = task_db::get_project_progress(pool, project.id).await.unwrap();
    assert_eq!(progress.done, 1);
    assert_eq!(progress.total, 1);

    let events = agent_events::list_events_for_task(pool, task.id, 0).await.unwrap();
    assert!(!events.is_empty(), "should have at least some events recorded");

    let has_completed = events.iter().any(|e| e.event_type == "completed");
    assert!(has_completed, "should have a completed event");

    let has_message = events.iter().any(|e| e.event_type == "message");
    assert!(has_message, "should have a message event");

    harness.teardown().await;
}
