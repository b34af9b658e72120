//! Integration tests for the gate runner.
//!
//! Each test creates a unique temporary database, runs migrations, and
//! drops it on completion so tests are fully isolated and idempotent.

use std::path::Path;

use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::models::{InvariantKind, InvariantScope, TaskStatus};
use drakeward_db::queries::gate_results;
use drakeward_db::queries::invariants::{self, NewInvariant};
use drakeward_db::queries::projects as project_db;
use drakeward_db::queries::tasks as task_db;
use drakeward_test_utils::{create_test_db, drop_test_db};

use drakeward_core::gate::evaluator::{evaluate_verdict, GateAction};
use drakeward_core::gate::{GateRunner, GateVerdict};
use drakeward_core::state::dispatch;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Insert a project and return its id.
async fn create_test_project(pool: &PgPool) -> Uuid {
    project_db::insert_project(pool, "gate-test-project", "/tmp/project", "main", "claude-code", "worktree")
        .await
        .expect("failed to insert test project")
        .id
}

/// Insert a task with the given gate policy.
async fn create_test_task(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    gate_policy: &str,
    retry_max: i32,
) -> drakeward_db::models::Task {
    task_db::insert_task(
        pool,
        project_id,
        name,
        None,
        name,
        "test task description",
        "narrow",
        gate_policy,
        retry_max,
        0,
        0,
        None,
    )
    .await
    .expect("failed to insert test task")
}

/// Insert an invariant that runs the given command.
async fn create_test_invariant(
    pool: &PgPool,
    name: &str,
    command: &str,
    args: &[String],
    expected_exit_code: i32,
) -> drakeward_db::models::Invariant {
    let new = NewInvariant {
        name,
        description: Some("test invariant"),
        kind: InvariantKind::Custom,
        command,
        args,
        expected_exit_code,
        threshold: None,
        scope: InvariantScope::Project,
        timeout_secs: 300,
    };
    invariants::insert_invariant(pool, &new)
        .await
        .expect("failed to insert test invariant")
}

/// Dispatch a task into `working`, giving it a worktree path.
async fn dispatch_to_working(pool: &PgPool, task_id: Uuid, worktree_path: &str) {
    dispatch::assign_task(
        pool,
        task_id,
        TaskStatus::Unassigned,
        "test-harness",
        Path::new(worktree_path),
    )
    .await
    .expect("assign_task should succeed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_invariants_pass_auto_gate_passes_task() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "pass-task", "auto", 3).await;

    let inv1 = create_test_invariant(&pool, "always_true_1", "true", &[], 0).await;
    let inv2 = create_test_invariant(&pool, "always_true_2", "true", &[], 0).await;

    task_db::link_task_invariant(&pool, task.id, inv1.id)
        .await
        .unwrap();
    task_db::link_task_invariant(&pool, task.id, inv2.id)
        .await
        .unwrap();

    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let verdict = runner.run_gate(task.id).await.expect("run_gate should succeed");

    assert!(
        matches!(verdict, GateVerdict::Passed),
        "expected GateVerdict::Passed, got {:?}",
        verdict
    );

    // The task stays in 'working' until the verdict is evaluated.
    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Working);

    let action = evaluate_verdict(&pool, task.id, &verdict)
        .await
        .expect("evaluate should succeed");
    assert_eq!(action, GateAction::AutoPassed);

    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Done);
    assert!(t.completed_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn one_invariant_fails_auto_gate_fails_task() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "fail-task", "auto", 3).await;

    let inv_pass = create_test_invariant(&pool, "pass_inv", "true", &[], 0).await;
    let inv_fail = create_test_invariant(&pool, "fail_inv", "false", &[], 0).await;

    task_db::link_task_invariant(&pool, task.id, inv_pass.id)
        .await
        .unwrap();
    task_db::link_task_invariant(&pool, task.id, inv_fail.id)
        .await
        .unwrap();

    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let verdict = runner.run_gate(task.id).await.expect("run_gate should succeed");

    match &verdict {
        GateVerdict::Failed { failures } => {
            assert_eq!(failures.len(), 1, "should have exactly one failure");
            assert_eq!(failures[0].invariant_name, "fail_inv");
            assert_eq!(failures[0].exit_code, Some(1));
        }
        GateVerdict::Passed => panic!("expected Failed verdict, got Passed"),
    }

    // A plain exit-code failure carries no retry-eligible keyword, so it
    // classifies as Permanent and is not retry eligible even though
    // retry_max allows more attempts.
    let action = evaluate_verdict(&pool, task.id, &verdict)
        .await
        .expect("evaluate should succeed");
    assert_eq!(action, GateAction::AutoFailed { can_retry: false });

    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Failed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn human_review_gate_leaves_task_working() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "human-task", "human_review", 3).await;

    let inv = create_test_invariant(&pool, "check_inv", "true", &[], 0).await;
    task_db::link_task_invariant(&pool, task.id, inv.id)
        .await
        .unwrap();

    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let verdict = runner.run_gate(task.id).await.expect("run_gate should succeed");
    assert!(matches!(verdict, GateVerdict::Passed));

    let action = evaluate_verdict(&pool, task.id, &verdict)
        .await
        .expect("evaluate should succeed");
    assert_eq!(action, GateAction::HumanRequired);

    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Working);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn human_approve_gate_leaves_task_working() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "approve-task", "human_approve", 3).await;

    let inv = create_test_invariant(&pool, "approve_inv", "true", &[], 0).await;
    task_db::link_task_invariant(&pool, task.id, inv.id)
        .await
        .unwrap();

    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let verdict = runner.run_gate(task.id).await.expect("run_gate should succeed");
    assert!(matches!(verdict, GateVerdict::Passed));

    let action = evaluate_verdict(&pool, task.id, &verdict)
        .await
        .expect("evaluate should succeed");
    assert_eq!(action, GateAction::HumanRequired);

    let t = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(t.status, TaskStatus::Working);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn gate_results_recorded_correctly() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "record-task", "auto", 3).await;

    let inv_pass = create_test_invariant(&pool, "rec_pass", "true", &[], 0).await;
    let inv_fail = create_test_invariant(&pool, "rec_fail", "false", &[], 0).await;

    task_db::link_task_invariant(&pool, task.id, inv_pass.id)
        .await
        .unwrap();
    task_db::link_task_invariant(&pool, task.id, inv_fail.id)
        .await
        .unwrap();

    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let _verdict = runner.run_gate(task.id).await.expect("run_gate should succeed");

    let results = gate_results::get_gate_results(&pool, task.id, 0)
        .await
        .expect("should get gate results");

    assert_eq!(results.len(), 2, "should have two gate results");

    let pass_result = results.iter().find(|r| r.invariant_id == inv_pass.id);
    let fail_result = results.iter().find(|r| r.invariant_id == inv_fail.id);

    assert!(pass_result.is_some(), "should have a result for the passing invariant");
    assert!(fail_result.is_some(), "should have a result for the failing invariant");

    let pass_result = pass_result.unwrap();
    assert!(pass_result.passed);
    assert_eq!(pass_result.exit_code, Some(0));
    assert_eq!(pass_result.attempt, 0);
    assert!(pass_result.duration_ms.is_some());

    let fail_result = fail_result.unwrap();
    assert!(!fail_result.passed);
    assert_eq!(fail_result.exit_code, Some(1));
    assert_eq!(fail_result.attempt, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn gate_with_real_shell_commands() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "shell-task", "auto", 3).await;

    // An invariant that runs `echo hello` (produces stdout).
    let inv_echo = create_test_invariant(&pool, "echo_test", "echo", &["hello".to_owned()], 0).await;

    // An invariant that runs `sh -c "echo err >&2 && exit 1"` (fails with stderr).
    let inv_stderr = create_test_invariant(
        &pool,
        "stderr_test",
        "sh",
        &["-c".to_owned(), "echo err >&2 && exit 1".to_owned()],
        0,
    )
    .await;

    task_db::link_task_invariant(&pool, task.id, inv_echo.id)
        .await
        .unwrap();
    task_db::link_task_invariant(&pool, task.id, inv_stderr.id)
        .await
        .unwrap();

    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let verdict = runner.run_gate(task.id).await.expect("run_gate should succeed");

    match &verdict {
        GateVerdict::Failed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].invariant_name, "stderr_test");
            assert_eq!(failures[0].exit_code, Some(1));
            assert!(
                failures[0].stderr_snippet.contains("err"),
                "stderr snippet should contain 'err', got: {:?}",
                failures[0].stderr_snippet
            );
        }
        GateVerdict::Passed => panic!("expected Failed verdict"),
    }

    let results = gate_results::get_gate_results(&pool, task.id, 0).await.unwrap();
    let echo_result = results
        .iter()
        .find(|r| r.invariant_id == inv_echo.id)
        .expect("should have echo result");
    assert!(echo_result.passed);
    assert!(
        echo_result.stdout.as_deref().unwrap_or("").contains("hello"),
        "stdout should contain 'hello'"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn auto_fail_retry_eligibility_when_max_reached() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    // retry_max = 0 means no retries allowed.
    let task = create_test_task(&pool, project_id, "no-retry-task", "auto", 0).await;

    let inv = create_test_invariant(&pool, "fail_nr", "false", &[], 0).await;
    task_db::link_task_invariant(&pool, task.id, inv.id)
        .await
        .unwrap();

    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let verdict = runner.run_gate(task.id).await.expect("run_gate should succeed");
    assert!(matches!(verdict, GateVerdict::Failed { .. }));

    let action = evaluate_verdict(&pool, task.id, &verdict)
        .await
        .expect("evaluate should succeed");
    assert_eq!(
        action,
        GateAction::AutoFailed { can_retry: false },
        "should not be eligible for retry when retry_max is 0"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn gate_runner_fails_if_no_invariants_linked() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "no-inv-task", "auto", 3).await;

    // No invariants linked.
    dispatch_to_working(&pool, task.id, "/tmp").await;

    let runner = GateRunner::new(&pool);
    let result = runner.run_gate(task.id).await;
    assert!(result.is_err(), "should fail with no invariants linked");
    let err_msg = format!("{}", result.unwrap_err());
    assert!(
        err_msg.contains("no linked invariants"),
        "error should mention no linked invariants: {err_msg}"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn gate_runner_requires_worktree_path() {
    let (pool, db_name) = create_test_db().await;

    let project_id = create_test_project(&pool).await;
    let task = create_test_task(&pool, project_id, "wrong-state", "auto", 3).await;

    let inv = create_test_invariant(&pool, "state_inv", "true", &[], 0).await;
    task_db::link_task_invariant(&pool, task.id, inv.id)
        .await
        .unwrap();

    // Task was never dispatched, so it has no worktree_path -- the gate
    // cannot run.
    let runner = GateRunner::new(&pool);
    let result = runner.run_gate(task.id).await;
    assert!(
        result.is_err(),
        "should fail when task has no worktree_path"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}
