//! Integration tests for project and task CRUD operations.
//!
//! Each test creates a unique temporary database via `drakeward_test_utils`
//! and drops it on completion so tests are fully isolated.

use uuid::Uuid;

use drakeward_db::models::{ProjectStatus, TaskStatus};
use drakeward_db::queries::{projects, tasks};
use drakeward_test_utils::{create_test_db, drop_test_db};

// -----------------------------------------------------------------------
// Project CRUD tests
// -----------------------------------------------------------------------

#[tokio::test]
async fn insert_and_get_project() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(
        &pool,
        "test-project",
        "/tmp/project",
        "main",
        "claude-code",
        "worktree",
    )
    .await
    .expect("insert_project should succeed");

    assert_eq!(project.name, "test-project");
    assert_eq!(project.project_path, "/tmp/project");
    assert_eq!(project.base_branch, "main");
    assert_eq!(project.status, ProjectStatus::Prototype);
    assert!(project.approved_at.is_none());
    assert!(project.completed_at.is_none());

    let fetched = projects::get_project(&pool, project.id)
        .await
        .expect("get_project should succeed")
        .expect("project should exist");

    assert_eq!(fetched.id, project.id);
    assert_eq!(fetched.name, "test-project");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn get_project_returns_none_for_missing_id() {
    let (pool, db_name) = create_test_db().await;

    let result = projects::get_project(&pool, Uuid::new_v4())
        .await
        .expect("get_project should not error");

    assert!(result.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_projects_returns_all() {
    let (pool, db_name) = create_test_db().await;

    projects::insert_project(&pool, "project-a", "/tmp/a", "main", "claude-code", "worktree")
        .await
        .unwrap();
    projects::insert_project(&pool, "project-b", "/tmp/b", "develop", "claude-code", "worktree")
        .await
        .unwrap();

    let all = projects::list_projects(&pool).await.unwrap();
    assert_eq!(all.len(), 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_project_status_succeeds() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "status-test", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();

    assert_eq!(project.status, ProjectStatus::Prototype);

    projects::update_project_status(&pool, project.id, ProjectStatus::Failed)
        .await
        .expect("update should succeed");

    let updated = projects::get_project(&pool, project.id).await.unwrap().unwrap();
    assert_eq!(updated.status, ProjectStatus::Failed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_project_status_fails_for_missing_project() {
    let (pool, db_name) = create_test_db().await;

    let result =
        projects::update_project_status(&pool, Uuid::new_v4(), ProjectStatus::Failed).await;
    assert!(result.is_err());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn approve_project_sets_approved_at_and_status() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "ts-approved", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();
    assert!(project.approved_at.is_none());

    let approved = projects::approve_project(&pool, project.id).await.unwrap();
    assert_eq!(approved.status, ProjectStatus::New);
    assert!(approved.approved_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn approve_project_fails_when_not_prototype() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "ts-double-approve", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();
    projects::approve_project(&pool, project.id).await.unwrap();

    let result = projects::approve_project(&pool, project.id).await;
    assert!(result.is_err());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn complete_project_sets_completed_at() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "ts-completed", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();
    assert!(project.completed_at.is_none());

    projects::complete_project(&pool, project.id).await.unwrap();

    let updated = projects::get_project(&pool, project.id).await.unwrap().unwrap();
    assert_eq!(updated.status, ProjectStatus::Completed);
    assert!(
        updated.completed_at.is_some(),
        "completed_at should be set once a project completes"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_project_records_error_message() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "ts-failed", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();

    projects::fail_project(&pool, project.id, "kobold exhausted retries")
        .await
        .unwrap();

    let updated = projects::get_project(&pool, project.id).await.unwrap().unwrap();
    assert_eq!(updated.status, ProjectStatus::Failed);
    assert_eq!(
        updated.error_message.as_deref(),
        Some("kobold exhausted retries")
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Task CRUD tests
// -----------------------------------------------------------------------

#[tokio::test]
async fn insert_and_get_task() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "task-test-project", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();

    let task = tasks::insert_task(
        &pool,
        project.id,
        "core",
        None,
        "task-one",
        "Do the first thing",
        "narrow",
        "auto",
        3,
        0,
        0,
        None,
    )
    .await
    .expect("insert_task should succeed");

    assert_eq!(task.project_id, project.id);
    assert_eq!(task.name, "task-one");
    assert_eq!(task.description, "Do the first thing");
    assert_eq!(task.status, TaskStatus::Unassigned);
    assert_eq!(task.attempt, 0);
    assert_eq!(task.retry_max, 3);

    let fetched = tasks::get_task(&pool, task.id)
        .await
        .expect("get_task should succeed")
        .expect("task should exist");

    assert_eq!(fetched.id, task.id);
    assert_eq!(fetched.name, "task-one");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_tasks_for_project_returns_correct_tasks() {
    let (pool, db_name) = create_test_db().await;

    let project_a = projects::insert_project(&pool, "project-a", "/tmp/a", "main", "claude-code", "worktree")
        .await
        .unwrap();
    let project_b = projects::insert_project(&pool, "project-b", "/tmp/b", "main", "claude-code", "worktree")
        .await
        .unwrap();

    tasks::insert_task(
        &pool, project_a.id, "core", None, "a-task-1", "desc", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();
    tasks::insert_task(
        &pool,
        project_a.id,
        "core",
        None,
        "a-task-2",
        "desc",
        "medium",
        "human_review",
        2,
        0,
        0,
        None,
    )
    .await
    .unwrap();
    tasks::insert_task(
        &pool,
        project_b.id,
        "core",
        None,
        "b-task-1",
        "desc",
        "broad",
        "human_approve",
        1,
        0,
        0,
        None,
    )
    .await
    .unwrap();

    let project_a_tasks = tasks::list_tasks_for_project(&pool, project_a.id).await.unwrap();
    assert_eq!(project_a_tasks.len(), 2);

    let project_b_tasks = tasks::list_tasks_for_project(&pool, project_b.id).await.unwrap();
    assert_eq!(project_b_tasks.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_task_status_succeeds() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "p", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();
    let task = tasks::insert_task(
        &pool, project.id, "core", None, "t", "d", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();

    tasks::update_task_status(&pool, task.id, TaskStatus::Working)
        .await
        .expect("update should succeed");

    let updated = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(updated.status, TaskStatus::Working);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_dependencies_roundtrip() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "dep-test", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();

    let task_a = tasks::insert_task(
        &pool, project.id, "core", None, "a", "first", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();
    let task_b = tasks::insert_task(
        &pool, project.id, "core", None, "b", "second", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();
    let task_c = tasks::insert_task(
        &pool, project.id, "core", None, "c", "third", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();

    // b depends on a; c depends on a and b.
    tasks::insert_task_dependency(&pool, task_b.id, task_a.id).await.unwrap();
    tasks::insert_task_dependency(&pool, task_c.id, task_a.id).await.unwrap();
    tasks::insert_task_dependency(&pool, task_c.id, task_b.id).await.unwrap();

    let b_deps = tasks::get_task_dependencies(&pool, task_b.id).await.unwrap();
    assert_eq!(b_deps, vec![task_a.id]);

    let mut c_deps = tasks::get_task_dependencies(&pool, task_c.id).await.unwrap();
    c_deps.sort();
    let mut expected = vec![task_a.id, task_b.id];
    expected.sort();
    assert_eq!(c_deps, expected);

    let a_deps = tasks::get_task_dependencies(&pool, task_a.id).await.unwrap();
    assert!(a_deps.is_empty());

    assert_eq!(tasks::count_dependency_edges(&pool, project.id).await.unwrap(), 3);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_dependency_is_idempotent() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "idem", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();
    let a = tasks::insert_task(
        &pool, project.id, "core", None, "a", "d", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();
    let b = tasks::insert_task(
        &pool, project.id, "core", None, "b", "d", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();

    // Insert same dependency twice -- should not error.
    tasks::insert_task_dependency(&pool, b.id, a.id).await.unwrap();
    tasks::insert_task_dependency(&pool, b.id, a.id).await.unwrap();

    let deps = tasks::get_task_dependencies(&pool, b.id).await.unwrap();
    assert_eq!(deps.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn link_task_invariant_roundtrip() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "inv-link", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();
    let task = tasks::insert_task(
        &pool, project.id, "core", None, "t", "d", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();

    // Insert an invariant directly for testing.
    let inv_row: (Uuid,) = sqlx::query_as(
        "INSERT INTO invariants (name, kind, command) VALUES ('test_inv', 'custom', 'true') \
         RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    tasks::link_task_invariant(&pool, task.id, inv_row.0).await.unwrap();

    let linked: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM task_invariants WHERE task_id = $1 AND invariant_id = $2",
    )
    .bind(task.id)
    .bind(inv_row.0)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(linked.0, 1);

    // Idempotent: linking again should not error or duplicate.
    tasks::link_task_invariant(&pool, task.id, inv_row.0).await.unwrap();

    let linked2: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM task_invariants WHERE task_id = $1 AND invariant_id = $2",
    )
    .bind(task.id)
    .bind(inv_row.0)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(linked2.0, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn get_project_progress_counts_by_status() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "progress-test", "/tmp", "main", "claude-code", "worktree")
        .await
        .unwrap();

    let a = tasks::insert_task(
        &pool, project.id, "core", None, "a", "d", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();
    tasks::insert_task(
        &pool, project.id, "core", None, "b", "d", "narrow", "auto", 3, 0, 0, None,
    )
    .await
    .unwrap();

    tasks::update_task_status(&pool, a.id, TaskStatus::Done).await.unwrap();

    let progress = tasks::get_project_progress(&pool, project.id).await.unwrap();
    assert_eq!(progress.total, 2);
    assert_eq!(progress.done, 1);
    assert_eq!(progress.unassigned, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}
