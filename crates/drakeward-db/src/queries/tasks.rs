//! Database query functions for the `tasks`, `task_dependencies`, and
//! `task_invariants` tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ErrorCategory, Task, TaskStatus};

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (id, created_at, status `unassigned`, attempt 0).
///
/// `scope_level` and `gate_policy` are passed as strings that must match the
/// CHECK constraints on the `tasks` table (e.g. "narrow", "auto").
#[allow(clippy::too_many_arguments)]
pub async fn insert_task(
    pool: &PgPool,
    project_id: Uuid,
    work_area: &str,
    feature_id: Option<Uuid>,
    name: &str,
    description: &str,
    scope_level: &str,
    gate_policy: &str,
    retry_max: i32,
    priority: i32,
    dependency_level: i32,
    requested_harness: Option<&str>,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
            (project_id, work_area, feature_id, name, description, scope_level, \
             gate_policy, retry_max, priority, dependency_level, requested_harness) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(project_id)
    .bind(work_area)
    .bind(feature_id)
    .bind(name)
    .bind(description)
    .bind(scope_level)
    .bind(gate_policy)
    .bind(retry_max)
    .bind(priority)
    .bind(dependency_level)
    .bind(requested_harness)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks for a given project, ordered by creation time.
pub async fn list_tasks_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// List all tasks for a given project restricted to one work area.
pub async fn list_tasks_for_work_area(
    pool: &PgPool,
    project_id: Uuid,
    work_area: &str,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 AND work_area = $2 ORDER BY created_at ASC",
    )
    .bind(project_id)
    .bind(work_area)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for work area")?;

    Ok(tasks)
}

/// Update the status of a task.
pub async fn update_task_status(pool: &PgPool, id: Uuid, status: TaskStatus) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update task status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Insert a dependency edge: `task_id` depends on `depends_on_id`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_task_dependency(
    pool: &PgPool,
    task_id: Uuid,
    depends_on_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_id)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Get the IDs of all tasks that a given task depends on.
pub async fn get_task_dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Get the names of all tasks that a given task depends on (resolving through
/// the tasks table).
pub async fn get_task_dependency_names(pool: &PgPool, task_id: Uuid) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT dep.name FROM task_dependencies td \
         JOIN tasks dep ON dep.id = td.depends_on \
         WHERE td.task_id = $1 \
         ORDER BY dep.name",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to get task dependency names")?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Count total dependency edges for a project.
pub async fn count_dependency_edges(pool: &PgPool, project_id: Uuid) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM task_dependencies td \
         JOIN tasks t ON t.id = td.task_id \
         WHERE t.project_id = $1",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await
    .context("failed to count dependency edges")?;

    Ok(row.0)
}

/// Link a task to an invariant.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn link_task_invariant(pool: &PgPool, task_id: Uuid, invariant_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_invariants (task_id, invariant_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(invariant_id)
    .execute(pool)
    .await
    .context("failed to link task to invariant")?;

    Ok(())
}

// -----------------------------------------------------------------------
// State-machine queries
// -----------------------------------------------------------------------

/// Atomically transition a task from one status to another.
///
/// Uses optimistic locking: the UPDATE's WHERE clause includes
/// `status = $from`, so the row is only updated if the current status
/// matches the expected `from` value. Returns the number of rows
/// affected (0 means the status did not match).
pub async fn transition_task_status(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             started_at = COALESCE($2, started_at), \
             completed_at = COALESCE($3, completed_at), \
             updated_at = now() \
         WHERE id = $4 AND status = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Mark a task `failed`, recording the error message and category and, if
/// the category is retry-eligible, a `next_retry_at` backoff deadline.
pub async fn fail_task(
    pool: &PgPool,
    task_id: Uuid,
    error_message: &str,
    error_category: ErrorCategory,
    next_retry_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', \
             error_message = $2, \
             error_category = $3, \
             next_retry_at = $4, \
             completed_at = now(), \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(task_id)
    .bind(error_message)
    .bind(error_category)
    .bind(next_retry_at)
    .execute(pool)
    .await
    .context("failed to fail task")?;

    Ok(result.rows_affected())
}

/// Propagate a dependency failure: move a task to `blocked_by_failure`
/// without touching its attempt counter.
pub async fn block_task_by_failure(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'blockedbyfailure', updated_at = now() \
         WHERE id = $1 AND status IN ('unassigned', 'notinitialized')",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to block task by failure")?;

    Ok(result.rows_affected())
}

/// Atomically retry a `failed` task: move it back to `unassigned`,
/// incrementing the attempt counter and clearing run metadata. Uses
/// optimistic locking on both status and the current attempt value.
pub async fn transition_task_retry(
    pool: &PgPool,
    task_id: Uuid,
    current_attempt: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'unassigned', \
             attempt = attempt + 1, \
             assigned_harness = NULL, \
             worktree_path = NULL, \
             error_message = NULL, \
             error_category = NULL, \
             next_retry_at = NULL, \
             started_at = NULL, \
             completed_at = NULL, \
             updated_at = now() \
         WHERE id = $1 AND status = 'failed' AND attempt = $2",
    )
    .bind(task_id)
    .bind(current_attempt)
    .execute(pool)
    .await
    .context("failed to retry task")?;

    Ok(result.rows_affected())
}

/// Set the assigned harness and worktree path on a task.
pub async fn assign_task_metadata(
    pool: &PgPool,
    task_id: Uuid,
    harness: &str,
    worktree_path: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET assigned_harness = $1, worktree_path = $2, updated_at = now() \
         WHERE id = $3",
    )
    .bind(harness)
    .bind(worktree_path)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to assign task metadata")?;

    Ok(result.rows_affected())
}

/// Record the commit produced by a task's successful run.
pub async fn record_task_commit(
    pool: &PgPool,
    task_id: Uuid,
    commit_sha: &str,
    changed_files: &[String],
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET commit_sha = $1, changed_files = $2, updated_at = now() \
         WHERE id = $3",
    )
    .bind(commit_sha)
    .bind(changed_files)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to record task commit")?;

    Ok(result.rows_affected())
}

/// Get all tasks in a project whose dependencies are all `done` and whose
/// own status is `unassigned` or `notinitialized` (i.e. ready to be
/// assigned), ordered for the supervisor's scheduling pass: highest
/// priority first, then shallowest dependency level, then oldest.
pub async fn get_ready_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* \
         FROM tasks t \
         WHERE t.project_id = $1 \
           AND t.status IN ('unassigned', 'notinitialized') \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id AND dep.status != 'done' \
           ) \
         ORDER BY t.priority DESC, t.dependency_level ASC, t.created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get ready tasks")?;

    Ok(tasks)
}

/// Find tasks that are `unassigned`/`notinitialized` and depend (directly)
/// on a task that is now `failed` or `blocked_by_failure`, so the caller can
/// cascade the block.
pub async fn get_tasks_blocked_by(pool: &PgPool, failed_task_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* \
         FROM tasks t \
         JOIN task_dependencies td ON td.task_id = t.id \
         WHERE td.depends_on = $1 \
           AND t.status IN ('unassigned', 'notinitialized')",
    )
    .bind(failed_task_id)
    .fetch_all(pool)
    .await
    .context("failed to get tasks blocked by failure")?;

    Ok(tasks)
}

/// Status counts for a project's tasks.
#[derive(Debug, Clone, Default)]
pub struct ProjectProgress {
    pub unassigned: i64,
    pub notinitialized: i64,
    pub working: i64,
    pub done: i64,
    pub failed: i64,
    pub blocked_by_failure: i64,
    pub total: i64,
}

/// Get a summary of task counts by status for a given project.
pub async fn get_project_progress(pool: &PgPool, project_id: Uuid) -> Result<ProjectProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt \
         FROM tasks \
         WHERE project_id = $1 \
         GROUP BY status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get project progress")?;

    let mut progress = ProjectProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "unassigned" => progress.unassigned = *count,
            "notinitialized" => progress.notinitialized = *count,
            "working" => progress.working = *count,
            "done" => progress.done = *count,
            "failed" => progress.failed = *count,
            "blockedbyfailure" => progress.blocked_by_failure = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Check whether all tasks in a project have status `done`.
pub async fn is_project_complete(pool: &PgPool, project_id: Uuid) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tasks \
         WHERE project_id = $1 AND status != 'done'",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await
    .context("failed to check project completion")?;

    Ok(row.0 == 0)
}

/// Reset tasks stuck in `working` back to `failed` so the failure-recovery
/// ticker can decide whether to retry them.
///
/// Used for restart recovery: if the supervisor process crashes mid-run,
/// tasks it had dispatched are left in limbo. This resets them to a
/// terminal state the recovery ticker already knows how to handle.
///
/// Returns the tasks that were reset.
pub async fn reset_orphaned_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'failed', \
             error_category = 'transient', \
             completed_at = now(), \
             updated_at = now() \
         WHERE project_id = $1 \
           AND status = 'working' \
         RETURNING *",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to reset orphaned tasks")?;

    Ok(tasks)
}

/// Reset a failed task back to `unassigned` with an incremented attempt
/// counter. This is the operator override path for tasks whose error
/// category is not retry-eligible (`stuck` or `permanent`): the normal
/// recovery ticker will not touch them, but an operator can force a retry.
pub async fn retry_task_to_unassigned(
    pool: &PgPool,
    task_id: Uuid,
    current_attempt: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'unassigned', \
             attempt = attempt + 1, \
             assigned_harness = NULL, \
             worktree_path = NULL, \
             error_message = NULL, \
             error_category = NULL, \
             next_retry_at = NULL, \
             started_at = NULL, \
             completed_at = NULL, \
             updated_at = now() \
         WHERE id = $1 AND status = 'failed' AND attempt = $2",
    )
    .bind(task_id)
    .bind(current_attempt)
    .execute(pool)
    .await
    .context("failed to retry task to unassigned")?;

    Ok(result.rows_affected())
}

/// A task with its project name (for cross-project views like the review
/// queue).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskWithProjectName {
    pub id: Uuid,
    pub project_id: Uuid,
    pub work_area: String,
    pub name: String,
    pub description: String,
    pub scope_level: crate::models::ScopeLevel,
    pub gate_policy: crate::models::GatePolicy,
    pub retry_max: i32,
    pub status: TaskStatus,
    pub assigned_harness: Option<String>,
    pub requested_harness: Option<String>,
    pub worktree_path: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub project_name: String,
}

/// List all tasks awaiting human review, i.e. `working` tasks whose gate
/// policy requires a human to sign off rather than the automatic gate.
pub async fn list_tasks_awaiting_review(pool: &PgPool) -> Result<Vec<TaskWithProjectName>> {
    let tasks = sqlx::query_as::<_, TaskWithProjectName>(
        "SELECT t.id, t.project_id, t.work_area, t.name, t.description, t.scope_level, \
                t.gate_policy, t.retry_max, t.status, t.assigned_harness, t.requested_harness, \
                t.worktree_path, t.attempt, \
                t.created_at, t.started_at, t.completed_at, \
                p.name AS project_name \
         FROM tasks t \
         JOIN projects p ON p.id = t.project_id \
         WHERE t.status = 'working' AND t.gate_policy IN ('human_review', 'human_approve') \
         ORDER BY t.created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list tasks awaiting review")?;

    Ok(tasks)
}

/// Tasks whose `next_retry_at` has elapsed and whose error category is
/// retry-eligible -- the failure-recovery ticker's query.
pub async fn get_tasks_due_for_retry(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = 'failed' \
           AND error_category IN ('transient', 'provider_unavailable') \
           AND next_retry_at IS NOT NULL \
           AND next_retry_at <= now() \
           AND attempt < retry_max",
    )
    .fetch_all(pool)
    .await
    .context("failed to get tasks due for retry")?;

    Ok(tasks)
}
