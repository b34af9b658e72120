//! Convenience dispatch helpers that wrap [`super::TaskStateMachine`]
//! transitions with semantic names.

use std::path::Path;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::models::{ErrorCategory, TaskStatus};
use drakeward_db::queries::tasks as task_db;

use super::TaskStateMachine;

/// Assign a task to a harness and worktree.
///
/// Validates that all dependencies are `done`, sets metadata, and
/// transitions `unassigned`/`notinitialized` -> `working`.
pub async fn assign_task(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    harness: &str,
    worktree_path: &Path,
) -> Result<()> {
    TaskStateMachine::assign_task(pool, task_id, from, harness, worktree_path).await
}

/// Mark a task as done: transition `working -> done`.
///
/// Sets `completed_at` to the current timestamp.
pub async fn complete_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Working, TaskStatus::Done).await
}

/// Mark a task as failed: transition `working -> failed`, recording the
/// error message and category, and cascading `blockedbyfailure` to direct
/// dependents.
pub async fn fail_task(
    pool: &PgPool,
    task_id: Uuid,
    error_message: &str,
    error_category: ErrorCategory,
) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Working, TaskStatus::Failed).await?;
    TaskStateMachine::fail_task(pool, task_id, error_message, error_category).await
}

/// Retry a failed task: transition `failed -> unassigned`.
///
/// Increments the attempt counter. Fails if `attempt >= retry_max`.
pub async fn retry_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Failed, TaskStatus::Unassigned).await
}

/// Operator approval of a `working` task gated by `human_approve`: the same
/// `working -> done` transition as an automatic gate pass.
pub async fn approve_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    complete_task(pool, task_id).await
}

/// Operator rejection of a `working` task gated by `human_review` or
/// `human_approve`: fails the task as permanently errored, so the normal
/// retry-eligibility sweep will not pick it back up.
pub async fn reject_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    fail_task(pool, task_id, "rejected by operator", ErrorCategory::Permanent).await
}

/// Operator-initiated retry of a `failed` task.
///
/// With `force = false` this is identical to [`retry_task`] and still
/// respects `attempt < retry_max`. With `force = true`, bypasses that check
/// via [`task_db::retry_task_to_unassigned`] -- the override path for tasks
/// whose error category left them outside the automatic recovery sweep (a
/// `stuck` or `permanent` classification) or that have exhausted
/// `retry_max`.
pub async fn operator_retry_task(pool: &PgPool, task_id: Uuid, force: bool) -> Result<()> {
    if !force {
        return retry_task(pool, task_id).await;
    }

    let task = task_db::get_task(pool, task_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("task {} not found", task_id))?;

    let rows = task_db::retry_task_to_unassigned(pool, task_id, task.attempt).await?;
    if rows == 0 {
        anyhow::bail!(
            "optimistic lock failed on forced retry for task {} (attempt {})",
            task_id,
            task.attempt
        );
    }

    Ok(())
}
