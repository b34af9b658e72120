//! Database query functions for the `plan_steps` table.
//!
//! A task's plan steps enforce one invariant throughout: at most one step
//! per task may be `current` at a time. Every mutating query here upholds
//! it explicitly rather than relying on a database constraint, since the
//! "exactly one current" rule spans a whole transaction, not a single row.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PlanStep, PlanStepStatus};

/// Insert a task's full ordered step list in one transaction, all starting
/// `pending` except the first, which starts `current`.
pub async fn insert_plan_steps(
    pool: &PgPool,
    task_id: Uuid,
    steps: &[(String, String)],
) -> Result<Vec<PlanStep>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let mut inserted = Vec::with_capacity(steps.len());

    for (ordinal, (title, description)) in steps.iter().enumerate() {
        let status = if ordinal == 0 {
            PlanStepStatus::Current
        } else {
            PlanStepStatus::Pending
        };

        let step = sqlx::query_as::<_, PlanStep>(
            "INSERT INTO plan_steps (task_id, ordinal, title, description, status) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING *",
        )
        .bind(task_id)
        .bind(ordinal as i32)
        .bind(title)
        .bind(description)
        .bind(status)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert plan step")?;

        inserted.push(step);
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(inserted)
}

/// List all steps for a task, in order.
pub async fn list_plan_steps(pool: &PgPool, task_id: Uuid) -> Result<Vec<PlanStep>> {
    let steps = sqlx::query_as::<_, PlanStep>(
        "SELECT * FROM plan_steps WHERE task_id = $1 ORDER BY ordinal ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list plan steps")?;

    Ok(steps)
}

/// Fetch the single `current` step for a task, if any.
pub async fn get_current_step(pool: &PgPool, task_id: Uuid) -> Result<Option<PlanStep>> {
    let step = sqlx::query_as::<_, PlanStep>(
        "SELECT * FROM plan_steps WHERE task_id = $1 AND status = 'current'",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch current plan step")?;

    Ok(step)
}

/// Mark the current step `done` and advance the next pending step (by
/// ordinal) to `current`, atomically. Returns the newly-current step, or
/// `None` if the completed step was the last one.
pub async fn advance_current_step(pool: &PgPool, task_id: Uuid) -> Result<Option<PlanStep>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let current = sqlx::query_as::<_, PlanStep>(
        "UPDATE plan_steps SET status = 'done', updated_at = now() \
         WHERE task_id = $1 AND status = 'current' \
         RETURNING *",
    )
    .bind(task_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to complete current plan step")?
    .with_context(|| format!("task {task_id} has no current plan step"))?;

    let next = sqlx::query_as::<_, PlanStep>(
        "UPDATE plan_steps SET status = 'current', updated_at = now() \
         WHERE task_id = $1 AND status = 'pending' AND ordinal = ( \
             SELECT MIN(ordinal) FROM plan_steps \
             WHERE task_id = $1 AND status = 'pending' \
         ) \
         RETURNING *",
    )
    .bind(task_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to advance plan step")?;

    let _ = current;
    tx.commit().await.context("failed to commit transaction")?;
    Ok(next)
}

/// Mark the current step `failed`.
pub async fn fail_current_step(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE plan_steps SET status = 'failed', updated_at = now() \
         WHERE task_id = $1 AND status = 'current'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to fail current plan step")?;

    Ok(result.rows_affected())
}

/// Whether every step for a task is `done`.
pub async fn all_steps_done(pool: &PgPool, task_id: Uuid) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM plan_steps WHERE task_id = $1 AND status != 'done'",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to check plan step completion")?;

    Ok(row.0 == 0)
}
