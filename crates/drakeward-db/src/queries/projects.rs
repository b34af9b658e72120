//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ExecutionState, Project, ProjectStatus};

/// Insert a new project row. Starts in `prototype` / `running`.
pub async fn insert_project(
    pool: &PgPool,
    name: &str,
    project_path: &str,
    base_branch: &str,
    default_harness: &str,
    isolation: &str,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, project_path, base_branch, default_harness, isolation) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(name)
    .bind(project_path)
    .bind(base_branch)
    .bind(default_harness)
    .bind(isolation)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a project by its ID.
pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// List all projects, newest first.
pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let projects =
        sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list projects")?;

    Ok(projects)
}

/// List every project currently in a given execution state, the set the
/// lifecycle tickers should consider this tick.
pub async fn list_projects_by_execution_state(
    pool: &PgPool,
    execution_state: ExecutionState,
) -> Result<Vec<Project>> {
    let projects = sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE execution_state = $1 ORDER BY created_at ASC",
    )
    .bind(execution_state)
    .fetch_all(pool)
    .await
    .context("failed to list projects by execution state")?;

    Ok(projects)
}

/// Update a project's lifecycle status.
pub async fn update_project_status(pool: &PgPool, id: Uuid, status: ProjectStatus) -> Result<()> {
    let result = sqlx::query("UPDATE projects SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update project status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}

/// Update a project's execution state (running/paused/suspended/cancelled).
pub async fn update_execution_state(
    pool: &PgPool,
    id: Uuid,
    execution_state: ExecutionState,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE projects SET execution_state = $1, updated_at = now() WHERE id = $2")
            .bind(execution_state)
            .bind(id)
            .execute(pool)
            .await
            .context("failed to update project execution state")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}

/// Move a project from `prototype` to `new`: the dialogue agent's explicit
/// approval gate. Records `approved_at`.
pub async fn approve_project(pool: &PgPool, id: Uuid) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "UPDATE projects \
         SET status = 'new', approved_at = now(), updated_at = now() \
         WHERE id = $1 AND status = 'prototype' \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to approve project")?;

    match project {
        Some(p) => Ok(p),
        None => match get_project(pool, id).await? {
            None => anyhow::bail!("project {id} not found"),
            Some(p) => anyhow::bail!(
                "project {id} cannot be approved: current status is {} (must be prototype)",
                p.status
            ),
        },
    }
}

/// Record that a specification changed after the project had already moved
/// past `analyzed`. Flips status to `specification_modified`, which the
/// wyrm ticker treats as a cue to re-plan.
pub async fn mark_specification_modified(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE projects \
         SET status = 'specification_modified', updated_at = now() \
         WHERE id = $1 AND status IN ('analyzed', 'in_progress', 'completed', 'failed')",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark specification modified")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found or not eligible for specification_modified");
    }

    Ok(())
}

/// Record that the wyrm ticker has picked up a project for planning.
pub async fn assign_wyrm(pool: &PgPool, id: Uuid, planner: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE projects \
         SET status = 'wyrm_assigned', assigned_planner = $2, updated_at = now() \
         WHERE id = $1 AND status IN ('new', 'specification_modified')",
    )
    .bind(id)
    .bind(planner)
    .execute(pool)
    .await
    .context("failed to assign wyrm")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found or not eligible for wyrm assignment");
    }

    Ok(())
}

/// Record that wyvern has finished materializing a project's task files.
pub async fn mark_analyzed(pool: &PgPool, id: Uuid, content_hash: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE projects \
         SET status = 'analyzed', last_processed_hash = $2, analyzed_at = now(), updated_at = now() \
         WHERE id = $1 AND status = 'wyrm_assigned'",
    )
    .bind(id)
    .bind(content_hash)
    .execute(pool)
    .await
    .context("failed to mark project analyzed")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found or not wyrm_assigned");
    }

    Ok(())
}

/// Record a completed orchestration pass for the work areas a tick covered.
pub async fn update_pending_work_areas(
    pool: &PgPool,
    id: Uuid,
    pending_work_areas: &[String],
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE projects \
         SET pending_work_areas = $2, last_processed_at = now(), updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(pending_work_areas)
    .execute(pool)
    .await
    .context("failed to update pending work areas")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}

/// Mark a project failed, recording the reason.
pub async fn fail_project(pool: &PgPool, id: Uuid, error_message: &str) -> Result<()> {
    let result = sqlx::query(
        "UPDATE projects \
         SET status = 'failed', error_message = $2, updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(error_message)
    .execute(pool)
    .await
    .context("failed to mark project failed")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}

/// Mark a project completed.
pub async fn complete_project(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query(
        "UPDATE projects \
         SET status = 'completed', completed_at = now(), updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await
    .context("failed to mark project completed")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}

/// Names of tasks in a project that have zero linked invariants -- used by
/// the completeness check before a project is allowed into `in_progress`.
pub async fn tasks_without_invariants(pool: &PgPool, project_id: Uuid) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT t.name FROM tasks t \
         WHERE t.project_id = $1 \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_invariants ti WHERE ti.task_id = t.id \
           ) \
         ORDER BY t.name",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks without invariants")?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}
