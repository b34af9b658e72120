//! Query helpers for project/task progress tracking.
//!
//! These re-export and wrap the lower-level DB queries from
//! [`drakeward_db::queries::tasks`] for use in the orchestration layer.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::models::Task;
pub use drakeward_db::queries::tasks::ProjectProgress;

/// Get all tasks in a project that are ready to be dispatched, ordered by
/// priority descending, then dependency level ascending, then age.
///
/// A task is "ready" when:
/// - Its own status is `unassigned` or `notinitialized`.
/// - All of its dependencies have status `done`.
pub async fn get_ready_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    drakeward_db::queries::tasks::get_ready_tasks(pool, project_id).await
}

/// Get a progress summary (counts by status) for a project.
pub async fn get_project_progress(pool: &PgPool, project_id: Uuid) -> Result<ProjectProgress> {
    drakeward_db::queries::tasks::get_project_progress(pool, project_id).await
}

/// Check whether every task in a project has status `done`.
pub async fn is_project_complete(pool: &PgPool, project_id: Uuid) -> Result<bool> {
    drakeward_db::queries::tasks::is_project_complete(pool, project_id).await
}
