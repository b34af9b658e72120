//! `drakeward cleanup <project-id>` command: remove worktrees for completed tasks.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_core::worktree::WorktreeManager;
use drakeward_db::models::TaskStatus;
use drakeward_db::queries::projects as project_db;
use drakeward_db::queries::tasks as task_db;

/// Run the cleanup command.
pub async fn run_cleanup(pool: &PgPool, project_id_str: &str, all: bool) -> Result<()> {
    let project_id = Uuid::parse_str(project_id_str)
        .with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    let worktree_manager =
        WorktreeManager::new(&project.project_path, None).map_err(|e| anyhow::anyhow!("{e}"))?;

    let tasks = task_db::list_tasks_for_project(pool, project_id).await?;

    let mut removed = 0;
    let mut skipped = 0;

    for task in &tasks {
        let eligible = if all { true } else { task.status == TaskStatus::Done };

        if !eligible {
            skipped += 1;
            continue;
        }

        if let Some(ref wt_path) = task.worktree_path {
            let path = std::path::Path::new(wt_path);
            match worktree_manager.remove_worktree(path) {
                Ok(()) => {
                    println!("  Removed: {} ({})", task.name, wt_path);
                    removed += 1;
                }
                Err(e) => {
                    eprintln!(
                        "  Warning: failed to remove worktree for {}: {e}",
                        task.name
                    );
                }
            }
        }
    }

    // Prune any stale worktree references.
    let _ = worktree_manager.cleanup_stale();

    println!("\nCleanup complete: {removed} worktree(s) removed, {skipped} skipped.");

    Ok(())
}
