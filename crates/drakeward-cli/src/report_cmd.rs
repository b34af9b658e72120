//! `drakeward report` command: show token usage and duration report for a project.

use anyhow::{Context, Result};
use sqlx::PgPool;

use drakeward_db::models::TaskStatus;
use drakeward_db::queries::agent_events;
use drakeward_db::queries::projects as project_db;
use drakeward_db::queries::tasks as task_db;

/// Run the report command.
pub async fn run_report(pool: &PgPool, project_id_str: &str) -> Result<()> {
    let project_id = crate::resolve::resolve_project_id(project_id_str)?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    // Project summary.
    println!("Project: {} ({})", project.name, project.id);
    println!("Status: {}", project.status);

    if let (Some(approved), Some(completed)) = (project.approved_at, project.completed_at) {
        let duration = completed - approved;
        let secs = duration.num_seconds();
        let mins = secs / 60;
        let rem = secs % 60;
        println!("Duration: {mins}m {rem}s");
    }
    println!();

    // Total token usage.
    let (input, output) = agent_events::get_token_usage_for_project(pool, project_id).await?;
    let total = input + output;
    println!("Token usage:");
    println!("  Input:    {input}");
    println!("  Output:   {output}");
    println!("  Total:    {total}");
    if let Some(budget) = project.token_budget {
        let pct = if budget > 0 {
            (total as f64 / budget as f64) * 100.0
        } else {
            0.0
        };
        println!("  Budget:   {budget} ({pct:.1}% used)");
    }
    println!();

    // Per-task breakdown.
    let tasks = task_db::list_tasks_for_project(pool, project_id).await?;

    let mut done_count: usize = 0;
    let total_count = tasks.len();

    println!(
        "{:<30} {:<18} {:>8} {:>12} {:>12}",
        "TASK", "STATUS", "ATTEMPT", "TOKENS", "WALL TIME"
    );
    println!("{}", "-".repeat(82));

    for task in &tasks {
        if task.status == TaskStatus::Done {
            done_count += 1;
        }

        let (t_input, t_output) = agent_events::get_token_usage_for_task(pool, task.id).await?;
        let t_total = t_input + t_output;
        let token_str = if t_total > 0 {
            format!("{t_total}")
        } else {
            "-".to_string()
        };

        let wall_str = match (task.started_at, task.completed_at) {
            (Some(start), Some(end)) => {
                let secs = (end - start).num_seconds();
                format!("{secs}s")
            }
            (Some(_start), None) => "running".to_string(),
            _ => "-".to_string(),
        };

        let name_display = if task.name.len() > 28 {
            format!("{}...", &task.name[..25])
        } else {
            task.name.clone()
        };

        println!(
            "{:<30} {:<18} {:>8} {:>12} {:>12}",
            name_display, task.status, task.attempt, token_str, wall_str
        );
    }

    println!();
    println!(
        "Success rate: {}/{} ({:.0}%)",
        done_count,
        total_count,
        if total_count > 0 {
            (done_count as f64 / total_count as f64) * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}
