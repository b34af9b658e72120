//! Task materialization: render DB state as a markdown document for a worker.
//!
//! [`materialize_task`] produces a standalone markdown document for a single
//! task, suitable for handing to an agent. It reveals plan steps
//! progressively: completed steps show only their title, the current step
//! shows full detail, and pending steps show only their title so the agent
//! knows what's coming without being overloaded up front.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::models::PlanStepStatus;
use drakeward_db::queries::{
    gate_results, invariants as inv_queries, plan_steps as step_queries, tasks as task_queries,
};

/// Materialize a single task as a standalone markdown document.
///
/// The document is designed to be handed to a worker and includes:
/// - Task name, status, scope, and gate policy
/// - Description, or the plan step list if the task has steps
/// - Invariant commands so the agent can run the gate locally
/// - Dependencies and their current statuses
/// - Feedback from the previous attempt, if this is a retry
///
/// It does NOT include project-level context, other tasks' details, or
/// database identifiers.
pub async fn materialize_task(pool: &PgPool, task_id: Uuid) -> Result<String> {
    let task = task_queries::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    let mut out = String::new();

    out.push_str(&format!("# Task: {}\n\n", task.name));
    out.push_str(&format!("**Status:** {}\n\n", task.status));
    out.push_str(&format!("**Scope:** {}  \n", task.scope_level));
    out.push_str(&format!("**Gate policy:** {}\n\n", task.gate_policy));

    let steps = step_queries::list_plan_steps(pool, task_id).await?;

    if steps.is_empty() {
        out.push_str("## Description\n\n");
        out.push_str(task.description.trim());
        out.push_str("\n\n");
    } else {
        out.push_str("## Description\n\n");
        out.push_str(task.description.trim());
        out.push_str("\n\n## Steps\n\n");
        for step in &steps {
            match step.status {
                PlanStepStatus::Done => {
                    out.push_str(&format!("- [x] {}\n", step.title));
                }
                PlanStepStatus::Current => {
                    out.push_str(&format!("- [ ] **{}** (current)\n\n", step.title));
                    out.push_str(step.description.trim());
                    out.push_str("\n\n");
                }
                PlanStepStatus::Pending => {
                    out.push_str(&format!("- [ ] {}\n", step.title));
                }
                PlanStepStatus::Failed => {
                    out.push_str(&format!("- [!] {} (failed, retrying)\n\n", step.title));
                    out.push_str(step.description.trim());
                    out.push_str("\n\n");
                }
            }
        }
        out.push('\n');
    }

    let dep_names = task_queries::get_task_dependency_names(pool, task.id).await?;
    if !dep_names.is_empty() {
        out.push_str("## Dependencies\n\n");
        for dep_name in &dep_names {
            let dep_status = get_dependency_status_by_name(pool, task.project_id, dep_name).await?;
            out.push_str(&format!("- **{}**: {}\n", dep_name, dep_status));
        }
        out.push('\n');
    }

    let invariants = inv_queries::get_invariants_for_task(pool, task.id).await?;
    if !invariants.is_empty() {
        out.push_str("## Invariants\n\n");
        out.push_str("Run `drakeward check` to verify all invariants pass.\n\n");
        for inv in &invariants {
            let args_str = if inv.args.is_empty() {
                String::new()
            } else {
                format!(" {}", inv.args.join(" "))
            };
            out.push_str(&format!(
                "- **{}**: `{}{}`",
                inv.name, inv.command, args_str
            ));
            if let Some(desc) = &inv.description {
                out.push_str(&format!(" -- {}", desc));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if task.attempt > 0 {
        let prev_attempt = task.attempt - 1;
        let prev_results = gate_results::get_gate_results(pool, task.id, prev_attempt).await?;
        let failures: Vec<_> = prev_results.iter().filter(|r| !r.passed).collect();

        if !failures.is_empty() {
            out.push_str("## Previous Attempt Feedback\n\n");
            out.push_str(&format!(
                "Attempt {} failed. The following invariants did not pass:\n\n",
                prev_attempt
            ));

            for failure in &failures {
                let inv_name = match inv_queries::get_invariant(pool, failure.invariant_id).await? {
                    Some(inv) => inv.name,
                    None => format!("unknown ({})", failure.invariant_id),
                };

                let exit_code = failure
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());

                let stderr_snippet = failure.stderr.as_deref().unwrap_or("").to_string();
                let stderr_truncated = truncate_feedback_snippet(&stderr_snippet, 2048);

                out.push_str(&format!("### {}\n\n", inv_name));
                out.push_str(&format!("- **Exit code:** {}\n", exit_code));
                if !stderr_truncated.is_empty() {
                    out.push_str("- **Stderr:**\n```\n");
                    out.push_str(&stderr_truncated);
                    out.push_str("\n```\n");
                }
                out.push('\n');
            }
        }
    }

    if let Some(error_message) = &task.error_message {
        if task.attempt > 0 {
            out.push_str("## Error From Previous Attempt\n\n");
            out.push_str(error_message.trim());
            out.push_str("\n\n");
        }
    }

    Ok(out)
}

/// Look up a task's status by name within a project.
async fn get_dependency_status_by_name(
    pool: &PgPool,
    project_id: Uuid,
    task_name: &str,
) -> Result<String> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT status::text FROM tasks WHERE project_id = $1 AND name = $2")
            .bind(project_id)
            .bind(task_name)
            .fetch_optional(pool)
            .await
            .with_context(|| {
                format!(
                    "failed to look up dependency status for task {:?}",
                    task_name
                )
            })?;

    match row {
        Some((status,)) => Ok(status),
        None => Ok("unknown".to_string()),
    }
}

/// Truncate a string to at most `max_bytes` bytes for feedback snippets,
/// appending "..." if truncated.
fn truncate_feedback_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}
