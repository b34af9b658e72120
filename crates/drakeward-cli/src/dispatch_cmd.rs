//! `drakeward dispatch` command: run a project to completion using the orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drakeward_core::harness::{ClaudeCodeAdapter, HarnessRegistry};
use drakeward_core::isolation;
use drakeward_core::orchestrator::{OrchestratorConfig, OrchestratorResult, run_orchestrator};
use drakeward_core::token::TokenConfig;
use drakeward_db::queries::projects as project_db;

/// Run the dispatch command.
pub async fn run_dispatch(
    pool: &PgPool,
    project_id_str: &str,
    max_agents: usize,
    timeout_secs: u64,
    token_config: &TokenConfig,
) -> Result<()> {
    let project_id = Uuid::parse_str(project_id_str)
        .with_context(|| format!("invalid project ID: {project_id_str}"))?;

    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {project_id} not found"))?;

    println!("Dispatching project: {} ({})", project.name, project.id);
    println!("  Max agents: {max_agents}");
    println!("  Task timeout: {timeout_secs}s");

    // Set up harness registry.
    let mut registry = HarnessRegistry::new();
    registry.register(ClaudeCodeAdapter::new());
    let registry = Arc::new(registry);

    // Set up isolation backend based on project configuration.
    let isolation = isolation::create_isolation(
        &project.isolation,
        std::path::Path::new(&project.project_path),
    )?;

    // Build config.
    let config = OrchestratorConfig {
        max_agents,
        task_timeout: Duration::from_secs(timeout_secs),
    };

    // Set up graceful shutdown: first signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                // Second signal: force exit.
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    // Run orchestrator.
    let result = run_orchestrator(
        pool,
        project_id,
        &registry,
        &isolation,
        token_config,
        &config,
        cancel,
    )
    .await?;

    // Print result.
    match result {
        OrchestratorResult::Completed => {
            println!("\nProject completed successfully! All tasks done.");
        }
        OrchestratorResult::Failed { failed_tasks } => {
            println!("\nProject failed. Tasks that exhausted retries:");
            for task in &failed_tasks {
                println!("  - {task}");
            }
            std::process::exit(1);
        }
        OrchestratorResult::HumanRequired {
            tasks_awaiting_review,
        } => {
            println!("\nProject paused -- tasks awaiting human review:");
            for task in &tasks_awaiting_review {
                println!("  - {task}");
            }
            println!();
            println!("To resume:");
            println!("  1. Review each task: drakeward gate <task-id>");
            println!("  2. Approve or reject:  drakeward approve <task-id>  /  drakeward reject <task-id>");
            println!("  3. Re-run dispatch:    drakeward dispatch {project_id}");
            std::process::exit(2);
        }
        OrchestratorResult::BudgetExceeded { used, budget } => {
            println!("\nProject stopped: token budget exceeded ({used}/{budget} tokens used).");
            std::process::exit(3);
        }
        OrchestratorResult::Interrupted => {
            println!("\nProject interrupted by signal. In-flight tasks drained.");
            println!("Re-run `drakeward dispatch {project_id}` to resume.");
            std::process::exit(130);
        }
    }

    Ok(())
}
