//! `drakeward engine` command: run the Lifecycle Engine's tickers, moving
//! every running project through New -> WyrmAssigned -> Analyzed ->
//! InProgress -> Done automatically, instead of requiring an operator to
//! drive each project through `dispatch` by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use drakeward_core::circuit::{BreakerConfig, CircuitBreaker};
use drakeward_core::dialogue::DialogueSessionStore;
use drakeward_core::engine::LifecycleEngine;
use drakeward_core::governor::ResourceGovernor;
use drakeward_core::harness::{ClaudeCodeAdapter, HarnessRegistry};
use drakeward_core::isolation;
use drakeward_core::runner::anthropic::AnthropicProvider;
use drakeward_core::runner::Provider;

use crate::config::DrakewardConfig;

/// Run the Lifecycle Engine until interrupted.
///
/// `projects_path` is the repository root the shared isolation backend
/// operates under (the projects_path config value, or the current
/// directory if unset); `provider_model` selects the model the direct-call
/// provider Wyrm/Wyvern use.
pub async fn run_engine(
    pool: PgPool,
    resolved: &DrakewardConfig,
    projects_path: Option<&str>,
    provider_model: &str,
) -> Result<()> {
    let mut registry = HarnessRegistry::new();
    registry.register(ClaudeCodeAdapter::new());
    let registry = Arc::new(registry);

    let repo_path = projects_path.map(std::path::PathBuf::from).unwrap_or_else(|| {
        std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
    });
    let isolation = isolation::create_isolation("worktree", &repo_path)?;

    let planner_provider: Arc<dyn Provider> = Arc::new(AnthropicProvider::from_env(provider_model)?);

    let governor = Arc::new(ResourceGovernor::new(resolved.governor_limits));
    let circuit_breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let dialogue_sessions = Arc::new(DialogueSessionStore::new());

    let engine = Arc::new(LifecycleEngine::new(
        pool,
        resolved.engine_intervals,
        registry,
        isolation,
        resolved.token_config.clone(),
        governor,
        circuit_breaker,
        dialogue_sessions,
        planner_provider,
        resolved.planner_iterations,
        resolved.orchestrator_config.clone(),
    ));

    println!("Lifecycle Engine starting.");
    let handles = engine.spawn_all();

    // Graceful shutdown: first Ctrl+C requests the engine wind down, second
    // force-exits, same pattern as `drakeward dispatch`.
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);
    let shutdown_requested = CancellationToken::new();
    let shutdown_requested_clone = shutdown_requested.clone();

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down the lifecycle engine (Ctrl+C again to force)...");
            shutdown_requested_clone.cancel();
        }
    });

    shutdown_requested.cancelled().await;
    engine.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }

    println!("Lifecycle Engine stopped.");
    Ok(())
}
