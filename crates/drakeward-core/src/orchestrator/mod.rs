//! DAG-aware orchestrator: runs a project's tasks to completion by spawning
//! agents in topological order, enforcing concurrency limits, and handling
//! retries.
//!
//! This is the Supervisor's scheduling loop. It owns nothing in the lifecycle
//! engine's ticker set directly; a ticker spawns one of these per project
//! that is `in_progress` and lets it run until the project completes, fails,
//! needs a human, runs out of budget, or is cancelled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drakeward_db::models::{ErrorCategory, GatePolicy, ProjectStatus, TaskStatus};
use drakeward_db::queries::agent_events;
use drakeward_db::queries::projects as project_db;
use drakeward_db::queries::tasks as task_db;

use crate::harness::HarnessRegistry;
use crate::isolation::Isolation;
use crate::lifecycle::{run_agent_lifecycle, LifecycleConfig, LifecycleResult};
use crate::state::dispatch;
use crate::token::TokenConfig;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrent agents.
    pub max_agents: usize,
    /// Wall time limit per task.
    pub task_timeout: Duration,
}

/// Result of running the orchestrator to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorResult {
    /// All tasks reached `done`.
    Completed,
    /// One or more tasks exhausted their retries.
    Failed { failed_tasks: Vec<String> },
    /// One or more tasks require human review.
    HumanRequired { tasks_awaiting_review: Vec<String> },
    /// Token budget exceeded.
    BudgetExceeded { used: i64, budget: i64 },
    /// Orchestrator was interrupted by a cancellation signal.
    Interrupted,
}

/// Message sent from spawned lifecycle tasks back to the orchestrator loop.
struct LifecycleDone {
    task_id: Uuid,
    task_name: String,
    result: Result<LifecycleResult>,
}

/// Run the orchestrator for a project.
///
/// Spawns agents for tasks whose dependencies are all `done`, enforces a
/// concurrency limit via a semaphore, retries eligible failures, and leaves
/// permanently failed or human-gated tasks for the operator.
pub async fn run_orchestrator(
    pool: &PgPool,
    project_id: Uuid,
    registry: &Arc<HarnessRegistry>,
    isolation: &Arc<dyn Isolation>,
    token_config: &TokenConfig,
    config: &OrchestratorConfig,
    cancel: CancellationToken,
) -> Result<OrchestratorResult> {
    let project = project_db::get_project(pool, project_id)
        .await?
        .with_context(|| format!("project {} not found", project_id))?;

    let project_name = project.name.clone();
    let default_harness = project.default_harness.clone();

    // 1. Restart recovery: reset orphaned `working` tasks to `failed`.
    let orphaned = task_db::reset_orphaned_tasks(pool, project_id).await?;
    for orphan in &orphaned {
        tracing::warn!(
            task_id = %orphan.id,
            task_name = %orphan.name,
            "reset orphaned task to failed"
        );
        if orphan.attempt < orphan.retry_max {
            dispatch::retry_task(pool, orphan.id).await?;
            tracing::info!(
                task_id = %orphan.id,
                task_name = %orphan.name,
                "retrying orphaned task"
            );
        } else {
            tracing::warn!(
                task_id = %orphan.id,
                task_name = %orphan.name,
                "orphaned task has no retries left, leaving failed"
            );
        }
    }

    // 2. Project status: analyzed -> in_progress (skip if already running).
    if project.status == ProjectStatus::Analyzed {
        project_db::update_project_status(pool, project_id, ProjectStatus::InProgress).await?;
    } else if project.status != ProjectStatus::InProgress {
        bail!(
            "project {} has status {}, expected analyzed or in_progress",
            project_id,
            project.status
        );
    }

    // 3. Main orchestration loop.
    let semaphore = Arc::new(Semaphore::new(config.max_agents));
    let (tx, mut rx) = mpsc::channel::<LifecycleDone>(config.max_agents * 2);
    let mut in_flight: HashSet<Uuid> = HashSet::new();

    loop {
        // 3-pre. Check cancellation.
        if cancel.is_cancelled() {
            tracing::info!(project_id = %project_id, "orchestrator cancelled, draining in-flight tasks");
            let drain_deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while !in_flight.is_empty() {
                match tokio::time::timeout_at(drain_deadline, rx.recv()).await {
                    Ok(Some(done)) => {
                        in_flight.remove(&done.task_id);
                        let _ = handle_lifecycle_result(pool, &done).await;
                    }
                    _ => break,
                }
            }
            if !in_flight.is_empty() {
                tracing::warn!(
                    project_id = %project_id,
                    remaining = in_flight.len(),
                    "drain timeout expired, tasks still in flight"
                );
            }
            return Ok(OrchestratorResult::Interrupted);
        }

        // 3a. Drain completed results (non-blocking).
        while let Ok(done) = rx.try_recv() {
            in_flight.remove(&done.task_id);
            handle_lifecycle_result(pool, &done).await?;
        }

        // 3a-bis. Budget check.
        if let Some(budget) = project.token_budget {
            let (input, output) =
                agent_events::get_token_usage_for_project(pool, project_id).await?;
            let total = input + output;
            if total >= budget {
                tracing::warn!(
                    project_id = %project_id,
                    used = total,
                    budget = budget,
                    "token budget exceeded, stopping project"
                );
                project_db::fail_project(pool, project_id, "token budget exceeded").await?;
                return Ok(OrchestratorResult::BudgetExceeded {
                    used: total,
                    budget,
                });
            }
        }

        // 3b. Check termination conditions.
        if task_db::is_project_complete(pool, project_id).await? {
            project_db::complete_project(pool, project_id).await?;
            return Ok(OrchestratorResult::Completed);
        }

        let progress = task_db::get_project_progress(pool, project_id).await?;

        if progress.unassigned == 0
            && progress.notinitialized == 0
            && progress.working == 0
            && in_flight.is_empty()
        {
            // Nothing ready, nothing running: what remains is permanently
            // failed or blocked by a permanent failure.
            let tasks = task_db::list_tasks_for_project(pool, project_id).await?;
            let stuck: Vec<String> = tasks
                .iter()
                .filter(|t| {
                    t.status == TaskStatus::Failed || t.status == TaskStatus::BlockedByFailure
                })
                .map(|t| t.name.clone())
                .collect();

            if !stuck.is_empty() {
                project_db::fail_project(pool, project_id, "one or more tasks exhausted retries")
                    .await?;
                return Ok(OrchestratorResult::Failed {
                    failed_tasks: stuck,
                });
            }
        }

        // 3c. Handle any failed tasks (retry or leave failed).
        if progress.failed > 0 && in_flight.is_empty() {
            let tasks = task_db::list_tasks_for_project(pool, project_id).await?;
            for task in &tasks {
                if task.status == TaskStatus::Failed && task.attempt < task.retry_max {
                    dispatch::retry_task(pool, task.id).await?;
                }
            }
            continue;
        }

        // 3d. Tasks sitting in `working` under a human gate policy never
        // get picked up by the ready-task query again; surface them.
        if progress.working > 0 {
            let tasks = task_db::list_tasks_for_project(pool, project_id).await?;
            let awaiting_review: Vec<String> = tasks
                .iter()
                .filter(|t| {
                    t.status == TaskStatus::Working
                        && !in_flight.contains(&t.id)
                        && matches!(t.gate_policy, GatePolicy::HumanReview | GatePolicy::HumanApprove)
                })
                .map(|t| t.name.clone())
                .collect();
            if !awaiting_review.is_empty() {
                return Ok(OrchestratorResult::HumanRequired {
                    tasks_awaiting_review: awaiting_review,
                });
            }
        }

        // 3e. Spawn ready tasks.
        let ready = task_db::get_ready_tasks(pool, project_id).await?;
        let spawned_any = !ready.is_empty();

        for task in ready {
            let permit = semaphore.clone().acquire_owned().await?;

            let pool_clone = pool.clone();
            let project_name_clone = project_name.clone();
            let registry_clone = Arc::clone(registry);
            let isolation_clone = Arc::clone(isolation);
            let token_cfg = token_config.clone();
            let lifecycle_config = LifecycleConfig {
                timeout: config.task_timeout,
            };
            let tx_clone = tx.clone();
            let task_name = task.name.clone();
            let task_id = task.id;
            let from = task.status;

            // Choose harness: per-task > project default > first registered.
            let preferred = task
                .requested_harness
                .clone()
                .unwrap_or_else(|| default_harness.clone());

            let harness_name = if registry_clone.get(&preferred).is_some() {
                preferred
            } else if let Some(first) = registry_clone.list().first() {
                tracing::warn!(
                    task_name = %task.name,
                    preferred = %preferred,
                    fallback = %first,
                    "preferred harness not found, falling back to first registered"
                );
                first.to_string()
            } else {
                tracing::error!(
                    task_name = %task.name,
                    "no harnesses registered, skipping task"
                );
                continue;
            };

            in_flight.insert(task_id);

            tokio::spawn(async move {
                let Some(harness) = registry_clone.get(&harness_name) else {
                    tracing::error!(
                        task_id = %task_id,
                        harness = %harness_name,
                        "harness disappeared from registry after validation"
                    );
                    drop(permit);
                    let _ = tx_clone
                        .send(LifecycleDone {
                            task_id,
                            task_name,
                            result: Err(anyhow::anyhow!(
                                "harness '{}' not found in registry",
                                harness_name
                            )),
                        })
                        .await;
                    return;
                };

                let result = run_agent_lifecycle(
                    &pool_clone,
                    &task,
                    from,
                    &project_name_clone,
                    harness,
                    isolation_clone.as_ref(),
                    &token_cfg,
                    &lifecycle_config,
                )
                .await;

                drop(permit);

                let _ = tx_clone
                    .send(LifecycleDone {
                        task_id,
                        task_name,
                        result,
                    })
                    .await;
            });
        }

        // 3f. If tasks are in flight but nothing is ready, wait for a result
        // or cancellation.
        if !in_flight.is_empty() {
            tokio::select! {
                done = rx.recv() => {
                    if let Some(done) = done {
                        in_flight.remove(&done.task_id);
                        handle_lifecycle_result(pool, &done).await?;
                    }
                }
                _ = cancel.cancelled() => {
                    continue;
                }
            }
        } else if !spawned_any {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = cancel.cancelled() => {
                    continue;
                }
            }
        }
    }
}

/// Handle the result of a completed lifecycle.
async fn handle_lifecycle_result(pool: &PgPool, done: &LifecycleDone) -> Result<()> {
    match &done.result {
        Ok(LifecycleResult::Passed) => {
            tracing::info!(
                task_id = %done.task_id,
                task_name = %done.task_name,
                "task passed"
            );
        }
        Ok(LifecycleResult::FailedCanRetry) => {
            tracing::info!(
                task_id = %done.task_id,
                task_name = %done.task_name,
                "task failed, will retry on next loop iteration"
            );
        }
        Ok(LifecycleResult::FailedNoRetry) => {
            tracing::warn!(
                task_id = %done.task_id,
                task_name = %done.task_name,
                "task failed, no retries left"
            );
        }
        Ok(LifecycleResult::TimedOut) => {
            tracing::warn!(
                task_id = %done.task_id,
                task_name = %done.task_name,
                "task timed out"
            );
        }
        Ok(LifecycleResult::HumanRequired) => {
            tracing::info!(
                task_id = %done.task_id,
                task_name = %done.task_name,
                "task requires human review"
            );
        }
        Err(e) => {
            tracing::error!(
                task_id = %done.task_id,
                task_name = %done.task_name,
                error = %e,
                "lifecycle failed with error"
            );
            // Try to transition the task to failed for cleanup. A task that
            // errored before `assign_task` ran is still unassigned/
            // notinitialized; leaving it alone lets the ready-task query
            // pick it up again.
            if let Some(task) = task_db::get_task(pool, done.task_id).await? {
                if task.status == TaskStatus::Working {
                    let _ = dispatch::fail_task(
                        pool,
                        done.task_id,
                        &format!("lifecycle error: {}", e),
                        ErrorCategory::Transient,
                    )
                    .await;
                }
            }
        }
    }

    Ok(())
}
