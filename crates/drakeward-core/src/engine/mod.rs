//! Lifecycle Engine: a small set of independent periodic tickers that move
//! projects through the state machine, plus the shutdown coordinator.
//!
//! Grounded on the teacher's `run_orchestrator` main-loop-with-interval
//! pattern, generalized from one loop to five independent ones. Every
//! ticker skips projects not in `ExecutionState::Running`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drakeward_db::models::{ExecutionState, ProjectStatus};
use drakeward_db::queries::{projects as project_db, tasks as task_db};

use crate::circuit::CircuitBreaker;
use crate::dialogue::DialogueSessionStore;
use crate::governor::{AgentKind, ResourceGovernor};
use crate::harness::HarnessRegistry;
use crate::isolation::Isolation;
use crate::orchestrator::{run_orchestrator, OrchestratorConfig};
use crate::planner;
use crate::runner::Provider;
use crate::state::dispatch;
use crate::token::TokenConfig;

/// Intervals for each ticker, and the shutdown grace period. Defaults match
/// the documented per-ticker cadence.
#[derive(Debug, Clone, Copy)]
pub struct EngineIntervals {
    pub wyrm: Duration,
    pub wyvern: Duration,
    pub supervisor: Duration,
    pub monitoring: Duration,
    pub recovery: Duration,
    pub grace_period: Duration,
}

impl Default for EngineIntervals {
    fn default() -> Self {
        Self {
            wyrm: Duration::from_secs(60),
            wyvern: Duration::from_secs(60),
            supervisor: Duration::from_secs(30),
            monitoring: Duration::from_secs(60),
            recovery: Duration::from_secs(300),
            grace_period: Duration::from_secs(10),
        }
    }
}

/// Iteration caps for the direct-call planner agents, sourced from the
/// `iterations` config section (`maxWyrmIterations`/`maxWyvernIterations`).
#[derive(Debug, Clone, Copy)]
pub struct PlannerIterations {
    pub wyrm: u32,
    pub wyvern: u32,
}

impl Default for PlannerIterations {
    fn default() -> Self {
        Self { wyrm: 8, wyvern: 1 }
    }
}

/// Everything the Lifecycle Engine needs, gathered into one handle so each
/// ticker can be spawned as its own long-lived tokio task.
pub struct LifecycleEngine {
    pool: PgPool,
    intervals: EngineIntervals,
    harness_registry: Arc<HarnessRegistry>,
    isolation: Arc<dyn Isolation>,
    token_config: TokenConfig,
    governor: Arc<ResourceGovernor>,
    circuit_breaker: Arc<CircuitBreaker>,
    dialogue_sessions: Arc<DialogueSessionStore>,
    planner_provider: Arc<dyn Provider>,
    /// Iteration caps for Wyrm/Wyvern, sourced from config.
    iterations: PlannerIterations,
    /// Concurrency cap and per-task timeout for each Supervisor's Worker
    /// pool, sourced from `limits.maxParallelKobolds`/`stuckKoboldTimeoutMinutes`.
    orchestrator_config: OrchestratorConfig,
    /// Wyrm's most recent recommendation per project, held only until
    /// Wyvern consumes it. Not persisted: a crash between the two ticks
    /// simply re-runs Wyrm, since the project is still `WyrmAssigned`
    /// only after Wyvern's work is also done (see `run_wyvern`'s
    /// `mark_analyzed` call).
    pending_recommendations: Mutex<HashMap<Uuid, String>>,
    /// Project ids with an active Supervisor task, so the supervisor
    /// ticker doesn't double-spawn one.
    active_supervisors: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl LifecycleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        intervals: EngineIntervals,
        harness_registry: Arc<HarnessRegistry>,
        isolation: Arc<dyn Isolation>,
        token_config: TokenConfig,
        governor: Arc<ResourceGovernor>,
        circuit_breaker: Arc<CircuitBreaker>,
        dialogue_sessions: Arc<DialogueSessionStore>,
        planner_provider: Arc<dyn Provider>,
        iterations: PlannerIterations,
        orchestrator_config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            intervals,
            harness_registry,
            isolation,
            token_config,
            governor,
            circuit_breaker,
            dialogue_sessions,
            planner_provider,
            iterations,
            orchestrator_config,
            pending_recommendations: Mutex::new(HashMap::new()),
            active_supervisors: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// A child token tickers can watch; cancelling the engine's own token
    /// (via [`Self::shutdown`]) cancels every ticker's token too.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn all five tickers as independent tokio tasks. Returns their
    /// join handles so the caller can await them (normally only after
    /// [`Self::shutdown`] has been called).
    pub fn spawn_all(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.clone()
                .spawn_ticker("wyrm-processing", self.intervals.wyrm, Self::tick_wyrm),
            self.clone()
                .spawn_ticker("wyvern-processing", self.intervals.wyvern, Self::tick_wyvern),
            self.clone()
                .spawn_ticker("supervisor-execution", self.intervals.supervisor, Self::tick_supervisor),
            self.clone()
                .spawn_ticker("drake-monitoring", self.intervals.monitoring, Self::tick_monitoring),
            self.clone()
                .spawn_ticker("failure-recovery", self.intervals.recovery, Self::tick_recovery),
        ]
    }

    fn spawn_ticker<F, Fut>(self: Arc<Self>, name: &'static str, interval: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(ticker = name, "lifecycle ticker stopping on cancellation");
                        break;
                    }
                    _ = ticker.tick() => {
                        tick(self.clone()).await;
                    }
                }
            }
        })
    }

    async fn running_projects(&self, status: ProjectStatus) -> Result<Vec<drakeward_db::models::Project>> {
        let running = project_db::list_projects_by_execution_state(&self.pool, ExecutionState::Running).await?;
        Ok(running.into_iter().filter(|p| p.status == status).collect())
    }

    /// `New | SpecificationModified -> WyrmAssigned`.
    async fn tick_wyrm(self: Arc<Self>) {
        let candidates = match self.running_projects(ProjectStatus::New).await {
            Ok(mut new) => {
                match self.running_projects(ProjectStatus::SpecificationModified).await {
                    Ok(modified) => {
                        new.extend(modified);
                        new
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "wyrm ticker: failed to list specification_modified projects");
                        new
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "wyrm ticker: failed to list new projects");
                return;
            }
        };

        for project in candidates {
            let _admission = match self.governor.admit(project.id, AgentKind::Wyrm) {
                Ok(guard) => guard,
                Err(limit) => {
                    tracing::debug!(project_id = %project.id, limit = limit.limit, "wyrm ticker: governor limit reached, skipping this tick");
                    continue;
                }
            };

            match planner::run_wyrm(&self.pool, self.planner_provider.as_ref(), project.id, self.iterations.wyrm).await {
                Ok(recommendation) => {
                    self.pending_recommendations
                        .lock()
                        .expect("pending recommendations lock poisoned")
                        .insert(project.id, recommendation);
                }
                Err(e) => {
                    tracing::error!(project_id = %project.id, error = %e, "wyrm ticker failed for project");
                }
            }
        }
    }

    /// `WyrmAssigned -> Analyzed`.
    async fn tick_wyvern(self: Arc<Self>) {
        let candidates = match self.running_projects(ProjectStatus::WyrmAssigned).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "wyvern ticker: failed to list projects");
                return;
            }
        };

        for project in candidates {
            let recommendation = {
                self.pending_recommendations
                    .lock()
                    .expect("pending recommendations lock poisoned")
                    .get(&project.id)
                    .cloned()
            };

            let Some(recommendation) = recommendation else {
                tracing::warn!(
                    project_id = %project.id,
                    "wyvern ticker: no cached wyrm recommendation (engine restarted mid-cycle?); skipping"
                );
                continue;
            };

            let _admission = match self.governor.admit(project.id, AgentKind::Wyvern) {
                Ok(guard) => guard,
                Err(limit) => {
                    tracing::debug!(project_id = %project.id, limit = limit.limit, "wyvern ticker: governor limit reached, skipping this tick");
                    continue;
                }
            };

            match planner::run_wyvern(&self.pool, self.planner_provider.as_ref(), project.id, &recommendation, self.iterations.wyvern).await {
                Ok(tasks) => {
                    tracing::info!(project_id = %project.id, task_count = tasks.len(), "wyvern produced tasks");
                    self.pending_recommendations
                        .lock()
                        .expect("pending recommendations lock poisoned")
                        .remove(&project.id);
                }
                Err(e) => {
                    tracing::error!(project_id = %project.id, error = %e, "wyvern ticker failed for project");
                    let _ = project_db::fail_project(&self.pool, project.id, &format!("wyvern: {e}")).await;
                }
            }
        }
    }

    /// `Analyzed -> InProgress`, spawning a Supervisor per project.
    async fn tick_supervisor(self: Arc<Self>) {
        let mut candidates = match self.running_projects(ProjectStatus::Analyzed).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "supervisor ticker: failed to list analyzed projects");
                Vec::new()
            }
        };
        match self.running_projects(ProjectStatus::InProgress).await {
            Ok(p) => candidates.extend(p),
            Err(e) => tracing::error!(error = %e, "supervisor ticker: failed to list in_progress projects"),
        }

        let mut active = self.active_supervisors.lock().expect("active supervisors lock poisoned");
        active.retain(|_, handle| !handle.is_finished());

        for project in candidates {
            if active.contains_key(&project.id) {
                continue;
            }

            let engine = self.clone();
            let project_id = project.id;
            let cancel = self.cancel.child_token();
            let handle = tokio::spawn(async move {
                let _admission = match engine.governor.admit(project_id, AgentKind::Supervisor) {
                    Ok(guard) => guard,
                    Err(limit) => {
                        tracing::debug!(project_id = %project_id, limit = limit.limit, "supervisor ticker: governor limit reached, skipping this tick");
                        return;
                    }
                };
                match run_orchestrator(
                    &engine.pool,
                    project_id,
                    &engine.harness_registry,
                    &engine.isolation,
                    &engine.token_config,
                    &engine.orchestrator_config,
                    cancel,
                )
                .await
                {
                    Ok(result) => {
                        tracing::info!(project_id = %project_id, result = ?result, "supervisor run finished");
                    }
                    Err(e) => {
                        tracing::error!(project_id = %project_id, error = %e, "supervisor run failed");
                    }
                }
            });
            active.insert(project_id, handle);
        }
    }

    /// Health-check supervisors and detect stuck workers. Orphan recovery
    /// after a crash (tasks left `working` with no live Worker) is handled
    /// by `run_orchestrator` itself at the start of each supervisor run;
    /// this tick additionally sweeps any project whose supervisor task
    /// exited without completing or failing the project (a panic, or a
    /// process that was killed) so the next supervisor tick can respawn it.
    async fn tick_monitoring(self: Arc<Self>) {
        let mut active = self.active_supervisors.lock().expect("active supervisors lock poisoned");
        let finished: Vec<Uuid> = active
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            active.remove(id);
        }
        drop(active);

        for project_id in finished {
            match project_db::get_project(&self.pool, project_id).await {
                Ok(Some(p)) if p.status == ProjectStatus::InProgress => {
                    tracing::warn!(project_id = %project_id, "supervisor exited without finishing; will respawn next tick");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(project_id = %project_id, error = %e, "monitoring: failed to reload project"),
            }
        }

        if let Ok(running) = project_db::list_projects_by_execution_state(&self.pool, ExecutionState::Running).await {
            let in_progress = running.iter().filter(|p| p.status == ProjectStatus::InProgress).count();
            tracing::debug!(in_progress_projects = in_progress, "drake monitoring tick");
        }
    }

    /// Retry eligible `Failed` tasks whose `next_retry_at` has elapsed.
    async fn tick_recovery(self: Arc<Self>) {
        let due = match task_db::get_tasks_due_for_retry(&self.pool).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = %e, "recovery ticker: failed to list due tasks");
                return;
            }
        };

        for task in due {
            if let Err(e) = dispatch::retry_task(&self.pool, task.id).await {
                tracing::error!(task_id = %task.id, error = %e, "recovery ticker: retry failed");
            }
        }
    }

    /// Trigger a graceful shutdown: broadcast cancellation, wait the grace
    /// period, flush active supervisors, and persist in-memory session
    /// state. Any step's failure is logged but does not abort later steps.
    pub async fn shutdown(&self) {
        tracing::info!("lifecycle engine shutdown: broadcasting cancellation");
        self.cancel.cancel();

        tokio::time::sleep(self.intervals.grace_period).await;

        let handles: Vec<(Uuid, JoinHandle<()>)> = {
            let mut active = self.active_supervisors.lock().expect("active supervisors lock poisoned");
            active.drain().collect()
        };
        for (project_id, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(project_id = %project_id, error = %e, "supervisor task panicked during shutdown flush");
            }
        }

        let idle_evicted = self.dialogue_sessions.collect_idle();
        let remaining = self.dialogue_sessions.len();
        tracing::info!(
            idle_evicted,
            remaining,
            "shutdown: dialogue sessions GC'd (remaining sessions are not persisted across restart)"
        );

        tracing::info!("lifecycle engine shutdown complete");
    }

    pub fn governor(&self) -> &ResourceGovernor {
        &self.governor
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}
