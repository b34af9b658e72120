use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use axum::response::Html;
use drakeward_db::models::{AgentEvent, Invariant, Project, Task};
use drakeward_db::queries::tasks::ProjectProgress;
use drakeward_db::queries::{
    agent_events,
    gate_results::{self, GateResultWithName},
    invariants as invariant_db, projects as project_db, tasks as task_db,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub unassigned: i64,
    pub notinitialized: i64,
    pub working: i64,
    pub done: i64,
    pub failed: i64,
    pub blocked_by_failure: i64,
    pub total: i64,
}

impl From<ProjectProgress> for ProgressResponse {
    fn from(p: ProjectProgress) -> Self {
        Self {
            unassigned: p.unassigned,
            notinitialized: p.notinitialized,
            working: p.working,
            done: p.done,
            failed: p.failed,
            blocked_by_failure: p.blocked_by_failure,
            total: p.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenUsageResponse {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize)]
pub struct ProjectSummaryResponse {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressResponse,
    pub token_usage: TokenUsageResponse,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: Task,
    pub dependencies: Vec<Uuid>,
    pub invariants: Vec<Invariant>,
    pub events: Vec<AgentEvent>,
    pub gate_results: Vec<GateResultWithName>,
    pub token_usage: TokenUsageResponse,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{id}", get(get_project_detail))
        .route("/api/tasks/{id}", get(get_task_detail))
        .route("/api/invariants", get(list_invariants_handler))
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("drakeward serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("drakeward serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let projects = project_db::list_projects(&pool)
        .await
        .map_err(AppError::internal)?;

    let rows = if projects.is_empty() {
        "<tr><td colspan=\"3\">No projects found.</td></tr>".to_string()
    } else {
        projects
            .iter()
            .map(|p| {
                format!(
                    "<tr><td><a href=\"/api/projects/{id}\">{name}</a></td><td>{status}</td><td>{id}</td></tr>",
                    id = p.id,
                    name = p.name,
                    status = p.status,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>drakeward</title></head><body>\
<h1>drakeward</h1>\
<p><a href=\"/api/projects\">/api/projects</a> | <a href=\"/api/invariants\">/api/invariants</a></p>\
<table><tr><th>Project</th><th>Status</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_projects(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let projects = project_db::list_projects(&pool)
        .await
        .map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(projects.len());
    for project in projects {
        let progress = task_db::get_project_progress(&pool, project.id)
            .await
            .map_err(AppError::internal)?;
        results.push(ProjectSummaryResponse {
            project,
            progress: progress.into(),
        });
    }

    Ok(Json(results).into_response())
}

async fn get_project_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let project = project_db::get_project(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    let progress = task_db::get_project_progress(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let tasks = task_db::list_tasks_for_project(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let (input_tokens, output_tokens) = agent_events::get_token_usage_for_project(&pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(ProjectDetailResponse {
        project,
        progress: progress.into(),
        token_usage: TokenUsageResponse {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        },
        tasks,
    })
    .into_response())
}

async fn get_task_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = task_db::get_task(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    let dependencies = task_db::get_task_dependencies(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let invariants = invariant_db::get_invariants_for_task(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let events = agent_events::list_all_events_for_task(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let gate_results = gate_results::get_latest_gate_results(&pool, id)
        .await
        .map_err(AppError::internal)?;

    let (input_tokens, output_tokens) = agent_events::get_token_usage_for_task(&pool, id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(TaskDetailResponse {
        task,
        dependencies,
        invariants,
        events,
        gate_results,
        token_usage: TokenUsageResponse {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        },
    })
    .into_response())
}

async fn list_invariants_handler(
    State(pool): State<PgPool>,
) -> Result<axum::response::Response, AppError> {
    let invariants = invariant_db::list_invariants(&pool)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(invariants).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
