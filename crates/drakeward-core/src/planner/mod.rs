//! Wiring for the two-stage Wyrm/Wyvern planning pipeline.
//!
//! Wyrm reads a Specification plus its pending Features and produces a
//! natural-language recommendation; Wyvern consumes that recommendation and
//! emits the task decomposition for one work area. Both are single direct
//! completions via [`crate::runner::Provider`] -- no workspace, no
//! subprocess.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::models::{Feature, FeatureStatus, Task};
use drakeward_db::queries::{
    features as feature_db, projects as project_db, specifications as spec_db,
};

use crate::plan::{
    build_system_prompt, create_tasks_from_wyvern_output, invariants_from_presets,
    parse_wyvern_response, GenerateContext,
};
use crate::runner::{Provider, ProviderRequest};

const WYRM_SYSTEM_PROMPT: &str = "You are Wyrm, a pre-analysis planner for Drakeward. \
Read the specification and the proposed features and recommend, for each \
feature, which kind of work it needs and a rough task breakdown grouped by \
work area. Wyvern will turn your recommendation into concrete, \
dependency-ordered tasks -- be concrete about work areas and ordering, but \
do not emit the final task structure yourself.";

/// Run Wyrm over every `New` feature of a project's current specification,
/// producing a single recommendation covering all of them.
///
/// Retries the provider call up to `max_iterations` times (the
/// `maxWyrmIterations` config value) before giving up.
///
/// On success, every feature considered transitions `New -> AssignedToWyvern`
/// and the project records `assigned_planner` (moving `New|SpecificationModified
/// -> WyrmAssigned`).
pub async fn run_wyrm(
    pool: &PgPool,
    provider: &dyn Provider,
    project_id: Uuid,
    max_iterations: u32,
) -> Result<String> {
    let spec = spec_db::get_specification(pool, project_id)
        .await?
        .context("project has no specification to plan from")?;

    let features = feature_db::list_features_for_specification(pool, spec.id).await?;
    let pending: Vec<Feature> = features
        .into_iter()
        .filter(|f| f.status == FeatureStatus::New)
        .collect();

    if pending.is_empty() {
        bail!("no features pending a wyrm recommendation for project {project_id}");
    }

    let feature_list = pending
        .iter()
        .map(|f| format!("- {}: {}", f.name, f.description))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "## Specification\n\n{}\n\n## Features awaiting recommendation\n\n{}",
        spec.content, feature_list
    );

    let response = complete_with_retries(
        provider,
        &ProviderRequest {
            system: WYRM_SYSTEM_PROMPT.to_string(),
            user,
            max_tokens: 4096,
        },
        max_iterations,
    )
    .await
    .context("wyrm provider call failed")?;

    for feature in &pending {
        feature_db::update_feature_status(pool, feature.id, FeatureStatus::AssignedToWyvern).await?;
    }
    project_db::assign_wyrm(pool, project_id, provider.name()).await?;

    Ok(response.text)
}

/// Run Wyvern over one work area: build the decomposition prompt from Wyrm's
/// recommendation, invoke the provider, parse and validate the TOML
/// response, and materialize it into task rows.
///
/// `feature_id` links the created tasks to a Feature (see
/// [`crate::plan::service::create_tasks_from_wyvern_output`]); pass `None`
/// for a work area not tied to a single feature.
///
/// Retries up to `max_iterations` times (the `maxWyvernIterations` config
/// value) when the provider call fails or the response fails TOML
/// validation, re-prompting on each attempt.
pub async fn run_wyvern_for_area(
    pool: &PgPool,
    provider: &dyn Provider,
    project_id: Uuid,
    feature_id: Option<Uuid>,
    work_area: &str,
    feature_name: Option<String>,
    wyrm_recommendation: &str,
    project_type: Option<&str>,
    max_iterations: u32,
) -> Result<Vec<Task>> {
    let ctx = GenerateContext {
        work_area: work_area.to_string(),
        feature_name,
        wyrm_recommendation: wyrm_recommendation.to_string(),
        project_type: project_type.map(str::to_string),
        invariants: invariants_from_presets(project_type),
    };

    let system = build_system_prompt(&ctx);
    let user = format!(
        "Decompose the work area `{}` now. Respond with only the TOML document.",
        work_area
    );
    let request = ProviderRequest {
        system,
        user,
        max_tokens: 8192,
    };

    let attempts = max_iterations.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        let response = match provider.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(work_area, attempt, error = %e, "wyvern provider call failed");
                last_err = Some(e.context("wyvern provider call failed"));
                continue;
            }
        };

        match parse_wyvern_response(&response.text) {
            Ok(plan) => return create_tasks_from_wyvern_output(pool, project_id, feature_id, &plan).await,
            Err(e) => {
                tracing::warn!(work_area, attempt, error = %e, "wyvern output failed validation");
                last_err = Some(e.context(format!("wyvern output for work area {work_area:?} failed validation")));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("wyvern produced no output for work area {work_area:?}")))
}

/// Run Wyvern across every feature currently `AssignedToWyvern`, one work
/// area per feature (the feature's own name is used as its work area).
///
/// On full success, marks the project `Analyzed` with a hash of the
/// recommendation text as `last_processed_hash`, so a later specification
/// edit (which changes the hash) can be detected by the Wyrm ticker.
pub async fn run_wyvern(
    pool: &PgPool,
    provider: &dyn Provider,
    project_id: Uuid,
    wyrm_recommendation: &str,
    max_iterations: u32,
) -> Result<Vec<Task>> {
    let project = project_db::get_project(pool, project_id)
        .await?
        .context("project not found")?;

    let spec = spec_db::get_specification(pool, project_id)
        .await?
        .context("project has no specification")?;

    let features = feature_db::list_features_for_specification(pool, spec.id).await?;
    let assigned: Vec<Feature> = features
        .into_iter()
        .filter(|f| f.status == FeatureStatus::AssignedToWyvern)
        .collect();

    if assigned.is_empty() {
        bail!("no features assigned to wyvern for project {project_id}");
    }

    let project_type = crate::presets::detect_project_type(std::path::Path::new(&project.project_path));

    let mut created = Vec::new();
    for feature in &assigned {
        let tasks = run_wyvern_for_area(
            pool,
            provider,
            project_id,
            Some(feature.id),
            &feature.name,
            Some(feature.name.clone()),
            wyrm_recommendation,
            project_type.as_deref(),
            max_iterations,
        )
        .await?;
        created.extend(tasks);
    }

    let content_hash = format!("{:x}", md5_like_hash(wyrm_recommendation));
    project_db::mark_analyzed(pool, project_id, &content_hash).await?;

    Ok(created)
}

/// Call `provider.complete` up to `max_iterations` times, returning the
/// first success or the last failure once attempts are exhausted.
async fn complete_with_retries(
    provider: &dyn Provider,
    request: &ProviderRequest,
    max_iterations: u32,
) -> Result<crate::runner::ProviderResponse> {
    let attempts = max_iterations.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match provider.complete(request).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "provider call failed, retrying");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap())
}

/// A cheap, stable content hash used purely to detect "did the
/// recommendation Wyvern worked from change" -- not a security primitive.
fn md5_like_hash(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
