//! Task creation service layer.
//!
//! Orchestrates turning Wyvern's validated TOML output for one work area into
//! rows in the database: task rows, dependency edges, invariant links, and
//! plan steps, all inserted within a single transaction.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::models::Task;
use drakeward_db::queries::{plan_steps as step_queries, tasks as task_queries};

use super::toml_format::WyvernPlanToml;

/// Create all tasks for a work area from Wyvern's validated output.
///
/// Inserts one task row per `[[tasks]]` entry, dependency edges, invariant
/// links, and plan step rows, all inside a single database transaction. If
/// any step fails, the entire operation is rolled back.
///
/// Invariant names referenced in the TOML are resolved to UUIDs by looking
/// them up in the `invariants` table. If any referenced invariant does not
/// exist, the entire operation fails.
pub async fn create_tasks_from_wyvern_output(
    pool: &PgPool,
    project_id: Uuid,
    feature_id: Option<Uuid>,
    plan: &WyvernPlanToml,
) -> Result<Vec<Task>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let work_area = &plan.plan.work_area;
    let levels = dependency_levels(plan);

    // 1. Insert all tasks and build a name -> UUID map.
    let mut task_name_to_id: HashMap<String, Uuid> = HashMap::new();
    let mut inserted: Vec<Task> = Vec::with_capacity(plan.tasks.len());

    for task_toml in &plan.tasks {
        let task = sqlx::query_as::<_, Task>(
            "INSERT INTO tasks \
             (project_id, work_area, feature_id, name, description, scope_level, gate_policy, \
              retry_max, priority, dependency_level, requested_harness) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING *",
        )
        .bind(project_id)
        .bind(work_area)
        .bind(feature_id)
        .bind(&task_toml.name)
        .bind(&task_toml.description)
        .bind(&task_toml.scope)
        .bind(&task_toml.gate)
        .bind(task_toml.retry_max)
        .bind(task_toml.priority)
        .bind(levels.get(&task_toml.name).copied().unwrap_or(0))
        .bind(&task_toml.harness)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert task {:?}", task_toml.name))?;

        task_name_to_id.insert(task_toml.name.clone(), task.id);
        inserted.push(task);
    }

    // 2. Insert dependency edges.
    for task_toml in &plan.tasks {
        let task_id = task_name_to_id[&task_toml.name];
        for dep_name in &task_toml.depends_on {
            let dep_id = task_name_to_id[dep_name];
            sqlx::query(
                "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(task_id)
            .bind(dep_id)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "failed to insert dependency: {:?} -> {:?}",
                    task_toml.name, dep_name
                )
            })?;
        }
    }

    // 3. Link invariants by name.
    let mut missing: Vec<String> = Vec::new();

    for task_toml in &plan.tasks {
        let task_id = task_name_to_id[&task_toml.name];
        for inv_name in &task_toml.invariants {
            let inv_row: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM invariants WHERE name = $1")
                    .bind(inv_name)
                    .fetch_optional(&mut *tx)
                    .await
                    .with_context(|| format!("failed to look up invariant {:?}", inv_name))?;

            match inv_row {
                Some((inv_id,)) => {
                    sqlx::query(
                        "INSERT INTO task_invariants (task_id, invariant_id) VALUES ($1, $2) \
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(task_id)
                    .bind(inv_id)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| {
                        format!(
                            "failed to link task {:?} to invariant {:?}",
                            task_toml.name, inv_name
                        )
                    })?;
                }
                None => {
                    missing.push(format!(
                        "invariant {:?} referenced by task {:?} does not exist in the database",
                        inv_name, task_toml.name
                    ));
                }
            }
        }
    }

    if !missing.is_empty() {
        bail!(
            "work area {:?} references unknown invariants:\n  {}",
            work_area,
            missing.join("\n  ")
        );
    }

    tx.commit().await.context("failed to commit transaction")?;

    // 4. Insert plan steps per task (its own transaction per task, via the
    // plan_steps query helper, which already enforces the single-Current
    // invariant).
    for task_toml in &plan.tasks {
        if task_toml.steps.is_empty() {
            continue;
        }
        let task_id = task_name_to_id[&task_toml.name];
        let steps: Vec<(String, String)> = task_toml
            .steps
            .iter()
            .map(|s| (s.title.clone(), s.description.clone()))
            .collect();
        step_queries::insert_plan_steps(pool, task_id, &steps)
            .await
            .with_context(|| format!("failed to insert plan steps for task {:?}", task_toml.name))?;
    }

    Ok(inserted)
}

/// Fetch all tasks belonging to a project.
pub async fn get_project_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    task_queries::list_tasks_for_project(pool, project_id).await
}

/// Compute each task's dependency level: the length of the longest chain of
/// dependencies leading to it (tasks with no dependencies are level 0).
/// Assumes the plan has already been validated as a DAG.
fn dependency_levels(plan: &WyvernPlanToml) -> HashMap<String, i32> {
    let by_name: HashMap<&str, &super::toml_format::TaskToml> =
        plan.tasks.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut levels: HashMap<String, i32> = HashMap::new();

    fn level_of<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a super::toml_format::TaskToml>,
        levels: &mut HashMap<String, i32>,
    ) -> i32 {
        if let Some(l) = levels.get(name) {
            return *l;
        }
        let task = match by_name.get(name) {
            Some(t) => t,
            None => return 0,
        };
        let level = task
            .depends_on
            .iter()
            .map(|dep| level_of(dep, by_name, levels) + 1)
            .max()
            .unwrap_or(0);
        levels.insert(name.to_string(), level);
        level
    }

    for name in by_name.keys() {
        level_of(name, &by_name, &mut levels);
    }

    levels
}
