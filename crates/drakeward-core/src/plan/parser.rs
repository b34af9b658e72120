//! Wyvern output parser with validation.
//!
//! Parses a TOML string produced by Wyvern into a [`WyvernPlanToml`] and
//! validates:
//! - Scope and gate values are valid enum variants.
//! - Task names are unique.
//! - `depends_on` references point to existing task names.
//! - The dependency graph is acyclic (topological sort).

use std::collections::{HashMap, HashSet, VecDeque};

use drakeward_db::models::{GatePolicy, ScopeLevel};
use thiserror::Error;

use super::toml_format::WyvernPlanToml;

/// Errors that can occur while parsing and validating Wyvern's output.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("duplicate task name: {0:?}")]
    DuplicateTaskName(String),

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("invalid scope {value:?} on task {task:?} (expected narrow, medium, or broad)")]
    InvalidScope { task: String, value: String },

    #[error("invalid gate {value:?} on task {task:?} (expected auto, human_review, or human_approve)")]
    InvalidGate { task: String, value: String },

    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),

    #[error("work area must contain at least one task")]
    NoTasks,
}

/// Parse and validate Wyvern's TOML output for a single work area.
pub fn parse_plan_toml(content: &str) -> Result<WyvernPlanToml, PlanParseError> {
    let plan: WyvernPlanToml = toml::from_str(content)?;
    validate(&plan)?;
    Ok(plan)
}

/// Validate the parsed task decomposition.
fn validate(plan: &WyvernPlanToml) -> Result<(), PlanParseError> {
    if plan.tasks.is_empty() {
        return Err(PlanParseError::NoTasks);
    }

    let mut seen = HashSet::new();
    for task in &plan.tasks {
        if !seen.insert(&task.name) {
            return Err(PlanParseError::DuplicateTaskName(task.name.clone()));
        }
    }

    for task in &plan.tasks {
        if task.scope.parse::<ScopeLevel>().is_err() {
            return Err(PlanParseError::InvalidScope {
                task: task.name.clone(),
                value: task.scope.clone(),
            });
        }

        if task.gate.parse::<GatePolicy>().is_err() {
            return Err(PlanParseError::InvalidGate {
                task: task.name.clone(),
                value: task.gate.clone(),
            });
        }

        for dep in &task.depends_on {
            if !seen.contains(dep) {
                return Err(PlanParseError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    check_for_cycles(plan)?;

    Ok(())
}

/// Detect dependency cycles using Kahn's algorithm for topological sort.
fn check_for_cycles(plan: &WyvernPlanToml) -> Result<(), PlanParseError> {
    let task_names: Vec<&str> = plan.tasks.iter().map(|t| t.name.as_str()).collect();
    let name_to_idx: HashMap<&str, usize> = task_names
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect();

    let n = task_names.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for task in &plan.tasks {
        let task_idx = name_to_idx[task.name.as_str()];
        for dep_name in &task.depends_on {
            let dep_idx = name_to_idx[dep_name.as_str()];
            adj[dep_idx].push(task_idx);
            in_degree[task_idx] += 1;
        }
    }

    let mut queue: VecDeque<usize> = VecDeque::new();
    for (i, deg) in in_degree.iter().enumerate() {
        if *deg == 0 {
            queue.push_back(i);
        }
    }

    let mut sorted_count = 0usize;
    while let Some(node) = queue.pop_front() {
        sorted_count += 1;
        for &neighbor in &adj[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if sorted_count != n {
        let cycle_tasks: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| task_names[i])
            .collect();
        return Err(PlanParseError::CycleDetected(cycle_tasks.join(", ")));
    }

    Ok(())
}
