//! Wire format for Wyvern's task decomposition output.
//!
//! Wyvern, the authoritative planner agent, analyzes one work area and
//! returns a TOML document describing the tasks (and their plan steps) that
//! should be created for it. These types map directly onto that document and
//! are deserialized via `serde` + the `toml` crate.

use serde::{Deserialize, Serialize};

/// Top-level structure of Wyvern's output for a single work area.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WyvernPlanToml {
    /// Work-area metadata.
    pub plan: WyvernPlanMeta,
    /// Tasks within the work area.
    #[serde(default)]
    pub tasks: Vec<TaskToml>,
}

/// Work-area metadata in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WyvernPlanMeta {
    /// Work area name this decomposition covers (e.g. "auth", "billing").
    pub work_area: String,
    /// Feature this work area was assigned from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
}

/// A single `[[tasks]]` entry in Wyvern's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskToml {
    /// Unique task name within the work area (used as an identifier in `depends_on`).
    pub name: String,
    /// Multi-line description of what the task should accomplish.
    pub description: String,
    /// Scope level: "narrow", "medium", or "broad".
    pub scope: String,
    /// Gate policy: "auto", "human_review", or "human_approve".
    pub gate: String,
    /// Maximum retry attempts before the task requires human intervention.
    #[serde(default = "default_retry_max")]
    pub retry_max: i32,
    /// Scheduling priority. Higher runs first among otherwise-ready tasks.
    #[serde(default)]
    pub priority: i32,
    /// Names of tasks this task depends on (must complete first).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Names of invariants to link to this task.
    #[serde(default)]
    pub invariants: Vec<String>,
    /// Override harness for this task (uses project default_harness if not set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness: Option<String>,
    /// Ordered plan steps. Workers reveal one step's full detail at a time;
    /// an empty list means the whole task is a single step.
    #[serde(default)]
    pub steps: Vec<StepToml>,
}

/// A single plan step within a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepToml {
    /// Short title, always visible to the agent.
    pub title: String,
    /// Full instructions, revealed only once the step becomes current.
    pub description: String,
}

fn default_retry_max() -> i32 {
    3
}
