//! Task decomposition: Wyvern prompt construction, response parsing,
//! persistence, and task materialization for workers.

pub mod generate;
pub mod materialize;
pub mod parser;
pub mod service;
pub mod toml_format;

pub use generate::{
    GenerateContext, InvariantInfo, build_system_prompt, invariants_from_presets,
    parse_wyvern_response,
};
pub use materialize::materialize_task;
pub use parser::{PlanParseError, parse_plan_toml};
pub use service::{create_tasks_from_wyvern_output, get_project_tasks};
pub use toml_format::{StepToml, TaskToml, WyvernPlanMeta, WyvernPlanToml};
