//! Hand-written `sqlx` query functions, one module per table family.

pub mod agent_events;
pub mod features;
pub mod gate_results;
pub mod invariants;
pub mod plan_steps;
pub mod projects;
pub mod specifications;
pub mod tasks;
