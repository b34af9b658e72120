//! Invariants: domain definitions and the subprocess runner that executes
//! them against a task's worktree for the gate.

pub mod runner;
pub mod types;

pub use runner::{run_invariant, InvariantResult};
pub use types::InvariantDefinition;
