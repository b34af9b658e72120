//! Shared types for the [`super::Harness`] trait: the task a harness is
//! given to work on, the handle to a spawned process, and the event stream
//! a harness emits while that process runs.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tokio::process::ChildStdin;
use uuid::Uuid;

/// A task description handed to a harness, with its working directory and
/// environment already resolved.
#[derive(Debug)]
pub struct MaterializedTask {
    /// The task's database ID.
    pub task_id: Uuid,
    /// The task's short name.
    pub name: String,
    /// The fully rendered prompt body: context, plan steps, retry feedback.
    pub description: String,
    /// Invariant commands, rendered for the prompt's "how you'll be
    /// checked" section.
    pub invariant_commands: Vec<String>,
    /// The directory the agent process should run in.
    pub working_dir: PathBuf,
    /// Environment variables to inject into the agent process.
    pub env_vars: HashMap<String, String>,
}

/// A handle to a spawned agent process.
pub struct AgentHandle {
    /// OS process ID.
    pub pid: u32,
    /// The process's stdin, if the harness supports streaming input.
    /// Taken (`Option::take`) when the prompt is written.
    pub stdin: Option<ChildStdin>,
    /// The task this process is working on.
    pub task_id: Uuid,
    /// Which attempt this is.
    pub attempt: i32,
    /// The name of the harness that spawned this process.
    pub harness_name: String,
}

/// An event emitted by a running agent, normalized across harness
/// implementations.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A text message from the agent (or, with `role = "assistant"`, its
    /// reasoning/response).
    Message { role: String, content: String },
    /// The agent invoked a tool.
    ToolCall { tool: String, input: Value },
    /// A tool call returned a result.
    ToolResult { tool: String, output: Value },
    /// Token usage reported for this turn.
    TokenUsage { input_tokens: u64, output_tokens: u64 },
    /// The agent reported an error.
    Error { message: String },
    /// The agent process has exited; no further events will follow.
    Completed,
}
