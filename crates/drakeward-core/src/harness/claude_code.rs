//! Claude Code harness adapter.
//!
//! Spawns `claude -p --output-format stream-json` as a subprocess and
//! parses its JSONL output into [`AgentEvent`] variants.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::trait_def::Harness;
use super::types::{AgentEvent, AgentHandle, MaterializedTask};

/// Internal state kept per spawned process.
struct ProcessState {
    /// The child process handle (for kill / is_running).
    child: Child,
    /// Stdout reader; `Option` so it can be `.take()`-ed once for streaming.
    stdout: Option<ChildStdout>,
}

/// Harness adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code).
///
/// Launches `claude -p --output-format stream-json` and streams events
/// by parsing each JSONL line emitted on stdout.
#[derive(Clone)]
pub struct ClaudeCodeAdapter {
    /// Path to the `claude` binary. Defaults to `"claude"` (found via `$PATH`).
    claude_binary_path: String,
    /// Per-process bookkeeping, keyed by OS pid.
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
}

impl std::fmt::Debug for ClaudeCodeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeCodeAdapter")
            .field("claude_binary_path", &self.claude_binary_path)
            .finish()
    }
}

impl ClaudeCodeAdapter {
    /// Create a new adapter that will look for `claude` on `$PATH`.
    pub fn new() -> Self {
        Self {
            claude_binary_path: "claude".to_string(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a new adapter with a custom binary path.
    ///
    /// Useful for testing or when `claude` is installed in a non-standard
    /// location.
    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            claude_binary_path: path.into(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// JSONL parsing helpers
// ---------------------------------------------------------------------------

/// Parse a single JSONL line from Claude Code's stream-json output into
/// zero or more `AgentEvent` values.
///
/// Returns `Ok(events)` on success or `Err` if the line is not valid JSON.
/// Callers should treat `Err` as a warning and continue reading.
fn parse_stream_json_line(line: &str) -> Result<Vec<AgentEvent>> {
    let v: serde_json::Value =
        serde_json::from_str(line).context("malformed JSON in stream output")?;

    let mut events = Vec::new();

    // Determine the event type from the top-level "type" field.
    let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        // ----------------------------------------------------------------
        // assistant -- contains a message with content blocks and usage
        // ----------------------------------------------------------------
        "assistant" => {
            if let Some(message) = v.get("message") {
                // Extract text content from content blocks.
                if let Some(content_arr) = message.get("content").and_then(|c| c.as_array()) {
                    for block in content_arr {
                        let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
                        match block_type {
                            "text" => {
                                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                    events.push(AgentEvent::Message {
                                        role: "assistant".to_string(),
                                        content: text.to_string(),
                                    });
                                }
                            }
                            "tool_use" => {
                                let tool_name = block
                                    .get("name")
                                    .and_then(|n| n.as_str())
                                    .unwrap_or("unknown")
                                    .to_string();
                                let input = block
                                    .get("input")
                                    .cloned()
                                    .unwrap_or(serde_json::Value::Null);
                                events.push(AgentEvent::ToolCall {
                                    tool: tool_name,
                                    input,
                                });
                            }
                            _ => {
                                // Unknown content block type; skip.
                            }
                        }
                    }
                }

                // Extract token usage if present.
                if let Some(usage) = message.get("usage") {
                    let input_tokens =
                        usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                    let output_tokens = usage
                        .get("output_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0);
                    if input_tokens > 0 || output_tokens > 0 {
                        events.push(AgentEvent::TokenUsage {
                            input_tokens,
                            output_tokens,
                        });
                    }
                }
            }
        }

        // ----------------------------------------------------------------
        // tool_use -- agent invoked a tool (sometimes top-level)
        // ----------------------------------------------------------------
        "tool_use" => {
            let tool_name = v
                .get("name")
                .or_else(|| v.get("tool"))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string();
            let input = v
                .get("input")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            events.push(AgentEvent::ToolCall {
                tool: tool_name,
                input,
            });
        }

        // ----------------------------------------------------------------
        // tool_result -- a tool returned a value
        // ----------------------------------------------------------------
        "tool_result" => {
            let tool_name = v
                .get("name")
                .or_else(|| v.get("tool"))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string();
            let output = v
                .get("output")
                .or_else(|| v.get("content"))
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            events.push(AgentEvent::ToolResult {
                tool: tool_name,
                output,
            });
        }

        // ----------------------------------------------------------------
        // result -- final result message from Claude Code
        // ----------------------------------------------------------------
        "result" => {
            // The result type often contains a final text and usage info.
            if let Some(result_text) = v.get("result").and_then(|r| r.as_str()) {
                events.push(AgentEvent::Message {
                    role: "assistant".to_string(),
                    content: result_text.to_string(),
                });
            }
            // Also check for usage at top level of result.
            if let Some(usage) = v.get("usage") {
                let input_tokens =
                    usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                let output_tokens = usage
                    .get("output_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                if input_tokens > 0 || output_tokens > 0 {
                    events.push(AgentEvent::TokenUsage {
                        input_tokens,
                        output_tokens,
                    });
                }
            }
        }

        // ----------------------------------------------------------------
        // error -- an error from the agent
        // ----------------------------------------------------------------
        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message").and_then(|m| m.as_str()))
                .or_else(|| v.get("message").and_then(|m| m.as_str()))
                .unwrap_or("unknown error")
                .to_string();
            events.push(AgentEvent::Error { message });
        }

        // ----------------------------------------------------------------
        // Unrecognised -- ignore but log
        // ----------------------------------------------------------------
        other => {
            debug!(event_type = other, "ignoring unrecognised stream-json event type");
        }
    }

    Ok(events)
}

// ---------------------------------------------------------------------------
// Harness trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Harness for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle> {
        // Build the system prompt / task instructions that will be appended.
        let system_instructions = format!(
            "You are working on task: {name}\n\n{description}\n\n\
             Available invariant commands:\n{invariants}\n\n\
             When you are done, run: drakeward done",
            name = task.name,
            description = task.description,
            invariants = task
                .invariant_commands
                .iter()
                .map(|c| format!("  - {c}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let mut cmd = Command::new(&self.claude_binary_path);

        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--allowedTools")
            .arg("Bash,Read,Edit,Write,Glob,Grep")
            .arg("--append-system-prompt")
            .arg(&system_instructions);

        // Working directory.
        cmd.current_dir(&task.working_dir);

        // Environment variables (merge, don't replace the entire env).
        for (key, value) in &task.env_vars {
            cmd.env(key, value);
        }

        // We need stdin, stdout, and stderr pipes.
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::null());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn claude binary at '{}' -- is it installed and on PATH?",
                self.claude_binary_path
            )
        })?;

        let pid = child.id().context("child process has no pid")?;

        // Take the piped stdin so we can give it to AgentHandle.
        let stdin = child.stdin.take();
        // Take stdout so we can store it for events().
        let stdout = child.stdout.take();

        // Store the child + stdout for later use by events(), kill(),
        // is_running().
        {
            let mut processes = self.processes.lock().await;
            processes.insert(
                pid,
                ProcessState {
                    child,
                    stdout,
                },
            );
        }

        Ok(AgentHandle {
            pid,
            stdin,
            task_id: task.task_id,
            attempt: 0,
            harness_name: self.name().to_string(),
        })
    }

    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let pid = handle.pid;
        let processes = Arc::clone(&self.processes);

        // We build an async_stream that:
        // 1. Takes stdout from the process state.
        // 2. Reads it line by line.
        // 3. Parses each line and yields AgentEvent values.
        // 4. On EOF or error, yields Completed.
        let stream = async_stream::stream! {
            // Take stdout out of the process state.
            let stdout = {
                let mut procs = processes.lock().await;
                procs.get_mut(&pid).and_then(|state| state.stdout.take())
            };

            let Some(stdout) = stdout else {
                warn!(pid, "no stdout available for pid -- events already consumed or process missing");
                yield AgentEvent::Error {
                    message: "stdout not available (already consumed or process not found)".to_string(),
                };
                yield AgentEvent::Completed;
                return;
            };

            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match parse_stream_json_line(trimmed) {
                            Ok(events) => {
                                for event in events {
                                    yield event;
                                }
                            }
                            Err(e) => {
                                warn!(line = trimmed, error = %e, "skipping malformed JSONL line");
                            }
                        }
                    }
                    Ok(None) => {
                        // EOF -- process closed stdout.
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "error reading agent stdout");
                        yield AgentEvent::Error {
                            message: format!("stdout read error: {e}"),
                        };
                        break;
                    }
                }
            }

            yield AgentEvent::Completed;
        };

        Box::pin(stream)
    }

    async fn send(&self, handle: &AgentHandle, message: &str) -> Result<()> {
        // AgentHandle.stdin is Option<ChildStdin>, but we only have &handle,
        // not &mut handle. For real usage the caller must hold &mut handle
        // and take() the stdin. However, the trait signature uses &AgentHandle.
        //
        // We fall back to a stored reference, but ideally the caller should
        // have taken stdin from the handle and written directly.
        //
        // For now: bail with a descriptive error since we cannot mutate the
        // handle through a shared reference. A production implementation
        // would use interior mutability on the handle or store stdin in the
        // adapter's process map. Let's store a channel instead -- but to keep
        // it simple, we note that `send` is primarily for --resume flows
        // and stdin is typically written before events() consumes stdout.
        //
        // Practical approach: we don't have the stdin here, but we can still
        // write to /proc/<pid>/fd/0 on Linux. That won't work portably.
        // Instead, let's just log a warning for now. This will be refined
        // when conversation continuation is implemented in T013.
        let _ = handle;
        let _ = message;
        bail!(
            "send() is not yet supported for ClaudeCodeAdapter -- \
             conversation continuation via --resume will be added in T013"
        )
    }

    async fn kill(&self, handle: &AgentHandle) -> Result<()> {
        let pid = handle.pid;

        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            // First attempt: SIGTERM via Child::kill() which on Unix sends
            // SIGKILL. We want SIGTERM first, so use nix/libc if available.
            // Since we target macOS/Linux, use libc::kill directly.
            //
            // Send SIGTERM.
            #[cfg(unix)]
            {
                // SAFETY: pid is a valid u32 from a child we spawned.
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }

            // Wait briefly for graceful shutdown.
            let exited = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                state.child.wait(),
            )
            .await;

            match exited {
                Ok(Ok(_status)) => {
                    debug!(pid, "process exited after SIGTERM");
                }
                _ => {
                    // Still running or error waiting -- force kill.
                    debug!(pid, "process did not exit after SIGTERM, sending SIGKILL");
                    let _ = state.child.kill().await;
                }
            }

            // Remove from our process map.
            processes.remove(&pid);
        } else {
            debug!(pid, "kill called but process not in map (already exited?)");
        }

        Ok(())
    }

    async fn is_running(&self, handle: &AgentHandle) -> bool {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            // try_wait returns Ok(Some(status)) if exited, Ok(None) if still
            // running, Err on failure.
            match state.child.try_wait() {
                Ok(Some(_status)) => {
                    // Exited -- clean up.
                    processes.remove(&pid);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(pid, error = %e, "error checking process status");
                    false
                }
            }
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
