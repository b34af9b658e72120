//! Dialogue Agent (Dragon): the stateful, multi-session conversation that
//! produces a Specification and gates project approval.
//!
//! Sessions live in memory, keyed by an opaque session id, mirroring the
//! conversation-history/token-budget trimming pattern the reference pack's
//! `LLMSession` type uses: a capped, oldest-first-trimmed message history
//! plus a last-activity timestamp. There is no dedicated sessions table --
//! a Dragon session is a conversational scratchpad, not the system of
//! record (the Specification it produces is).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use drakeward_db::queries::projects as project_db;

use crate::runner::{Provider, ProviderRequest};

/// Maximum messages retained per session; oldest are trimmed first.
pub const MAX_HISTORY_LEN: usize = 100;
/// A session idle longer than this is eligible for garbage collection.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One turn of conversation history.
#[derive(Debug, Clone)]
pub struct DialogueMessage {
    pub role: DialogueRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueRole {
    User,
    Assistant,
}

/// A single Dragon conversation. Reused across client reconnects by session
/// id; its message history is replayed to the client on reconnection.
pub struct DialogueSession {
    pub project_id: Option<Uuid>,
    pub history: Vec<DialogueMessage>,
    last_activity: Instant,
}

impl DialogueSession {
    fn new() -> Self {
        Self {
            project_id: None,
            history: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    fn push(&mut self, message: DialogueMessage) {
        self.history.push(message);
        if self.history.len() > MAX_HISTORY_LEN {
            let overflow = self.history.len() - MAX_HISTORY_LEN;
            self.history.drain(0..overflow);
        }
        self.last_activity = Instant::now();
    }

    fn is_idle(&self) -> bool {
        self.last_activity.elapsed() >= SESSION_IDLE_TIMEOUT
    }
}

const DRAGON_SYSTEM_PROMPT: &str = "You are Dragon, the dialogue agent for Drakeward. \
Talk with the user to develop a project specification: what it should do, its \
constraints, and its scope. When the user is ready, they will approve the \
project explicitly; until then, keep refining the specification with them.";

/// In-memory registry of active Dragon sessions, garbage-collected by the
/// Lifecycle Engine's session-GC tick.
#[derive(Default)]
pub struct DialogueSessionStore {
    sessions: Mutex<HashMap<Uuid, DialogueSession>>,
}

impl DialogueSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session by id, creating it if unknown (a reconnect with an
    /// unrecognized id starts a new session rather than erroring).
    fn session_exists(&self, session_id: Uuid) -> bool {
        self.sessions
            .lock()
            .expect("dialogue session lock poisoned")
            .contains_key(&session_id)
    }

    /// Replay the stored history for a session, for a reconnecting client.
    pub fn history(&self, session_id: Uuid) -> Vec<DialogueMessage> {
        self.sessions
            .lock()
            .expect("dialogue session lock poisoned")
            .get(&session_id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    /// Bind a session to a project (set once a specification draft has a
    /// home project row).
    pub fn bind_project(&self, session_id: Uuid, project_id: Uuid) {
        let mut sessions = self.sessions.lock().expect("dialogue session lock poisoned");
        sessions
            .entry(session_id)
            .or_insert_with(DialogueSession::new)
            .project_id = Some(project_id);
    }

    /// Send one user turn to Dragon and append both the user message and
    /// the assistant's reply to the session history.
    pub async fn send(
        &self,
        provider: &dyn Provider,
        session_id: Uuid,
        user_message: &str,
    ) -> Result<String> {
        let transcript = {
            let mut sessions = self.sessions.lock().expect("dialogue session lock poisoned");
            let session = sessions.entry(session_id).or_insert_with(DialogueSession::new);
            session.push(DialogueMessage {
                role: DialogueRole::User,
                content: user_message.to_string(),
            });
            render_transcript(&session.history)
        };

        let response = provider
            .complete(&ProviderRequest {
                system: DRAGON_SYSTEM_PROMPT.to_string(),
                user: transcript,
                max_tokens: 2048,
            })
            .await
            .context("dragon provider call failed")?;

        let mut sessions = self.sessions.lock().expect("dialogue session lock poisoned");
        let session = sessions.entry(session_id).or_insert_with(DialogueSession::new);
        session.push(DialogueMessage {
            role: DialogueRole::Assistant,
            content: response.text.clone(),
        });

        Ok(response.text)
    }

    /// Remove every session idle longer than [`SESSION_IDLE_TIMEOUT`].
    /// Returns the number of sessions evicted. Intended to run every 60s
    /// from the Lifecycle Engine.
    pub fn collect_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("dialogue session lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle());
        before - sessions.len()
    }

    /// Number of currently tracked sessions, for diagnostics.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("dialogue session lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn render_transcript(history: &[DialogueMessage]) -> String {
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                DialogueRole::User => "User",
                DialogueRole::Assistant => "Dragon",
            };
            format!("{role}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Approve a project: `Prototype -> New`, making it visible to the
/// Lifecycle Engine. Fails if the session has no bound project or the
/// project is not in `Prototype`.
pub async fn approve_project(
    pool: &PgPool,
    sessions: &DialogueSessionStore,
    session_id: Uuid,
) -> Result<()> {
    let project_id = {
        let guard = sessions.sessions.lock().expect("dialogue session lock poisoned");
        guard
            .get(&session_id)
            .and_then(|s| s.project_id)
            .context("session has no bound project to approve")?
    };

    if !sessions.session_exists(session_id) {
        bail!("unknown dialogue session {session_id}");
    }

    project_db::approve_project(pool, project_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: &ProviderRequest,
        ) -> Result<crate::runner::ProviderResponse> {
            Ok(crate::runner::ProviderResponse {
                text: format!("echo: {}", request.user),
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    #[tokio::test]
    async fn unknown_session_starts_fresh() {
        let store = DialogueSessionStore::new();
        let session_id = Uuid::new_v4();
        let reply = store.send(&EchoProvider, session_id, "hello").await.unwrap();
        assert!(reply.contains("hello"));
        assert_eq!(store.history(session_id).len(), 2);
    }

    #[tokio::test]
    async fn history_caps_at_max_len() {
        let store = DialogueSessionStore::new();
        let session_id = Uuid::new_v4();
        for i in 0..60 {
            store
                .send(&EchoProvider, session_id, &format!("message {i}"))
                .await
                .unwrap();
        }
        assert!(store.history(session_id).len() <= MAX_HISTORY_LEN);
    }

    #[test]
    fn collect_idle_removes_nothing_when_fresh() {
        let store = DialogueSessionStore::new();
        let mut sessions = store.sessions.lock().unwrap();
        sessions.insert(Uuid::new_v4(), DialogueSession::new());
        drop(sessions);
        assert_eq!(store.collect_idle(), 0);
        assert_eq!(store.len(), 1);
    }
}
