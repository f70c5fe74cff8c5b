//! Backend trait and common types for Parley
//!
//! This module defines the command/event boundary between the chat client and
//! a model-serving backend: two commands (start and stop a generation) and two
//! event classes (token arrived, stream completed) correlated by task id.

use crate::error::Result;
use crate::providers::events::Subscription;
use crate::storage::{Role, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle correlating backend commands and events to one generation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap a backend-issued identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message sent to the backend: role and content only
///
/// Attachments, flags and timing of a [`Turn`] never cross the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role ("user" or "assistant")
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::ChatMessage;
    /// use parley::storage::Role;
    ///
    /// let msg = ChatMessage::user("Hello, assistant!");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Strip a sequence of turns down to the history sent to the backend
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::ChatMessage;
    /// use parley::storage::{FileRef, Turn, TurnId};
    ///
    /// let turns = vec![
    ///     Turn::user(TurnId(1), "Summarize this").with_files(vec![FileRef::from_path("a.txt")]),
    ///     Turn::assistant(TurnId(2), "Sure"),
    /// ];
    /// let history = ChatMessage::history(&turns);
    /// assert_eq!(history.len(), 2);
    /// assert_eq!(history[0].content, "Summarize this");
    /// ```
    pub fn history(turns: &[Turn]) -> Vec<Self> {
        turns
            .iter()
            .map(|t| Self {
                role: t.role,
                content: t.content.clone(),
            })
            .collect()
    }
}

/// A chunk of generated text for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// Task the token belongs to
    pub task_id: TaskId,
    /// Generated text
    pub token: String,
}

impl TokenEvent {
    /// Create a token event
    pub fn new(task_id: TaskId, token: impl Into<String>) -> Self {
        Self {
            task_id,
            token: token.into(),
        }
    }
}

/// End of generation for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Task that finished
    pub task_id: TaskId,
    /// Set when the backend stream broke off instead of finishing normally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionEvent {
    /// Normal completion
    pub fn done(task_id: TaskId) -> Self {
        Self {
            task_id,
            error: None,
        }
    }

    /// Completion after a backend failure mid-stream
    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            error: Some(error.into()),
        }
    }
}

/// Command/event boundary to a model-serving backend
///
/// Commands are async and may fail. Events are delivered on broadcast
/// subscriptions shared by every task; listeners filter by [`TaskId`].
///
/// # Examples
///
/// ```
/// use parley::providers::{Backend, ChatMessage, FakeBackend};
///
/// # #[tokio::main]
/// # async fn main() -> parley::error::Result<()> {
/// let backend = FakeBackend::new();
/// let task = backend
///     .start_generation("granite3-moe", &[ChatMessage::user("hi")])
///     .await?;
/// backend.stop_generation(&task).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Begin generating a reply to `messages` with `model`
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ParleyError::StartFailure`] when the backend
    /// rejects the request or cannot be reached
    async fn start_generation(&self, model: &str, messages: &[ChatMessage]) -> Result<TaskId>;

    /// Ask the backend to stop a running generation
    ///
    /// Best-effort: the task may already have finished.
    async fn stop_generation(&self, task_id: &TaskId) -> Result<()>;

    /// Listen for token-arrived events of every task
    fn subscribe_tokens(&self) -> Subscription<TokenEvent>;

    /// Listen for stream-completed events of every task
    fn subscribe_completions(&self) -> Subscription<CompletionEvent>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}
