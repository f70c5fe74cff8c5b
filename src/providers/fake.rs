//! In-process fake backend for unit and integration tests
//!
//! [`FakeBackend`] implements [`Backend`] without any network I/O. Tests drive
//! the event side by hand and inspect the commands the code under test sent.
//! [`FakeBackend::echo`] instead answers every start by itself, streaming
//! back the last user message; the `fake` backend type uses it.
//!
//! ```text
//! controller start_generation() --> recorded in starts(), returns task-N
//! test emit_token(task, "..") ----> EventBus tokens ------> subscriptions
//! test complete(task) ------------> EventBus completions -> subscriptions
//! controller stop_generation() ---> recorded in stopped()
//! ```
//!
//! # Example
//!
//! ```
//! use futures::StreamExt;
//! use parley::providers::{Backend, ChatMessage, FakeBackend};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let backend = FakeBackend::new();
//! let mut tokens = backend.subscribe_tokens();
//! let task = backend
//!     .start_generation("granite3-moe", &[ChatMessage::user("hi")])
//!     .await
//!     .unwrap();
//!
//! backend.emit_token(&task, "Hello");
//! assert_eq!(tokens.next().await.unwrap().token, "Hello");
//! assert_eq!(backend.starts()[0].model, "granite3-moe");
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ParleyError, Result};
use crate::providers::events::{EventBus, Subscription};
use crate::providers::{Backend, ChatMessage, CompletionEvent, TaskId, TokenEvent};
use crate::storage::Role;

/// One recorded start-generation command
#[derive(Debug, Clone, PartialEq)]
pub struct StartRecord {
    /// Task id handed back to the caller
    pub task_id: TaskId,
    /// Model requested
    pub model: String,
    /// History sent with the request
    pub messages: Vec<ChatMessage>,
}

/// Scriptable backend that records commands and emits events on demand
#[derive(Debug, Default)]
pub struct FakeBackend {
    bus: EventBus,
    next_task: AtomicU64,
    starts: Mutex<Vec<StartRecord>>,
    stops: Mutex<Vec<TaskId>>,
    fail_next_start: AtomicBool,
    fail_stops: AtomicBool,
    echo: bool,
}

impl FakeBackend {
    /// Create a fake backend with its own event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fake backend that streams `You said: <last user message>`
    /// word by word after every start, then completes
    pub fn echo(bus: EventBus) -> Self {
        Self {
            bus,
            echo: true,
            ..Self::default()
        }
    }

    /// Make the next `start_generation` call fail with a start failure
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Make every `stop_generation` call fail
    pub fn fail_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::SeqCst);
    }

    /// Publish a token event for `task_id`
    pub fn emit_token(&self, task_id: &TaskId, token: &str) {
        self.bus
            .publish_token(TokenEvent::new(task_id.clone(), token));
    }

    /// Publish a normal completion for `task_id`
    pub fn complete(&self, task_id: &TaskId) {
        self.bus
            .publish_completion(CompletionEvent::done(task_id.clone()));
    }

    /// Publish a completion that reports a backend failure
    pub fn complete_with_error(&self, task_id: &TaskId, error: &str) {
        self.bus
            .publish_completion(CompletionEvent::failed(task_id.clone(), error));
    }

    /// Every successful start command, oldest first
    pub fn starts(&self) -> Vec<StartRecord> {
        self.starts.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of successful start commands
    pub fn start_count(&self) -> usize {
        self.starts.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Task id of the most recent successful start
    pub fn last_task(&self) -> Option<TaskId> {
        self.starts
            .lock()
            .ok()
            .and_then(|s| s.last().map(|r| r.task_id.clone()))
    }

    /// Every stop command received, oldest first
    pub fn stopped(&self) -> Vec<TaskId> {
        self.stops.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Live token listeners on the bus
    pub fn token_listeners(&self) -> usize {
        self.bus.token_listeners()
    }

    /// Live completion listeners on the bus
    pub fn completion_listeners(&self) -> usize {
        self.bus.completion_listeners()
    }
}

impl FakeBackend {
    fn spawn_echo(&self, task_id: &TaskId, messages: &[ChatMessage]) {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| format!("You said: {}", m.content))
            .unwrap_or_default();
        let bus = self.bus.clone();
        let task_id = task_id.clone();

        tokio::spawn(async move {
            for word in reply.split_inclusive(' ') {
                bus.publish_token(TokenEvent::new(task_id.clone(), word));
                tokio::task::yield_now().await;
            }
            bus.publish_completion(CompletionEvent::done(task_id));
        });
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn start_generation(&self, model: &str, messages: &[ChatMessage]) -> Result<TaskId> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(ParleyError::StartFailure("fake backend refused start".to_string()).into());
        }

        let n = self.next_task.fetch_add(1, Ordering::SeqCst) + 1;
        let task_id = TaskId::new(format!("task-{}", n));
        if let Ok(mut starts) = self.starts.lock() {
            starts.push(StartRecord {
                task_id: task_id.clone(),
                model: model.to_string(),
                messages: messages.to_vec(),
            });
        }
        if self.echo {
            self.spawn_echo(&task_id, messages);
        }
        Ok(task_id)
    }

    async fn stop_generation(&self, task_id: &TaskId) -> Result<()> {
        if let Ok(mut stops) = self.stops.lock() {
            stops.push(task_id.clone());
        }
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(ParleyError::StopFailure(format!("fake stop failed for {}", task_id)).into());
        }
        Ok(())
    }

    fn subscribe_tokens(&self) -> Subscription<TokenEvent> {
        self.bus.subscribe_tokens()
    }

    fn subscribe_completions(&self) -> Subscription<CompletionEvent> {
        self.bus.subscribe_completions()
    }

    fn name(&self) -> &str {
        "fake"
    }
}
