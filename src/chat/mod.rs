//! Chat client facade
//!
//! [`ChatClient`] is the surface the front end talks to. It owns the message
//! store, the stream controller and the seed guard, and lends the store to
//! the controller for every operation, so a single `&mut` borrow serializes
//! all mutation.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use parley::chat::ChatClient;
//! use parley::config::ChatConfig;
//! use parley::providers::FakeBackend;
//!
//! # #[tokio::main]
//! # async fn main() -> parley::error::Result<()> {
//! let backend = Arc::new(FakeBackend::new());
//! let mut client = ChatClient::new(backend.clone(), "granite3-moe", &ChatConfig::default());
//! let id = client.new_conversation();
//!
//! client.send_user_message(&id, "Hello", Vec::new()).await?;
//! let task = backend.last_task().unwrap();
//! backend.emit_token(&task, "Hi there");
//! backend.complete(&task);
//! client.wait_for_idle(&id).await;
//!
//! assert_eq!(client.snapshot(&id).last().unwrap().content, "Hi there");
//! assert!(!client.is_processing(&id));
//! # Ok(())
//! # }
//! ```

pub mod stats;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ChatConfig, Config};
use crate::error::Result;
use crate::providers::{create_backend, Backend, ChatMessage, EventBus};
use crate::session::{SeedGuard, SeedOutcome, StreamController, StreamState, StreamUpdate};
use crate::storage::{
    ConversationId, ConversationInfo, ConversationSummary, FileRef, MessageStore, Turn, TurnId,
};
use stats::{StatsWindow, UsageStats};

/// Greeting appended to every conversation created by [`ChatClient::new_conversation`]
pub const NEW_CHAT_GREETING: &str = "New chat started. What would you like to do?";

/// Single-owner chat client
pub struct ChatClient {
    store: MessageStore,
    controller: StreamController,
    seeds: SeedGuard,
    model: String,
    window: StatsWindow,
    idle_timeout: Option<Duration>,
    pending: VecDeque<StreamUpdate>,
}

impl ChatClient {
    /// Create a client on top of an existing backend
    pub fn new(backend: Arc<dyn Backend>, model: impl Into<String>, chat: &ChatConfig) -> Self {
        Self {
            store: MessageStore::new(),
            controller: StreamController::new(backend),
            seeds: SeedGuard::new(),
            model: model.into(),
            window: chat.stats_window(),
            idle_timeout: chat.stream_idle_timeout(),
            pending: VecDeque::new(),
        }
    }

    /// Create a client and its backend from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configured backend cannot be created
    pub fn from_config(config: &Config) -> Result<Self> {
        let bus = EventBus::new(config.chat.event_capacity);
        let backend = create_backend(&config.backend, bus)?;
        tracing::info!(
            backend = backend.name(),
            model = %config.backend.ollama.model,
            "Chat client ready"
        );
        Ok(Self::new(
            backend,
            config.backend.ollama.model.clone(),
            &config.chat,
        ))
    }

    /// Append a user turn and stream the assistant's reply
    ///
    /// A stream still running for the conversation is cancelled first.
    /// Returns the id of the streaming placeholder turn.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ParleyError::StartFailure`] when the backend
    /// rejects the request; the user turn stays in the conversation.
    pub async fn send_user_message(
        &mut self,
        conversation_id: &ConversationId,
        text: &str,
        files: Vec<FileRef>,
    ) -> Result<TurnId> {
        let turn = Turn::user(self.store.next_turn_id(), text).with_files(files);
        self.store.append_turn(conversation_id, turn);
        let history = ChatMessage::history(self.store.snapshot(conversation_id));
        self.controller
            .start(conversation_id, &history, &self.model, &mut self.store)
            .await
    }

    /// Seed a conversation with its initial message, at most once
    ///
    /// `model` overrides the client's model for this seeding only.
    pub async fn seed_conversation(
        &mut self,
        conversation_id: &ConversationId,
        initial_message: &str,
        model: Option<&str>,
    ) -> Result<SeedOutcome> {
        let model = model.unwrap_or(&self.model).to_string();
        if self.seeds.is_seeded(conversation_id) {
            return Ok(SeedOutcome::AlreadySeeded);
        }
        let turn = Turn::user(self.store.next_turn_id(), initial_message);
        self.seeds
            .try_seed(
                conversation_id,
                turn,
                &model,
                &mut self.store,
                &mut self.controller,
            )
            .await
    }

    /// Cancel the conversation's running stream; false when none was running
    pub async fn cancel_active_stream(&mut self, conversation_id: &ConversationId) -> bool {
        self.controller
            .cancel(conversation_id, &mut self.store)
            .await
    }

    /// Current ordered turns of a conversation
    pub fn snapshot(&self, conversation_id: &ConversationId) -> &[Turn] {
        self.store.snapshot(conversation_id)
    }

    /// Usage statistics recomputed from the current snapshot
    pub fn usage_stats(&self, conversation_id: &ConversationId) -> UsageStats {
        UsageStats::from_turns(self.store.snapshot(conversation_id), self.window)
    }

    /// Whether a reply is being generated for the conversation
    pub fn is_processing(&self, conversation_id: &ConversationId) -> bool {
        self.controller.is_processing(conversation_id)
    }

    /// Stream state of the conversation
    pub fn stream_state(&self, conversation_id: &ConversationId) -> StreamState {
        self.controller.state(conversation_id)
    }

    /// Mint a new conversation holding the greeting turn
    pub fn new_conversation(&mut self) -> ConversationId {
        let conversation_id = ConversationId::generate();
        self.seeds.clear(&conversation_id);
        let greeting = Turn::assistant(self.store.next_turn_id(), NEW_CHAT_GREETING);
        self.store.append_turn(&conversation_id, greeting);
        tracing::info!(conversation = %conversation_id, "New chat started");
        conversation_id
    }

    /// Conversations in creation order with their titles
    pub fn recent_conversations(&self) -> Vec<ConversationSummary> {
        self.store.summaries()
    }

    /// Turn count and creation time of a conversation
    pub fn conversation_info(&self, conversation_id: &ConversationId) -> ConversationInfo {
        self.store.info(conversation_id)
    }

    /// Model used for new messages
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Change the model used for new messages
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        tracing::info!("Switched model to: {}", self.model);
    }

    /// Name of the backend in use
    pub fn backend_name(&self) -> &str {
        self.controller.backend().name()
    }

    /// Wait for the next change made by any live stream
    ///
    /// When an idle timeout is configured, a stream that stays quiet past it
    /// is cancelled and reported as [`StreamUpdate::TimedOut`]. Returns
    /// `None` once no stream is live.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }

            let Some(max_idle) = self.idle_timeout else {
                return self.controller.pump(&mut self.store).await;
            };
            let deadline = self.controller.idle_deadline(max_idle)?;

            tokio::select! {
                update = self.controller.pump(&mut self.store) => return update,
                _ = tokio::time::sleep_until(deadline) => {
                    let expired = self.controller.expire_idle(max_idle, &mut self.store).await;
                    self.pending.extend(expired);
                }
            }
        }
    }

    /// Apply stream updates until the conversation is idle
    ///
    /// Returns every update applied on the way, including those of other
    /// conversations.
    pub async fn wait_for_idle(&mut self, conversation_id: &ConversationId) -> Vec<StreamUpdate> {
        let mut updates = Vec::new();
        while self.controller.state(conversation_id) != StreamState::Idle {
            match self.next_update().await {
                Some(update) => updates.push(update),
                None => break,
            }
        }
        updates
    }

    /// Cancel every live stream
    pub async fn shutdown(&mut self) {
        self.controller.teardown(&mut self.store).await;
        self.pending.clear();
    }
}
