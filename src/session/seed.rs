//! One-time seeding of conversations
//!
//! Entering a conversation with a pending initial message must produce
//! exactly one initial turn and one stream, however many times the entry
//! path runs. [`SeedGuard`] keeps the set of conversations already seeded.

use std::collections::HashSet;

use crate::error::{ParleyError, Result};
use crate::providers::ChatMessage;
use crate::session::controller::StreamController;
use crate::storage::{ConversationId, MessageStore, Turn, TurnId};

/// Result of a seeding attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The initial turn was appended and a stream started
    Seeded {
        /// Turn carrying the initial message
        initial_turn: TurnId,
        /// Streaming placeholder for the reply
        reply_turn: TurnId,
    },
    /// The conversation had been seeded before; nothing happened
    AlreadySeeded,
}

/// Marker set of seeded conversations
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use parley::providers::FakeBackend;
/// use parley::session::{SeedGuard, SeedOutcome, StreamController};
/// use parley::storage::{ConversationId, MessageStore, Turn};
///
/// # #[tokio::main]
/// # async fn main() -> parley::error::Result<()> {
/// let backend = Arc::new(FakeBackend::new());
/// let mut controller = StreamController::new(backend.clone());
/// let mut store = MessageStore::new();
/// let mut guard = SeedGuard::new();
/// let id = ConversationId::new("ch_1");
///
/// let turn = Turn::user(store.next_turn_id(), "Plan a trip");
/// guard.try_seed(&id, turn, "granite3-moe", &mut store, &mut controller).await?;
/// let again = Turn::user(store.next_turn_id(), "Plan a trip");
/// let outcome = guard.try_seed(&id, again, "granite3-moe", &mut store, &mut controller).await?;
///
/// assert_eq!(outcome, SeedOutcome::AlreadySeeded);
/// assert_eq!(backend.start_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SeedGuard {
    seeded: HashSet<ConversationId>,
}

impl SeedGuard {
    /// Create a guard with no seeded conversations
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `conversation_id` with `initial_turn` unless it was seeded before
    ///
    /// The marker is recorded before any other effect, so a failing start
    /// still counts as the one seeding attempt; the initial turn stays in the
    /// store and the caller may resend.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::StartFailure`] when the conversation id is empty
    /// or the backend rejects the start command.
    pub async fn try_seed(
        &mut self,
        conversation_id: &ConversationId,
        initial_turn: Turn,
        model: &str,
        store: &mut MessageStore,
        controller: &mut StreamController,
    ) -> Result<SeedOutcome> {
        if conversation_id.is_empty() {
            return Err(ParleyError::StartFailure("conversation id is empty".to_string()).into());
        }
        if !self.seeded.insert(conversation_id.clone()) {
            tracing::debug!(conversation = %conversation_id, "Conversation already seeded");
            return Ok(SeedOutcome::AlreadySeeded);
        }

        let initial = initial_turn.id;
        store.append_turn(conversation_id, initial_turn);
        let history = ChatMessage::history(store.snapshot(conversation_id));
        let reply = controller
            .start(conversation_id, &history, model, store)
            .await?;

        tracing::info!(conversation = %conversation_id, model, "Seeded conversation");
        Ok(SeedOutcome::Seeded {
            initial_turn: initial,
            reply_turn: reply,
        })
    }

    /// Whether `conversation_id` was seeded
    pub fn is_seeded(&self, conversation_id: &ConversationId) -> bool {
        self.seeded.contains(conversation_id)
    }

    /// Forget the marker of `conversation_id`
    ///
    /// Called when a fresh conversation identifier is minted.
    pub fn clear(&mut self, conversation_id: &ConversationId) {
        self.seeded.remove(conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FakeBackend;
    use std::sync::Arc;

    fn setup() -> (Arc<FakeBackend>, StreamController, MessageStore, SeedGuard) {
        let backend = Arc::new(FakeBackend::new());
        let controller = StreamController::new(backend.clone());
        (backend, controller, MessageStore::new(), SeedGuard::new())
    }

    #[tokio::test]
    async fn test_seed_twice_yields_one_turn_and_one_start() {
        let (backend, mut controller, mut store, mut guard) = setup();
        let id = ConversationId::new("ch_1");

        for _ in 0..2 {
            let turn = Turn::user(store.next_turn_id(), "Hello there");
            guard
                .try_seed(&id, turn, "granite3-moe", &mut store, &mut controller)
                .await
                .unwrap();
        }

        assert_eq!(backend.start_count(), 1);
        let user_turns = store
            .snapshot(&id)
            .iter()
            .filter(|t| t.content == "Hello there")
            .count();
        assert_eq!(user_turns, 1);
        assert_eq!(store.snapshot(&id).len(), 2);
    }

    #[tokio::test]
    async fn test_seed_sends_initial_turn_as_history() {
        let (backend, mut controller, mut store, mut guard) = setup();
        let id = ConversationId::new("ch_1");
        let turn = Turn::user(store.next_turn_id(), "Start here");
        let outcome = guard
            .try_seed(&id, turn, "custom-model", &mut store, &mut controller)
            .await
            .unwrap();

        assert!(matches!(outcome, SeedOutcome::Seeded { .. }));
        let starts = backend.starts();
        let start = &starts[0];
        assert_eq!(start.model, "custom-model");
        assert_eq!(start.messages, vec![ChatMessage::user("Start here")]);
        assert!(controller.is_processing(&id));
    }

    #[tokio::test]
    async fn test_failed_start_still_marks_seeded() {
        let (backend, mut controller, mut store, mut guard) = setup();
        let id = ConversationId::new("ch_1");
        backend.fail_next_start();

        let turn = Turn::user(store.next_turn_id(), "hi");
        assert!(guard
            .try_seed(&id, turn, "m", &mut store, &mut controller)
            .await
            .is_err());
        assert!(guard.is_seeded(&id));
        assert_eq!(store.snapshot(&id).len(), 1);
        assert!(!controller.is_processing(&id));
    }

    #[tokio::test]
    async fn test_clear_allows_seeding_again() {
        let (backend, mut controller, mut store, mut guard) = setup();
        let id = ConversationId::new("ch_1");
        let turn = Turn::user(store.next_turn_id(), "one");
        guard
            .try_seed(&id, turn, "m", &mut store, &mut controller)
            .await
            .unwrap();

        guard.clear(&id);
        assert!(!guard.is_seeded(&id));
        let turn = Turn::user(store.next_turn_id(), "two");
        guard
            .try_seed(&id, turn, "m", &mut store, &mut controller)
            .await
            .unwrap();
        assert_eq!(backend.start_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_id_is_rejected_without_marker() {
        let (backend, mut controller, mut store, mut guard) = setup();
        let id = ConversationId::new(" ");
        let turn = Turn::user(store.next_turn_id(), "hi");
        assert!(guard
            .try_seed(&id, turn, "m", &mut store, &mut controller)
            .await
            .is_err());
        assert!(!guard.is_seeded(&id));
        assert_eq!(backend.start_count(), 0);
    }
}
