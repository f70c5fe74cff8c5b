//! In-memory message store
//!
//! Holds the ordered turns of every conversation for the lifetime of the
//! process. Turns are appended at the end and mutated in place; nothing is
//! ever reordered or removed.

use std::collections::HashMap;

pub mod types;
pub use types::{
    ConversationId, ConversationInfo, ConversationSummary, FileRef, Role, Turn, TurnId, TurnPatch,
};

/// Characters of the first turn used as a conversation title
const TITLE_CHARS: usize = 24;

/// Ledger of conversation turns keyed by conversation identifier
///
/// The store is owned by a single logical thread of control and lent to the
/// stream controller by `&mut` for each mutation, so it carries no locks.
#[derive(Debug, Default)]
pub struct MessageStore {
    conversations: HashMap<ConversationId, Vec<Turn>>,
    order: Vec<ConversationId>,
    next_turn_id: u64,
}

impl MessageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh turn identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::MessageStore;
    ///
    /// let mut store = MessageStore::new();
    /// let a = store.next_turn_id();
    /// let b = store.next_turn_id();
    /// assert!(b > a);
    /// ```
    pub fn next_turn_id(&mut self) -> TurnId {
        self.next_turn_id += 1;
        TurnId(self.next_turn_id)
    }

    /// Make sure a conversation exists, creating it empty on first reference
    pub fn ensure_conversation(&mut self, conversation_id: &ConversationId) {
        if conversation_id.is_empty() || self.conversations.contains_key(conversation_id) {
            return;
        }
        self.conversations
            .insert(conversation_id.clone(), Vec::new());
        self.order.push(conversation_id.clone());
    }

    /// Append a turn at the end of a conversation
    ///
    /// Returns false, without storing anything, when the identifier is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::{ConversationId, MessageStore, Turn};
    ///
    /// let mut store = MessageStore::new();
    /// let id = ConversationId::new("ch_1");
    /// let turn = Turn::user(store.next_turn_id(), "Hi");
    /// assert!(store.append_turn(&id, turn));
    /// assert_eq!(store.snapshot(&id).len(), 1);
    /// ```
    pub fn append_turn(&mut self, conversation_id: &ConversationId, turn: Turn) -> bool {
        if conversation_id.is_empty() {
            tracing::warn!("Dropping turn {} appended to an empty conversation id", turn.id);
            return false;
        }
        self.ensure_conversation(conversation_id);
        if let Some(turns) = self.conversations.get_mut(conversation_id) {
            turns.push(turn);
        }
        true
    }

    /// Apply a partial update to exactly one turn
    ///
    /// Returns false when no turn matches; late events after a stream was
    /// superseded land here and are expected. Content appends are refused for
    /// turns that are no longer streaming, and a finalized turn is never
    /// reopened.
    pub fn mutate_turn(
        &mut self,
        conversation_id: &ConversationId,
        turn_id: TurnId,
        patch: TurnPatch,
    ) -> bool {
        let Some(turn) = self
            .conversations
            .get_mut(conversation_id)
            .and_then(|turns| turns.iter_mut().find(|t| t.id == turn_id))
        else {
            tracing::trace!(
                conversation = %conversation_id,
                turn = %turn_id,
                "mutate_turn: no matching turn"
            );
            return false;
        };

        if let Some(text) = patch.append_content {
            if turn.streaming {
                turn.content.push_str(&text);
            } else {
                tracing::debug!(turn = %turn_id, "Ignoring content append to finalized turn");
            }
        }
        match patch.streaming {
            Some(true) if !turn.streaming => {
                tracing::debug!(turn = %turn_id, "Refusing to reopen finalized turn");
            }
            Some(streaming) => turn.streaming = streaming,
            None => {}
        }
        if let Some(response_time) = patch.response_time {
            if turn.response_time.is_none() {
                turn.response_time = Some(response_time);
            }
        }
        if let Some(interrupted) = patch.interrupted {
            turn.interrupted = interrupted;
        }
        true
    }

    /// Current ordered turns of a conversation (empty when unknown)
    pub fn snapshot(&self, conversation_id: &ConversationId) -> &[Turn] {
        self.conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Look up a single turn
    pub fn turn(&self, conversation_id: &ConversationId, turn_id: TurnId) -> Option<&Turn> {
        self.snapshot(conversation_id)
            .iter()
            .find(|t| t.id == turn_id)
    }

    /// Number of turns currently streaming in a conversation
    pub fn streaming_count(&self, conversation_id: &ConversationId) -> usize {
        self.snapshot(conversation_id)
            .iter()
            .filter(|t| t.streaming)
            .count()
    }

    /// Known conversations in creation order
    pub fn conversation_ids(&self) -> &[ConversationId] {
        &self.order
    }

    /// Recent-conversations listing in creation order
    ///
    /// Titles come from the first user turn, or the first turn when no user
    /// has spoken yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::{ConversationId, MessageStore, Turn};
    ///
    /// let mut store = MessageStore::new();
    /// let id = ConversationId::new("ch_1");
    /// let turn = Turn::user(store.next_turn_id(), "Explain borrow checking in Rust please");
    /// store.append_turn(&id, turn);
    /// let summaries = store.summaries();
    /// assert_eq!(summaries[0].title, "Explain borrow checking");
    /// ```
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.order
            .iter()
            .enumerate()
            .map(|(idx, id)| {
                let turns = self.snapshot(id);
                let title = turns
                    .iter()
                    .find(|t| t.role == Role::User)
                    .or_else(|| turns.first())
                    .map(|t| t.content.chars().take(TITLE_CHARS).collect::<String>())
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| format!("Chat {}", idx + 1));
                ConversationSummary {
                    id: id.clone(),
                    title,
                    turn_count: turns.len(),
                }
            })
            .collect()
    }

    /// Turn count and creation time of a conversation
    pub fn info(&self, conversation_id: &ConversationId) -> ConversationInfo {
        let turns = self.snapshot(conversation_id);
        ConversationInfo {
            turn_count: turns.len(),
            created_at: turns.first().map(|t| t.created_at),
        }
    }
}
