//! Stream session controller
//!
//! Owns the lifecycle of at most one outstanding generation per conversation.
//! The controller issues start/stop commands to the [`Backend`], listens to
//! its token and completion events, and reconciles them into the
//! [`MessageStore`] that callers lend it for each operation.
//!
//! # Lifecycle
//!
//! ```text
//!            start ok                first token
//!   Idle ──────────────> Starting ──────────────> Streaming
//!    ^                      │                         │
//!    └──── completion / cancel / timeout / teardown ──┘
//! ```
//!
//! Finalizing and cancelling run inside a single `&mut self` call, so callers
//! never observe a half-finished transition.
//!
//! # Event Delivery
//!
//! Subscriptions are taken before the start command is issued so that early
//! tokens cannot be missed. Every subscription sees every task's events;
//! events whose task id does not match the live session are discarded.
//! A session whose listener lags behind the bus fails as interrupted rather
//! than finishing with a gap in its content.

use std::collections::{HashMap, HashSet};
use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use crate::error::{ParleyError, Result};
use crate::providers::{Backend, ChatMessage, CompletionEvent, Subscription, TaskId, TokenEvent};
use crate::session::metrics::{self, SessionOutcome};
use crate::storage::{ConversationId, MessageStore, Turn, TurnId, TurnPatch};

/// Observable state of one conversation's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No outstanding generation
    Idle,
    /// Start command accepted, no token yet
    Starting,
    /// At least one token applied
    Streaming,
}

/// Raw event routed to the conversation whose session it belongs to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Token for the live task of a conversation
    Token(ConversationId, TokenEvent),
    /// Completion for the live task of a conversation
    Completed(ConversationId, CompletionEvent),
    /// The event bus closed under a live session
    Closed(ConversationId),
    /// The session's listener fell behind and dropped this many events
    Lagged(ConversationId, u64),
}

/// Change applied to the message store by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    /// A token was appended to a streaming turn
    Token {
        /// Conversation receiving the token
        conversation_id: ConversationId,
        /// Placeholder turn the token was appended to
        turn_id: TurnId,
        /// Appended text
        token: String,
    },
    /// A streaming turn was finalized by its completion event
    Completed {
        /// Conversation whose stream finished
        conversation_id: ConversationId,
        /// Finalized turn
        turn_id: TurnId,
        /// Seconds from start to finalization
        response_time: f64,
        /// Backend failure reported with the completion, if any
        error: Option<String>,
    },
    /// A stream was cancelled after going quiet for too long
    TimedOut {
        /// Conversation whose stream expired
        conversation_id: ConversationId,
        /// Turn finalized as interrupted
        turn_id: TurnId,
    },
}

/// Live generation bound to one conversation
#[derive(Debug)]
struct Session {
    task_id: TaskId,
    turn_id: TurnId,
    tokens: Subscription<TokenEvent>,
    completions: Subscription<CompletionEvent>,
    started_at: Instant,
    last_activity: Instant,
    streaming: bool,
}

impl Session {
    fn unsubscribe(&mut self) {
        self.tokens.unsubscribe();
        self.completions.unsubscribe();
    }

    fn state(&self) -> StreamState {
        if self.streaming {
            StreamState::Streaming
        } else {
            StreamState::Starting
        }
    }
}

/// Event for a session whose subscription ended
fn ended(conversation_id: &ConversationId, missed: u64) -> SessionEvent {
    if missed > 0 {
        SessionEvent::Lagged(conversation_id.clone(), missed)
    } else {
        SessionEvent::Closed(conversation_id.clone())
    }
}

/// Seconds elapsed since `started_at`, rounded to two decimals
fn elapsed_seconds(started_at: Instant) -> f64 {
    (started_at.elapsed().as_secs_f64() * 100.0).round() / 100.0
}

/// Controller of per-conversation stream sessions
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use parley::providers::{ChatMessage, FakeBackend};
/// use parley::session::{StreamController, StreamState};
/// use parley::storage::{ConversationId, MessageStore, Turn};
///
/// # #[tokio::main]
/// # async fn main() -> parley::error::Result<()> {
/// let backend = Arc::new(FakeBackend::new());
/// let mut controller = StreamController::new(backend.clone());
/// let mut store = MessageStore::new();
/// let id = ConversationId::new("ch_1");
///
/// let question = Turn::user(store.next_turn_id(), "Hi");
/// store.append_turn(&id, question);
/// let history = ChatMessage::history(store.snapshot(&id));
/// controller.start(&id, &history, "granite3-moe", &mut store).await?;
/// assert_eq!(controller.state(&id), StreamState::Starting);
///
/// let task = backend.last_task().unwrap();
/// backend.emit_token(&task, "Hello");
/// backend.complete(&task);
/// controller.pump(&mut store).await;
/// controller.pump(&mut store).await;
/// assert_eq!(controller.state(&id), StreamState::Idle);
/// assert_eq!(store.snapshot(&id)[1].content, "Hello");
/// # Ok(())
/// # }
/// ```
pub struct StreamController {
    backend: Arc<dyn Backend>,
    sessions: HashMap<ConversationId, Session>,
    processing: HashSet<ConversationId>,
}

impl StreamController {
    /// Create a controller issuing commands to `backend`
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            sessions: HashMap::new(),
            processing: HashSet::new(),
        }
    }

    /// Backend this controller talks to
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Start a generation for `conversation_id`
    ///
    /// Any live session of the conversation is cancelled first. On success a
    /// streaming placeholder turn is appended and its id returned.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::StartFailure`] when the backend rejects the
    /// command or the conversation id is empty. The conversation is left idle
    /// with no placeholder.
    pub async fn start(
        &mut self,
        conversation_id: &ConversationId,
        history: &[ChatMessage],
        model: &str,
        store: &mut MessageStore,
    ) -> Result<TurnId> {
        if conversation_id.is_empty() {
            return Err(ParleyError::StartFailure("conversation id is empty".to_string()).into());
        }

        if self.sessions.contains_key(conversation_id) {
            tracing::debug!(conversation = %conversation_id, "Superseding live stream");
            self.cancel(conversation_id, store).await;
        }

        let mut tokens = self.backend.subscribe_tokens();
        let mut completions = self.backend.subscribe_completions();

        tracing::debug!(
            conversation = %conversation_id,
            backend = self.backend.name(),
            "Issuing start command: model={}, {} messages",
            model,
            history.len()
        );

        let task_id = match self.backend.start_generation(model, history).await {
            Ok(task_id) => task_id,
            Err(e) => {
                tokens.unsubscribe();
                completions.unsubscribe();
                self.processing.remove(conversation_id);
                metrics::record_start_failure(self.backend.name());
                tracing::warn!(conversation = %conversation_id, "Start command failed: {}", e);
                let already_classified = matches!(
                    e.downcast_ref::<ParleyError>(),
                    Some(ParleyError::StartFailure(_))
                );
                if already_classified {
                    return Err(e);
                }
                return Err(ParleyError::StartFailure(e.to_string()).into());
            }
        };

        let started_at = Instant::now();
        let turn_id = store.next_turn_id();
        store.append_turn(
            conversation_id,
            Turn::placeholder(turn_id, started_at.into_std()),
        );
        self.processing.insert(conversation_id.clone());
        self.sessions.insert(
            conversation_id.clone(),
            Session {
                task_id: task_id.clone(),
                turn_id,
                tokens,
                completions,
                started_at,
                last_activity: started_at,
                streaming: false,
            },
        );
        metrics::record_started(self.backend.name());

        tracing::info!(
            conversation = %conversation_id,
            task = %task_id,
            turn = %turn_id,
            "Stream session started"
        );
        Ok(turn_id)
    }

    /// Merge a token event into the conversation's streaming turn
    ///
    /// Returns false, leaving the store untouched, when the event does not
    /// belong to the conversation's live session.
    pub fn on_token(
        &mut self,
        conversation_id: &ConversationId,
        event: &TokenEvent,
        store: &mut MessageStore,
    ) -> bool {
        let Some(session) = self.sessions.get_mut(conversation_id) else {
            tracing::trace!(conversation = %conversation_id, task = %event.task_id, "Token without session");
            metrics::record_stale("token");
            return false;
        };
        if session.task_id != event.task_id {
            tracing::trace!(
                conversation = %conversation_id,
                task = %event.task_id,
                live = %session.task_id,
                "Discarding stale token"
            );
            metrics::record_stale("token");
            return false;
        }

        store.mutate_turn(
            conversation_id,
            session.turn_id,
            TurnPatch::token(event.token.as_str()),
        );
        session.streaming = true;
        session.last_activity = Instant::now();
        metrics::record_token();
        true
    }

    /// Finalize the conversation's streaming turn on completion
    ///
    /// Returns the recorded response time, or `None` when the event does not
    /// belong to the conversation's live session.
    pub fn on_completed(
        &mut self,
        conversation_id: &ConversationId,
        event: &CompletionEvent,
        store: &mut MessageStore,
    ) -> Option<f64> {
        let matches = self
            .sessions
            .get(conversation_id)
            .is_some_and(|s| s.task_id == event.task_id);
        if !matches {
            tracing::trace!(conversation = %conversation_id, task = %event.task_id, "Discarding stale completion");
            metrics::record_stale("completion");
            return None;
        }

        let mut session = self.sessions.remove(conversation_id)?;
        let response_time = elapsed_seconds(session.started_at);
        store.mutate_turn(
            conversation_id,
            session.turn_id,
            TurnPatch::finalize(response_time),
        );
        session.unsubscribe();
        self.processing.remove(conversation_id);

        let outcome = match &event.error {
            Some(error) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    task = %session.task_id,
                    "Stream completed with backend error: {}",
                    error
                );
                SessionOutcome::Failed
            }
            None => SessionOutcome::Completed,
        };
        metrics::record_finished(outcome, Some(response_time));

        tracing::info!(
            conversation = %conversation_id,
            task = %session.task_id,
            turn = %session.turn_id,
            response_time,
            "Stream session completed"
        );
        Some(response_time)
    }

    /// Cancel the conversation's live session, if any
    ///
    /// Unsubscribes and finalizes the placeholder as interrupted before the
    /// best-effort stop command is sent; a failing stop is logged and
    /// swallowed. Returns false when there was nothing to cancel, in which
    /// case no command is issued.
    pub async fn cancel(&mut self, conversation_id: &ConversationId, store: &mut MessageStore) -> bool {
        self.end_session(conversation_id, store, SessionOutcome::Cancelled)
            .await
            .is_some()
    }

    /// Cancel every live session
    pub async fn teardown(&mut self, store: &mut MessageStore) {
        let live: Vec<ConversationId> = self.sessions.keys().cloned().collect();
        if !live.is_empty() {
            tracing::info!("Tearing down {} stream session(s)", live.len());
        }
        for conversation_id in live {
            self.cancel(&conversation_id, store).await;
        }
    }

    /// Cancel sessions that received no event for at least `max_idle`
    ///
    /// Returns one [`StreamUpdate::TimedOut`] per expired session.
    pub async fn expire_idle(
        &mut self,
        max_idle: Duration,
        store: &mut MessageStore,
    ) -> Vec<StreamUpdate> {
        let expired: Vec<ConversationId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.last_activity.elapsed() >= max_idle)
            .map(|(id, _)| id.clone())
            .collect();

        let mut updates = Vec::with_capacity(expired.len());
        for conversation_id in expired {
            tracing::warn!(
                conversation = %conversation_id,
                idle_seconds = max_idle.as_secs(),
                "Stream idle timeout expired"
            );
            if let Some(turn_id) = self
                .end_session(&conversation_id, store, SessionOutcome::TimedOut)
                .await
            {
                updates.push(StreamUpdate::TimedOut {
                    conversation_id,
                    turn_id,
                });
            }
        }
        updates
    }

    /// Earliest instant at which a session would exceed `max_idle`
    pub fn idle_deadline(&self, max_idle: Duration) -> Option<Instant> {
        self.sessions
            .values()
            .map(|s| s.last_activity + max_idle)
            .min()
    }

    /// Wait for the next event belonging to any live session
    ///
    /// Token events are preferred over completions of the same session, so a
    /// completion is only seen after every token already delivered. Events of
    /// other tasks are skipped. Returns `None` when no session is live.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.sessions.is_empty() {
            return None;
        }

        poll_fn(|cx| {
            for (conversation_id, session) in self.sessions.iter_mut() {
                loop {
                    match session.tokens.poll_next_unpin(cx) {
                        Poll::Ready(Some(event)) if event.task_id == session.task_id => {
                            return Poll::Ready(Some(SessionEvent::Token(
                                conversation_id.clone(),
                                event,
                            )));
                        }
                        Poll::Ready(Some(_)) => continue,
                        Poll::Ready(None) => {
                            return Poll::Ready(Some(ended(conversation_id, session.tokens.missed())))
                        }
                        Poll::Pending => break,
                    }
                }
                loop {
                    match session.completions.poll_next_unpin(cx) {
                        Poll::Ready(Some(event)) if event.task_id == session.task_id => {
                            return Poll::Ready(Some(SessionEvent::Completed(
                                conversation_id.clone(),
                                event,
                            )));
                        }
                        Poll::Ready(Some(_)) => continue,
                        Poll::Ready(None) => {
                            return Poll::Ready(Some(ended(
                                conversation_id,
                                session.completions.missed(),
                            )))
                        }
                        Poll::Pending => break,
                    }
                }
            }
            Poll::Pending
        })
        .await
    }

    /// Apply one routed event to the store
    pub async fn apply(&mut self, event: SessionEvent, store: &mut MessageStore) -> Option<StreamUpdate> {
        match event {
            SessionEvent::Token(conversation_id, event) => {
                let turn_id = self.active_turn(&conversation_id)?;
                if !self.on_token(&conversation_id, &event, store) {
                    return None;
                }
                Some(StreamUpdate::Token {
                    conversation_id,
                    turn_id,
                    token: event.token,
                })
            }
            SessionEvent::Completed(conversation_id, event) => {
                let turn_id = self.active_turn(&conversation_id)?;
                let response_time = self.on_completed(&conversation_id, &event, store)?;
                Some(StreamUpdate::Completed {
                    conversation_id,
                    turn_id,
                    response_time,
                    error: event.error,
                })
            }
            SessionEvent::Closed(conversation_id) => {
                tracing::warn!(conversation = %conversation_id, "Backend event stream closed under live session");
                self.fail(conversation_id, "backend event stream closed".to_string(), store)
                    .await
            }
            SessionEvent::Lagged(conversation_id, missed) => {
                tracing::warn!(conversation = %conversation_id, missed, "Stream listener fell behind the backend");
                let error = format!("stream fell behind and missed {} events", missed);
                self.fail(conversation_id, error, store).await
            }
        }
    }

    /// End a live session as failed, reporting `error` in the completion
    async fn fail(
        &mut self,
        conversation_id: ConversationId,
        error: String,
        store: &mut MessageStore,
    ) -> Option<StreamUpdate> {
        let turn_id = self
            .end_session(&conversation_id, store, SessionOutcome::Failed)
            .await?;
        let response_time = store
            .turn(&conversation_id, turn_id)
            .and_then(|t| t.response_time)
            .unwrap_or_default();
        Some(StreamUpdate::Completed {
            conversation_id,
            turn_id,
            response_time,
            error: Some(error),
        })
    }

    /// Wait for and apply events until one changes the store
    ///
    /// Returns `None` once no session is live.
    pub async fn pump(&mut self, store: &mut MessageStore) -> Option<StreamUpdate> {
        loop {
            let event = self.next_event().await?;
            if let Some(update) = self.apply(event, store).await {
                return Some(update);
            }
        }
    }

    /// Current state of a conversation's stream
    pub fn state(&self, conversation_id: &ConversationId) -> StreamState {
        self.sessions
            .get(conversation_id)
            .map(Session::state)
            .unwrap_or(StreamState::Idle)
    }

    /// Task id of the conversation's live session
    pub fn active_task(&self, conversation_id: &ConversationId) -> Option<&TaskId> {
        self.sessions.get(conversation_id).map(|s| &s.task_id)
    }

    /// Placeholder turn of the conversation's live session
    pub fn active_turn(&self, conversation_id: &ConversationId) -> Option<TurnId> {
        self.sessions.get(conversation_id).map(|s| s.turn_id)
    }

    /// True from a successful start until the stream is finalized or cancelled
    pub fn is_processing(&self, conversation_id: &ConversationId) -> bool {
        self.processing.contains(conversation_id)
    }

    /// Number of live sessions across all conversations
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    async fn end_session(
        &mut self,
        conversation_id: &ConversationId,
        store: &mut MessageStore,
        outcome: SessionOutcome,
    ) -> Option<TurnId> {
        let mut session = self.sessions.remove(conversation_id)?;
        session.unsubscribe();
        store.mutate_turn(
            conversation_id,
            session.turn_id,
            TurnPatch::interrupt(elapsed_seconds(session.started_at)),
        );
        self.processing.remove(conversation_id);
        metrics::record_finished(outcome, None);

        tracing::info!(
            conversation = %conversation_id,
            task = %session.task_id,
            outcome = outcome.as_str(),
            "Stream session ended"
        );

        if let Err(e) = self.backend.stop_generation(&session.task_id).await {
            metrics::record_stop_failure();
            tracing::debug!(task = %session.task_id, "Ignoring stop failure: {}", e);
        }
        Some(session.turn_id)
    }
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("backend", &self.backend.name())
            .field("sessions", &self.sessions.len())
            .field("processing", &self.processing)
            .finish()
    }
}
