//! Backend event bus and subscription handles
//!
//! Backends publish every token and completion on two process-wide broadcast
//! channels. Listeners receive events for all tasks and filter by task id.
//!
//! ```text
//! backend task ---> tokens (broadcast) ------> Subscription<TokenEvent>
//!              \--> completions (broadcast) -> Subscription<CompletionEvent>
//! ```
//!
//! A [`Subscription`] only sees events published after it was created.
//! Calling [`Subscription::unsubscribe`] (or dropping it) detaches the
//! listener immediately; nothing published afterwards is observed.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::providers::base::{CompletionEvent, TokenEvent};

/// Default number of events buffered per channel before slow listeners lag
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Pair of broadcast channels carrying backend events
#[derive(Debug, Clone)]
pub struct EventBus {
    tokens: broadcast::Sender<TokenEvent>,
    completions: broadcast::Sender<CompletionEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per channel
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::events::EventBus;
    ///
    /// let bus = EventBus::new(16);
    /// let subscription = bus.subscribe_tokens();
    /// assert!(subscription.is_active());
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tokens, _) = broadcast::channel(capacity.max(1));
        let (completions, _) = broadcast::channel(capacity.max(1));
        Self {
            tokens,
            completions,
        }
    }

    /// Publish a token event; returns the number of listeners reached
    pub fn publish_token(&self, event: TokenEvent) -> usize {
        self.tokens.send(event).unwrap_or(0)
    }

    /// Publish a completion event; returns the number of listeners reached
    pub fn publish_completion(&self, event: CompletionEvent) -> usize {
        self.completions.send(event).unwrap_or(0)
    }

    /// Listen for token events
    pub fn subscribe_tokens(&self) -> Subscription<TokenEvent> {
        Subscription::new(self.tokens.subscribe())
    }

    /// Listen for completion events
    pub fn subscribe_completions(&self) -> Subscription<CompletionEvent> {
        Subscription::new(self.completions.subscribe())
    }

    /// Number of live token listeners
    pub fn token_listeners(&self) -> usize {
        self.tokens.receiver_count()
    }

    /// Number of live completion listeners
    pub fn completion_listeners(&self) -> usize {
        self.completions.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Handle for one listener on the event bus
///
/// Polls as a [`Stream`] of events. Once unsubscribed or once the bus is
/// gone, the stream ends. A listener that falls more than the channel
/// capacity behind also ends, with the number of dropped events kept in
/// [`Subscription::missed`]; it never resumes past a gap.
pub struct Subscription<E> {
    inner: Option<BroadcastStream<E>>,
    missed: u64,
}

impl<E: Clone + Send + 'static> Subscription<E> {
    fn new(rx: broadcast::Receiver<E>) -> Self {
        Self {
            inner: Some(BroadcastStream::new(rx)),
            missed: 0,
        }
    }

    /// Detach from the bus
    pub fn unsubscribe(&mut self) {
        self.inner = None;
    }

    /// True until `unsubscribe` is called or the stream ended
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Events dropped because this listener lagged; zero unless the stream
    /// ended on a gap
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.inner.is_some())
            .field("missed", &self.missed)
            .finish()
    }
}

impl<E: Clone + Send + 'static> Stream for Subscription<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(event)),
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                tracing::warn!(skipped, "Event listener lagged behind, ending subscription");
                self.missed = skipped;
                self.inner = None;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                self.inner = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
