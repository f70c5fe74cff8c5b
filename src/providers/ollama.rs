//! Ollama backend for Parley
//!
//! Implements the [`Backend`] command/event boundary on top of Ollama's
//! streaming `/api/chat` endpoint. Each started generation gets a task id and
//! a relay task that reads the newline-delimited JSON body and republishes
//! every chunk on the shared [`EventBus`].

use crate::config::OllamaConfig;
use crate::error::{ParleyError, Result};
use crate::providers::events::{EventBus, Subscription};
use crate::providers::{Backend, ChatMessage, CompletionEvent, TaskId, TokenEvent};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Ollama API backend
///
/// # Examples
///
/// ```no_run
/// use parley::config::OllamaConfig;
/// use parley::providers::events::EventBus;
/// use parley::providers::{Backend, ChatMessage, OllamaBackend};
///
/// # async fn example() -> parley::error::Result<()> {
/// let backend = OllamaBackend::new(OllamaConfig::default(), EventBus::default())?;
/// let mut tokens = backend.subscribe_tokens();
/// let task = backend
///     .start_generation("granite3-moe", &[ChatMessage::user("Hello!")])
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
    bus: EventBus,
    tasks: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

/// Request body for `/api/chat`
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// One line of the streamed response body
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// What a single response line means for the stream
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Done,
    Failed(String),
    Skip,
}

impl OllamaBackend {
    /// Create a new Ollama backend publishing on `bus`
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::config::OllamaConfig;
    /// use parley::providers::events::EventBus;
    /// use parley::providers::OllamaBackend;
    ///
    /// let backend = OllamaBackend::new(OllamaConfig::default(), EventBus::default());
    /// assert!(backend.is_ok());
    /// ```
    pub fn new(config: OllamaConfig, bus: EventBus) -> Result<Self> {
        // No overall timeout: a generation may stream for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ParleyError::Backend(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized Ollama backend: host={}", config.host);

        Ok(Self {
            client,
            config,
            bus,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Get the configured Ollama host
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Number of generations whose relay task is still running
    pub fn running_tasks(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    fn register(&self, task_id: &TaskId) -> Result<CancellationToken> {
        let token = CancellationToken::new();
        self.tasks
            .lock()
            .map_err(|_| ParleyError::Backend("Task registry lock poisoned".to_string()))?
            .insert(task_id.clone(), token.clone());
        Ok(token)
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn start_generation(&self, model: &str, messages: &[ChatMessage]) -> Result<TaskId> {
        let url = format!("{}/api/chat", self.config.host.trim_end_matches('/'));
        let request = OllamaRequest {
            model,
            messages,
            stream: true,
        };

        tracing::debug!(
            "Sending Ollama request: model={}, {} messages",
            model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Ollama request failed: {}", e);
                ParleyError::StartFailure(format!("Ollama request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Ollama returned error {}: {}", status, error_text);
            return Err(ParleyError::StartFailure(format!(
                "Ollama returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let task_id = TaskId::new(uuid::Uuid::new_v4().to_string());
        let cancellation = self.register(&task_id)?;
        let bus = self.bus.clone();
        let tasks = Arc::clone(&self.tasks);
        let relay_id = task_id.clone();
        let byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            relay_stream(byte_stream, relay_id.clone(), &bus, cancellation).await;
            if let Ok(mut tasks) = tasks.lock() {
                tasks.remove(&relay_id);
            }
        });

        tracing::debug!("Ollama generation started: task={}", task_id);
        Ok(task_id)
    }

    async fn stop_generation(&self, task_id: &TaskId) -> Result<()> {
        let token = self
            .tasks
            .lock()
            .map_err(|_| ParleyError::StopFailure("Task registry lock poisoned".to_string()))?
            .remove(task_id);

        match token {
            Some(token) => {
                token.cancel();
                tracing::debug!("Stopped Ollama generation: task={}", task_id);
                Ok(())
            }
            None => Err(ParleyError::StopFailure(format!(
                "Unknown or finished task: {}",
                task_id
            ))
            .into()),
        }
    }

    fn subscribe_tokens(&self) -> Subscription<TokenEvent> {
        self.bus.subscribe_tokens()
    }

    fn subscribe_completions(&self) -> Subscription<CompletionEvent> {
        self.bus.subscribe_completions()
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Read an NDJSON body and republish it as backend events
///
/// Always ends with exactly one completion event for `task_id`: normal on a
/// `done` chunk or a clean end of body, failed on an error chunk, a transport
/// error, or cancellation.
async fn relay_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    task_id: TaskId,
    bus: &EventBus,
    cancellation: CancellationToken,
) {
    tokio::pin!(byte_stream);
    let mut buffer = BytesMut::new();

    let completion = 'read: loop {
        let chunk = tokio::select! {
            biased;

            _ = cancellation.cancelled() => {
                break 'read CompletionEvent::failed(task_id.clone(), "generation stopped");
            }

            chunk = byte_stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
            Some(Err(e)) => {
                tracing::warn!("Ollama stream broke off: task={}, error={}", task_id, e);
                break 'read CompletionEvent::failed(task_id.clone(), e.to_string());
            }
            None => {
                // Unterminated final line.
                let rest = buffer.split();
                match parse_line(&rest) {
                    StreamLine::Token(token) => {
                        bus.publish_token(TokenEvent::new(task_id.clone(), token));
                    }
                    StreamLine::Failed(error) => {
                        break 'read CompletionEvent::failed(task_id.clone(), error);
                    }
                    StreamLine::Done | StreamLine::Skip => {}
                }
                break 'read CompletionEvent::done(task_id.clone());
            }
        }

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line = buffer.split_to(pos);
            buffer.advance(1);
            match parse_line(&line) {
                StreamLine::Token(token) => {
                    bus.publish_token(TokenEvent::new(task_id.clone(), token));
                }
                StreamLine::Done => break 'read CompletionEvent::done(task_id.clone()),
                StreamLine::Failed(error) => {
                    tracing::warn!("Ollama reported error: task={}, error={}", task_id, error);
                    break 'read CompletionEvent::failed(task_id.clone(), error);
                }
                StreamLine::Skip => {}
            }
        }
    };

    bus.publish_completion(completion);
}

/// Classify one line of the response body
fn parse_line(line: &[u8]) -> StreamLine {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(_) => {
            tracing::warn!("Skipping non UTF-8 line in Ollama stream");
            return StreamLine::Skip;
        }
    };
    if text.is_empty() {
        return StreamLine::Skip;
    }

    let chunk: OllamaChunk = match serde_json::from_str(text) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!("Skipping malformed Ollama chunk: {}", e);
            return StreamLine::Skip;
        }
    };

    if let Some(error) = chunk.error {
        return StreamLine::Failed(error);
    }
    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    if chunk.done {
        // Ollama's final chunk carries empty content and timing stats.
        return StreamLine::Done;
    }
    if content.is_empty() {
        StreamLine::Skip
    } else {
        StreamLine::Token(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_stream(parts: Vec<&'static str>) -> impl Stream<Item = reqwest::Result<Bytes>> {
        futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes()))),
        )
    }

    #[test]
    fn test_ollama_backend_creation() {
        let backend = OllamaBackend::new(OllamaConfig::default(), EventBus::default()).unwrap();
        assert_eq!(backend.host(), "http://localhost:11434");
        assert_eq!(backend.name(), "ollama");
        assert_eq!(backend.running_tasks(), 0);
    }

    #[test]
    fn test_parse_line_token() {
        let line = br#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(parse_line(line), StreamLine::Token("Hel".to_string()));
    }

    #[test]
    fn test_parse_line_done() {
        let line = br#"{"message":{"role":"assistant","content":""},"done":true,"eval_count":12}"#;
        assert_eq!(parse_line(line), StreamLine::Done);
    }

    #[test]
    fn test_parse_line_error() {
        let line = br#"{"error":"model 'nope' not found"}"#;
        assert_eq!(
            parse_line(line),
            StreamLine::Failed("model 'nope' not found".to_string())
        );
    }

    #[test]
    fn test_parse_line_skips_blank_and_garbage() {
        assert_eq!(parse_line(b"   "), StreamLine::Skip);
        assert_eq!(parse_line(b"not json"), StreamLine::Skip);
        assert_eq!(parse_line(&[0xff, 0xfe]), StreamLine::Skip);
    }

    #[tokio::test]
    async fn test_relay_handles_lines_split_across_chunks() {
        let bus = EventBus::new(16);
        let mut tokens = bus.subscribe_tokens();
        let mut completions = bus.subscribe_completions();
        let stream = body_stream(vec![
            "{\"message\":{\"content\":\"Hel\"},\"do",
            "ne\":false}\n{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ]);

        relay_stream(stream, TaskId::new("t1"), &bus, CancellationToken::new()).await;

        assert_eq!(tokens.next().await.unwrap().token, "Hel");
        assert_eq!(tokens.next().await.unwrap().token, "lo");
        let done = completions.next().await.unwrap();
        assert_eq!(done.task_id, TaskId::new("t1"));
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_relay_error_chunk_completes_with_error() {
        let bus = EventBus::new(16);
        let mut completions = bus.subscribe_completions();
        let stream = body_stream(vec!["{\"error\":\"out of memory\"}\n"]);

        relay_stream(stream, TaskId::new("t1"), &bus, CancellationToken::new()).await;

        let event = completions.next().await.unwrap();
        assert_eq!(event.error.as_deref(), Some("out of memory"));
    }

    #[tokio::test]
    async fn test_relay_unterminated_last_line() {
        let bus = EventBus::new(16);
        let mut tokens = bus.subscribe_tokens();
        let mut completions = bus.subscribe_completions();
        let stream = body_stream(vec!["{\"message\":{\"content\":\"tail\"},\"done\":false}"]);

        relay_stream(stream, TaskId::new("t1"), &bus, CancellationToken::new()).await;

        assert_eq!(tokens.next().await.unwrap().token, "tail");
        assert!(completions.next().await.unwrap().error.is_none());
    }

    #[tokio::test]
    async fn test_relay_stops_on_cancellation() {
        let bus = EventBus::new(16);
        let mut completions = bus.subscribe_completions();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        relay_stream(
            futures::stream::pending::<reqwest::Result<Bytes>>(),
            TaskId::new("t1"),
            &bus,
            cancellation,
        )
        .await;

        let event = completions.next().await.unwrap();
        assert_eq!(event.error.as_deref(), Some("generation stopped"));
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_stop_failure() {
        let backend = OllamaBackend::new(OllamaConfig::default(), EventBus::default()).unwrap();
        let err = backend
            .stop_generation(&TaskId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParleyError>(),
            Some(ParleyError::StopFailure(_))
        ));
    }
}
