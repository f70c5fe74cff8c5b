//! Parley - streaming chat client library
//!
//! This library provides the stream session manager behind the Parley chat
//! client: an in-memory message store, usage statistics derived from it, and
//! a controller that runs one streamed generation per conversation against a
//! backend reached through commands and events.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `storage`: Conversations, turns and the in-memory message store
//! - `chat`: The [`ChatClient`] facade and usage statistics
//! - `session`: Stream controller and the seed guard
//! - `providers`: Backend abstraction, event bus, Ollama and fake backends
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`, `commands`: Command-line interface and its handlers
//!
//! # Example
//!
//! ```no_run
//! use parley::{ChatClient, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let mut client = ChatClient::from_config(&config)?;
//!     let id = client.new_conversation();
//!     client.send_user_message(&id, "Hello", Vec::new()).await?;
//!     client.wait_for_idle(&id).await;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod providers;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use chat::stats::{StatsWindow, UsageStats};
pub use chat::ChatClient;
pub use config::Config;
pub use error::{ParleyError, Result};
pub use session::{SeedOutcome, StreamState, StreamUpdate};
pub use storage::{ConversationId, FileRef, MessageStore, Role, Turn, TurnId};
