//! Backend module for Parley
//!
//! This module contains the model-serving backend abstraction, the event bus
//! its events travel on, and implementations for Ollama and an in-process
//! fake.

pub mod base;
pub mod events;
pub mod fake;
pub mod ollama;

pub use base::{Backend, ChatMessage, CompletionEvent, TaskId, TokenEvent};
pub use events::{EventBus, Subscription};
pub use fake::FakeBackend;
pub use ollama::OllamaBackend;

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::error::{ParleyError, Result};

/// Create a backend instance based on configuration
///
/// # Arguments
///
/// * `config` - Backend configuration; `backend_type` is "ollama" or "fake"
/// * `bus` - Event bus the backend publishes on
///
/// # Errors
///
/// Returns error if the backend type is unknown or initialization fails
///
/// # Examples
///
/// ```
/// use parley::config::BackendConfig;
/// use parley::providers::{create_backend, EventBus};
///
/// let config = BackendConfig {
///     backend_type: "fake".to_string(),
///     ..BackendConfig::default()
/// };
/// let backend = create_backend(&config, EventBus::default()).unwrap();
/// assert_eq!(backend.name(), "fake");
/// ```
pub fn create_backend(config: &BackendConfig, bus: EventBus) -> Result<Arc<dyn Backend>> {
    match config.backend_type.as_str() {
        "ollama" => Ok(Arc::new(OllamaBackend::new(config.ollama.clone(), bus)?)),
        "fake" => Ok(Arc::new(FakeBackend::echo(bus))),
        other => Err(ParleyError::Backend(format!("Unknown backend type: {}", other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OllamaConfig;

    #[test]
    fn test_create_backend_invalid_type() {
        let config = BackendConfig {
            backend_type: "invalid".to_string(),
            ollama: OllamaConfig::default(),
        };
        assert!(create_backend(&config, EventBus::default()).is_err());
    }

    #[test]
    fn test_create_backend_ollama() {
        let config = BackendConfig::default();
        let backend = create_backend(&config, EventBus::default()).unwrap();
        assert_eq!(backend.name(), "ollama");
    }

    #[test]
    fn test_create_backend_shares_bus() {
        let bus = EventBus::new(4);
        let config = BackendConfig {
            backend_type: "fake".to_string(),
            ollama: OllamaConfig::default(),
        };
        let backend = create_backend(&config, bus.clone()).unwrap();
        let _sub = backend.subscribe_tokens();
        assert_eq!(bus.token_listeners(), 1);
    }
}
