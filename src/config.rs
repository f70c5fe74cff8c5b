//! Configuration management for Parley
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::chat::stats::{StatsWindow, DEFAULT_CONTEXT_WINDOW_TURNS, DEFAULT_NEXT_PROMPT_TURNS};
use crate::error::{ParleyError, Result};
use crate::providers::events::DEFAULT_EVENT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for Parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend configuration
    #[serde(default)]
    pub backend: BackendConfig,
    /// Chat session behavior
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Backend configuration
///
/// Specifies which model-serving backend to use and its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Type of backend to use ("ollama" or "fake")
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,

    /// Ollama configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
}

fn default_backend_type() -> String {
    "ollama".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            ollama: OllamaConfig::default(),
        }
    }
}

/// Ollama backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama server host
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Model used when a conversation does not name one
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Seconds allowed for establishing the HTTP connection
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "granite3-moe".to_string()
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
        }
    }
}

/// Chat session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Trailing turns summed for the context-window token estimate
    #[serde(default = "default_context_window_turns")]
    pub context_window_turns: usize,

    /// Trailing turns whose attachments count toward the next prompt
    #[serde(default = "default_next_prompt_turns")]
    pub next_prompt_turns: usize,

    /// Cancel a stream that produced no event for this many seconds
    ///
    /// Unset means streams never time out.
    #[serde(default)]
    pub stream_idle_timeout_seconds: Option<u64>,

    /// Events buffered per channel before a slow listener lags
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_context_window_turns() -> usize {
    DEFAULT_CONTEXT_WINDOW_TURNS
}

fn default_next_prompt_turns() -> usize {
    DEFAULT_NEXT_PROMPT_TURNS
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_window_turns: default_context_window_turns(),
            next_prompt_turns: default_next_prompt_turns(),
            stream_idle_timeout_seconds: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl ChatConfig {
    /// Window sizes for the usage statistics engine
    pub fn stats_window(&self) -> StatsWindow {
        StatsWindow {
            context_turns: self.context_window_turns,
            next_prompt_turns: self.next_prompt_turns,
        }
    }

    /// Idle timeout as a duration, when configured
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_seconds.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(backend_type) = std::env::var("PARLEY_BACKEND") {
            self.backend.backend_type = backend_type;
        }

        if let Ok(host) = std::env::var("PARLEY_OLLAMA_HOST") {
            self.backend.ollama.host = host;
        }

        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            self.backend.ollama.model = model;
        }

        if let Ok(turns) = std::env::var("PARLEY_CONTEXT_WINDOW_TURNS") {
            if let Ok(value) = turns.parse() {
                self.chat.context_window_turns = value;
            } else {
                tracing::warn!("Invalid PARLEY_CONTEXT_WINDOW_TURNS: {}", turns);
            }
        }

        if let Ok(turns) = std::env::var("PARLEY_NEXT_PROMPT_TURNS") {
            if let Ok(value) = turns.parse() {
                self.chat.next_prompt_turns = value;
            } else {
                tracing::warn!("Invalid PARLEY_NEXT_PROMPT_TURNS: {}", turns);
            }
        }

        if let Ok(timeout) = std::env::var("PARLEY_STREAM_IDLE_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.chat.stream_idle_timeout_seconds = Some(value);
            } else {
                tracing::warn!("Invalid PARLEY_STREAM_IDLE_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(capacity) = std::env::var("PARLEY_EVENT_CAPACITY") {
            if let Ok(value) = capacity.parse() {
                self.chat.event_capacity = value;
            } else {
                tracing::warn!("Invalid PARLEY_EVENT_CAPACITY: {}", capacity);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        match &cli.command {
            crate::cli::Commands::Chat { model, host } => {
                if let Some(host) = host {
                    self.backend.ollama.host = host.clone();
                }
                if let Some(model) = model {
                    self.backend.ollama.model = model.clone();
                }
            }
            crate::cli::Commands::Ask { model, .. } => {
                if let Some(model) = model {
                    self.backend.ollama.model = model.clone();
                }
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let valid_backends = ["ollama", "fake"];
        if !valid_backends.contains(&self.backend.backend_type.as_str()) {
            return Err(ParleyError::Config(format!(
                "Invalid backend type: {}. Must be one of: {}",
                self.backend.backend_type,
                valid_backends.join(", ")
            ))
            .into());
        }

        let host = &self.backend.ollama.host;
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(ParleyError::Config(format!(
                "ollama.host must be an http(s) URL, got: {}",
                host
            ))
            .into());
        }

        if self.backend.ollama.model.trim().is_empty() {
            return Err(ParleyError::Config("ollama.model cannot be empty".to_string()).into());
        }

        if self.backend.ollama.connect_timeout_seconds == 0 {
            return Err(ParleyError::Config(
                "ollama.connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.chat.context_window_turns == 0 {
            return Err(ParleyError::Config(
                "chat.context_window_turns must be greater than 0".to_string(),
            )
            .into());
        }

        if self.chat.next_prompt_turns == 0 {
            return Err(ParleyError::Config(
                "chat.next_prompt_turns must be greater than 0".to_string(),
            )
            .into());
        }

        if self.chat.stream_idle_timeout_seconds == Some(0) {
            return Err(ParleyError::Config(
                "chat.stream_idle_timeout_seconds must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.chat.event_capacity == 0 {
            return Err(ParleyError::Config(
                "chat.event_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
