//! Error types for Parley
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Parley operations
///
/// Covers configuration loading, backend commands, and the stream session
/// lifecycle. Stale events and duplicate seeding are not errors and never
/// surface as one.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend-related errors (connection, protocol, unknown task)
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend rejected or could not be reached when starting a stream
    ///
    /// Recoverable: the conversation is back to idle and the caller may retry.
    #[error("Failed to start generation: {0}")]
    StartFailure(String),

    /// Best-effort stop command failed
    ///
    /// Produced by backends, swallowed by the stream controller.
    #[error("Failed to stop generation: {0}")]
    StopFailure(String),

    /// A stream produced no events for longer than the configured idle timeout
    #[error("Stream for conversation {conversation_id} was idle for {idle_seconds}s")]
    StreamTimeout {
        /// Conversation whose stream was abandoned
        conversation_id: String,
        /// Configured idle timeout in seconds
        idle_seconds: u64,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ParleyError {
    /// Returns true when the user can simply try the same action again
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::error::ParleyError;
    ///
    /// assert!(ParleyError::StartFailure("refused".to_string()).is_retryable());
    /// assert!(!ParleyError::Config("bad".to_string()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StartFailure(_) | Self::StreamTimeout { .. } | Self::Http(_)
        )
    }
}

/// Result type alias for Parley operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ParleyError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_backend_error_display() {
        let error = ParleyError::Backend("unknown task".to_string());
        assert_eq!(error.to_string(), "Backend error: unknown task");
    }

    #[test]
    fn test_start_failure_display() {
        let error = ParleyError::StartFailure("connection refused".to_string());
        assert_eq!(
            error.to_string(),
            "Failed to start generation: connection refused"
        );
    }

    #[test]
    fn test_stop_failure_display() {
        let error = ParleyError::StopFailure("task already finished".to_string());
        assert_eq!(
            error.to_string(),
            "Failed to stop generation: task already finished"
        );
    }

    #[test]
    fn test_stream_timeout_display() {
        let error = ParleyError::StreamTimeout {
            conversation_id: "ch_1".to_string(),
            idle_seconds: 30,
        };
        let s = error.to_string();
        assert!(s.contains("ch_1"));
        assert!(s.contains("30s"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ParleyError::StartFailure("x".to_string()).is_retryable());
        assert!(ParleyError::StreamTimeout {
            conversation_id: "c".to_string(),
            idle_seconds: 1
        }
        .is_retryable());
        assert!(!ParleyError::StopFailure("x".to_string()).is_retryable());
        assert!(!ParleyError::Backend("x".to_string()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ParleyError = io_error.into();
        assert!(matches!(error, ParleyError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ParleyError = json_error.into();
        assert!(matches!(error, ParleyError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: ParleyError = yaml_error.into();
        assert!(matches!(error, ParleyError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ParleyError>();
    }
}
