//! Stream session metrics
//!
//! Thin wrappers over the `metrics` facade so the controller records the same
//! names and labels everywhere. Without an installed recorder every call is a
//! no-op.
//!
//! # Metrics
//!
//! - `stream_sessions_started_total`: Counter of sessions whose start succeeded
//! - `stream_start_failures_total`: Counter of rejected start commands
//! - `stream_sessions_active`: Gauge of live sessions
//! - `stream_sessions_finished_total`: Counter of ended sessions by outcome
//! - `stream_tokens_applied_total`: Counter of tokens merged into the store
//! - `stream_stale_events_total`: Counter of discarded events by kind
//! - `stream_response_seconds`: Histogram of response time at finalization
//! - `stream_stop_failures_total`: Counter of swallowed stop failures

use metrics::{decrement_gauge, histogram, increment_counter, increment_gauge};

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Completion event finalized the turn
    Completed,
    /// Completion event carried a backend error
    Failed,
    /// Explicit cancel, supersession or teardown
    Cancelled,
    /// Idle timeout expired
    TimedOut,
}

impl SessionOutcome {
    /// Label value used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Record a successful start command
pub fn record_started(backend: &str) {
    increment_counter!("stream_sessions_started_total", "backend" => backend.to_string());
    increment_gauge!("stream_sessions_active", 1.0);
}

/// Record a rejected start command
pub fn record_start_failure(backend: &str) {
    increment_counter!("stream_start_failures_total", "backend" => backend.to_string());
}

/// Record the end of a session
///
/// `response_time` is only recorded for sessions that reached finalization.
pub fn record_finished(outcome: SessionOutcome, response_time: Option<f64>) {
    decrement_gauge!("stream_sessions_active", 1.0);
    increment_counter!(
        "stream_sessions_finished_total",
        "outcome" => outcome.as_str()
    );
    if let Some(seconds) = response_time {
        histogram!(
            "stream_response_seconds",
            seconds,
            "outcome" => outcome.as_str()
        );
    }
}

/// Record one token merged into a streaming turn
pub fn record_token() {
    increment_counter!("stream_tokens_applied_total");
}

/// Record an event discarded because it belongs to no live session
pub fn record_stale(kind: &'static str) {
    increment_counter!("stream_stale_events_total", "kind" => kind);
}

/// Record a stop command whose failure was swallowed
pub fn record_stop_failure() {
    increment_counter!("stream_stop_failures_total");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(SessionOutcome::Completed.as_str(), "completed");
        assert_eq!(SessionOutcome::Failed.as_str(), "failed");
        assert_eq!(SessionOutcome::Cancelled.as_str(), "cancelled");
        assert_eq!(SessionOutcome::TimedOut.as_str(), "timed_out");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_started("fake");
        record_start_failure("fake");
        record_token();
        record_stale("token");
        record_stop_failure();
        record_finished(SessionOutcome::Completed, Some(0.42));
        record_finished(SessionOutcome::Cancelled, None);
    }
}
