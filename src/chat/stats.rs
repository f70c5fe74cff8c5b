//! Usage statistics derived from a conversation snapshot
//!
//! Everything here is a pure function of a slice of turns. Nothing is cached:
//! callers recompute from the message store whenever they need fresh numbers.
//!
//! # Token Counting
//!
//! Token counts are an approximation: characters / 4, rounded up. This is not
//! real tokenization and every surface that displays these numbers labels them
//! as estimates.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::{Role, Turn};

/// Turns summed for the context-window estimate
pub const DEFAULT_CONTEXT_WINDOW_TURNS: usize = 10;

/// Turns whose attachments count toward the next prompt
pub const DEFAULT_NEXT_PROMPT_TURNS: usize = 5;

/// Window sizes used by the statistics engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsWindow {
    /// Number of trailing turns summed for `context_tokens`
    pub context_turns: usize,
    /// Number of trailing turns summed for `next_prompt_files`
    pub next_prompt_turns: usize,
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self {
            context_turns: DEFAULT_CONTEXT_WINDOW_TURNS,
            next_prompt_turns: DEFAULT_NEXT_PROMPT_TURNS,
        }
    }
}

/// Statistics about the most recent finished assistant turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastResponseStats {
    /// Estimated tokens in the response
    pub token_count: usize,
    /// Whitespace-delimited words in the response
    pub word_count: usize,
    /// Seconds the response took to stream, when recorded
    pub response_time: Option<f64>,
    /// When the response turn was created
    pub created_at: DateTime<Utc>,
    /// Estimated tokens of every turn before the response
    pub context_tokens_used: usize,
    /// Files attached to every turn before the response
    pub reference_files_used: usize,
}

/// Usage statistics for one conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    /// Estimated tokens across all turns
    pub total_tokens: usize,
    /// Files attached across all turns
    pub total_files: usize,
    /// Estimated tokens in the trailing context window
    pub context_tokens: usize,
    /// Files attached in the trailing next-prompt window
    pub next_prompt_files: usize,
    /// Absent until an assistant turn has finished streaming
    pub last_response: Option<LastResponseStats>,
}

impl UsageStats {
    /// Derive statistics from an ordered sequence of turns
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::chat::stats::{StatsWindow, UsageStats};
    /// use parley::storage::{Turn, TurnId};
    ///
    /// let turns = vec![
    ///     Turn::user(TurnId(1), "a".repeat(40)),
    ///     Turn::assistant(TurnId(2), "b".repeat(80)),
    /// ];
    /// let stats = UsageStats::from_turns(&turns, StatsWindow::default());
    /// assert_eq!(stats.total_tokens, 30);
    /// ```
    pub fn from_turns(turns: &[Turn], window: StatsWindow) -> Self {
        let total_tokens = sum_tokens(turns);
        let total_files = sum_files(turns);
        let context_tokens = sum_tokens(tail(turns, window.context_turns));
        let next_prompt_files = sum_files(tail(turns, window.next_prompt_turns));

        let last_response = turns
            .iter()
            .rposition(|t| t.role == Role::Assistant && !t.streaming)
            .map(|idx| {
                let response = &turns[idx];
                let preceding = &turns[..idx];
                LastResponseStats {
                    token_count: estimate_tokens(&response.content),
                    word_count: count_words(&response.content),
                    response_time: response.response_time,
                    created_at: response.created_at,
                    context_tokens_used: sum_tokens(preceding),
                    reference_files_used: sum_files(preceding),
                }
            });

        Self {
            total_tokens,
            total_files,
            context_tokens,
            next_prompt_files,
            last_response,
        }
    }
}

/// Estimates token count for a string: characters / 4, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// Counts whitespace-delimited, non-empty words
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn tail(turns: &[Turn], n: usize) -> &[Turn] {
    &turns[turns.len().saturating_sub(n)..]
}

fn sum_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(|t| estimate_tokens(&t.content)).sum()
}

fn sum_files(turns: &[Turn]) -> usize {
    turns.iter().map(|t| t.files.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileRef, TurnId};
    use std::time::Instant;

    fn user(id: u64, text: &str) -> Turn {
        Turn::user(TurnId(id), text)
    }

    fn assistant(id: u64, text: &str) -> Turn {
        Turn::assistant(TurnId(id), text)
    }

    fn files(n: usize) -> Vec<FileRef> {
        (0..n)
            .map(|i| FileRef::from_path(format!("file{}.txt", i)))
            .collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens("hello world"), 3);
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   "), 0);
        assert_eq!(count_words("one  two\tthree\nfour"), 4);
    }

    #[test]
    fn test_total_tokens_for_forty_and_eighty_chars() {
        let turns = vec![user(1, &"a".repeat(40)), assistant(2, &"b".repeat(80))];
        let stats = UsageStats::from_turns(&turns, StatsWindow::default());
        assert_eq!(stats.total_tokens, 30);
        assert_eq!(stats.context_tokens, 30);
    }

    #[test]
    fn test_empty_conversation() {
        let stats = UsageStats::from_turns(&[], StatsWindow::default());
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.total_files, 0);
        assert!(stats.last_response.is_none());
    }

    #[test]
    fn test_context_window_counts_last_ten_turns() {
        // 12 turns of 4 chars each (1 token), first two are 40 chars (10 tokens)
        let mut turns = vec![user(1, &"x".repeat(40)), user(2, &"x".repeat(40))];
        for i in 3..=12 {
            turns.push(user(i, "abcd"));
        }
        let stats = UsageStats::from_turns(&turns, StatsWindow::default());
        assert_eq!(stats.total_tokens, 30);
        assert_eq!(stats.context_tokens, 10);
    }

    #[test]
    fn test_next_prompt_files_counts_last_five_turns() {
        let mut turns = Vec::new();
        for i in 1..=7 {
            turns.push(user(i, "q").with_files(files(1)));
        }
        let stats = UsageStats::from_turns(&turns, StatsWindow::default());
        assert_eq!(stats.total_files, 7);
        assert_eq!(stats.next_prompt_files, 5);
    }

    #[test]
    fn test_custom_window() {
        let turns = vec![user(1, "abcd"), user(2, "abcd"), user(3, "abcd")];
        let window = StatsWindow {
            context_turns: 1,
            next_prompt_turns: 0,
        };
        let stats = UsageStats::from_turns(&turns, window);
        assert_eq!(stats.context_tokens, 1);
        assert_eq!(stats.next_prompt_files, 0);
    }

    #[test]
    fn test_last_response_skips_streaming_turn() {
        let mut finished = assistant(2, "first answer here");
        finished.response_time = Some(1.5);
        let mut streaming = Turn::placeholder(TurnId(4), Instant::now());
        streaming.content = "partial".to_string();

        let turns = vec![
            user(1, &"a".repeat(8)).with_files(files(2)),
            finished,
            user(3, "next question"),
            streaming,
        ];
        let stats = UsageStats::from_turns(&turns, StatsWindow::default());
        let last = stats.last_response.expect("finished assistant turn");
        assert_eq!(last.word_count, 3);
        assert_eq!(last.token_count, estimate_tokens("first answer here"));
        assert_eq!(last.response_time, Some(1.5));
        assert_eq!(last.context_tokens_used, 2);
        assert_eq!(last.reference_files_used, 2);
    }

    #[test]
    fn test_last_response_absent_without_finished_assistant() {
        let turns = vec![
            user(1, "hi"),
            Turn::placeholder(TurnId(2), Instant::now()),
        ];
        let stats = UsageStats::from_turns(&turns, StatsWindow::default());
        assert!(stats.last_response.is_none());
    }
}
