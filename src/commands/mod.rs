/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes two top-level command modules:

- `chat`: Interactive chat with streamed replies
- `ask`: Seed one conversation with a prompt and stream the reply

Both drive a [`ChatClient`]; rendering helpers shared by the two live here.
*/

use crate::chat::stats::UsageStats;
use crate::chat::ChatClient;
use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::session::{StreamState, StreamUpdate};
use crate::storage::{ConversationId, ConversationSummary, FileRef};
use colored::Colorize;
use prettytable::{row, Table};
use std::io::Write;

// Special commands parser for the interactive loop
pub mod special_commands;

/// Format a response time in seconds, or `n/a` when none was recorded
pub fn format_response_time(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => format!("{:.2}s", s),
        None => "n/a".to_string(),
    }
}

/// Label/value rows describing usage statistics
///
/// Token counts are estimates and labelled as such.
pub fn usage_rows(stats: &UsageStats) -> Vec<(String, String)> {
    let mut rows = vec![
        ("Total tokens (est.)".to_string(), stats.total_tokens.to_string()),
        ("Context tokens (est.)".to_string(), stats.context_tokens.to_string()),
        ("Files attached".to_string(), stats.total_files.to_string()),
        ("Files in next prompt".to_string(), stats.next_prompt_files.to_string()),
    ];

    match &stats.last_response {
        Some(last) => {
            rows.push((
                "Last response tokens (est.)".to_string(),
                last.token_count.to_string(),
            ));
            rows.push(("Last response words".to_string(), last.word_count.to_string()));
            rows.push((
                "Last response time".to_string(),
                format_response_time(last.response_time),
            ));
            rows.push((
                "Context used (est.)".to_string(),
                format!(
                    "{} tokens, {} files",
                    last.context_tokens_used, last.reference_files_used
                ),
            ));
        }
        None => rows.push(("Last response".to_string(), "none yet".to_string())),
    }

    rows
}

/// Print usage statistics as a table
pub fn print_usage_stats(stats: &UsageStats) {
    let mut table = Table::new();
    table.add_row(row!["Statistic", "Value"]);
    for (label, value) in usage_rows(stats) {
        table.add_row(row![label, value]);
    }
    println!();
    table.printstd();
    println!();
}

/// Print the conversations of this session, marking the current one
pub fn print_conversations(conversations: &[ConversationSummary], current: &ConversationId) {
    let mut table = Table::new();
    table.add_row(row!["#", "Title", "Messages", ""]);
    for (idx, summary) in conversations.iter().enumerate() {
        let marker = if &summary.id == current { "*" } else { "" };
        table.add_row(row![idx + 1, summary.title, summary.turn_count, marker]);
    }
    println!();
    table.printstd();
    println!();
}

/// Render one stream update of `conversation_id` to the terminal
///
/// Updates of other conversations are not printed. Returns the error text
/// of a failed completion.
fn render_update(
    update: &StreamUpdate,
    conversation_id: &ConversationId,
    idle_seconds: u64,
) -> Option<String> {
    match update {
        StreamUpdate::Token {
            conversation_id: id,
            token,
            ..
        } if id == conversation_id => {
            print!("{}", token);
            let _ = std::io::stdout().flush();
            None
        }
        StreamUpdate::Completed {
            conversation_id: id,
            response_time,
            error,
            ..
        } if id == conversation_id => {
            println!();
            match error {
                Some(error) => {
                    eprintln!("{}", format!("Error: {}", error).red());
                    Some(error.clone())
                }
                None => {
                    println!(
                        "{}\n",
                        format!("({:.2}s)", response_time).dimmed()
                    );
                    None
                }
            }
        }
        StreamUpdate::TimedOut {
            conversation_id: id,
            ..
        } => {
            let timeout = ParleyError::StreamTimeout {
                conversation_id: id.to_string(),
                idle_seconds,
            };
            println!();
            eprintln!("{}", timeout.to_string().yellow());
            (id == conversation_id).then(|| timeout.to_string())
        }
        _ => None,
    }
}

/// Stream updates to the terminal until the conversation is idle
///
/// Ctrl-C cancels the conversation's stream. Returns the error of a failed
/// or timed out reply.
async fn stream_reply(
    client: &mut ChatClient,
    conversation_id: &ConversationId,
    idle_seconds: u64,
) -> Option<String> {
    let mut failure = None;
    while client.stream_state(conversation_id) != StreamState::Idle {
        tokio::select! {
            update = client.next_update() => match update {
                Some(update) => {
                    if let Some(error) = render_update(&update, conversation_id, idle_seconds) {
                        failure = Some(error);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if client.cancel_active_stream(conversation_id).await {
                    println!("\n{}\n", "[interrupted]".yellow());
                }
            }
        }
    }
    failure
}

fn idle_seconds(config: &Config) -> u64 {
    config.chat.stream_idle_timeout_seconds.unwrap_or(0)
}

// Chat command handler
pub mod chat {
    //! Interactive chat mode handler.
    //!
    //! Builds a [`ChatClient`] from configuration and runs a readline loop.
    //! Each message streams its reply to the terminal before the next prompt.

    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Start interactive chat mode
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    ///
    /// # Errors
    ///
    /// Returns error if the backend or the line editor cannot be created
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use parley::commands::chat;
    /// use parley::config::Config;
    ///
    /// # async fn example() -> parley::error::Result<()> {
    /// chat::run_chat(Config::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_chat(config: Config) -> Result<()> {
        tracing::info!("Starting interactive chat mode");

        let mut client = ChatClient::from_config(&config)?;
        let idle = idle_seconds(&config);
        let mut rl = DefaultEditor::new()?;

        let mut current = client.new_conversation();
        let mut attachments: Vec<FileRef> = Vec::new();

        print_welcome_banner(&client);
        println!("{}\n", crate::chat::NEW_CHAT_GREETING.cyan());

        loop {
            let prompt = format!("{} ", format!("[{}]>", client.model()).green());
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::NewChat => {
                            current = client.new_conversation();
                            attachments.clear();
                            println!("{}\n", crate::chat::NEW_CHAT_GREETING.cyan());
                        }
                        SpecialCommand::ListChats => {
                            print_conversations(&client.recent_conversations(), &current);
                        }
                        SpecialCommand::SwitchChat(position) => {
                            let conversations = client.recent_conversations();
                            match conversations.get(position - 1) {
                                Some(summary) => {
                                    current = summary.id.clone();
                                    println!("Switched to chat {}: {}\n", position, summary.title);
                                }
                                None => eprintln!(
                                    "{}",
                                    format!("No chat number {}; see /chats", position).red()
                                ),
                            }
                        }
                        SpecialCommand::Stats => {
                            let info = client.conversation_info(&current);
                            println!("\nConversation: {}", current);
                            println!("Messages:     {}", info.turn_count);
                            if let Some(created) = info.created_at {
                                println!("Started:      {}", created.format("%Y-%m-%d %H:%M:%S"));
                            }
                            print_usage_stats(&client.usage_stats(&current));
                        }
                        SpecialCommand::ShowModel => {
                            println!(
                                "Model: {} (backend: {})\n",
                                client.model().cyan(),
                                client.backend_name()
                            );
                        }
                        SpecialCommand::SwitchModel(model) => {
                            client.set_model(model.clone());
                            println!("Switched to model: {}\n", model.cyan());
                        }
                        SpecialCommand::Attach(path) => {
                            if std::path::Path::new(&path).is_file() {
                                let file = FileRef::from_path(path);
                                println!("Attached {} to your next message\n", file.name.cyan());
                                attachments.push(file);
                            } else {
                                eprintln!("{}", format!("File not found: {}", path).red());
                            }
                        }
                        SpecialCommand::Stop => {
                            if client.cancel_active_stream(&current).await {
                                println!("{}\n", "Stopped".yellow());
                            } else {
                                println!("No reply is streaming\n");
                            }
                        }
                        SpecialCommand::Help => print_help(),
                        SpecialCommand::Exit => break,
                        SpecialCommand::None => {
                            let files = std::mem::take(&mut attachments);
                            match client.send_user_message(&current, trimmed, files).await {
                                Ok(_) => {
                                    println!();
                                    stream_reply(&mut client, &current, idle).await;
                                }
                                Err(e) => print_send_error(&e),
                            }
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        client.shutdown().await;
        println!("Goodbye!");
        Ok(())
    }

    fn print_send_error(error: &anyhow::Error) {
        match error.downcast_ref::<ParleyError>() {
            Some(e) if e.is_retryable() => {
                eprintln!("{}", format!("{}. Please try again.\n", e).red());
            }
            _ => eprintln!("{}", format!("Error: {}\n", error).red()),
        }
    }

    /// Display banner at the start of interactive chat mode
    fn print_welcome_banner(client: &ChatClient) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║              Parley Interactive Chat - Welcome!              ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");
        println!(
            "Model:   {} (backend: {})",
            client.model().cyan(),
            client.backend_name()
        );
        println!("Type '/help' for available commands, 'exit' to quit\n");
    }
}

// One-shot command handler
pub mod ask {
    //! Seeds a fresh conversation with one prompt and streams the reply.

    use super::*;
    use crate::session::SeedOutcome;

    /// Run the ask command
    ///
    /// With `json`, tokens are not echoed; the finished conversation and its
    /// usage statistics are printed as one JSON document instead.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot start the reply, the reply fails
    /// or times out, or JSON output cannot be produced
    pub async fn run_ask(config: Config, prompt: String, json: bool) -> Result<()> {
        let mut client = ChatClient::from_config(&config)?;
        let idle = idle_seconds(&config);
        let conversation_id = ConversationId::generate();

        let outcome = client
            .seed_conversation(&conversation_id, &prompt, None)
            .await?;
        if let SeedOutcome::Seeded { reply_turn, .. } = outcome {
            tracing::debug!(conversation = %conversation_id, turn = reply_turn.0, "Streaming reply");
        }

        let failure = if json {
            wait_quietly(&mut client, &conversation_id, idle).await
        } else {
            stream_reply(&mut client, &conversation_id, idle).await
        };
        client.shutdown().await;

        if let Some(error) = failure {
            return Err(ParleyError::Backend(error).into());
        }

        let stats = client.usage_stats(&conversation_id);
        if json {
            let document = serde_json::json!({
                "conversation_id": conversation_id,
                "model": client.model(),
                "turns": client.snapshot(&conversation_id),
                "stats": stats,
            });
            let output = serde_json::to_string_pretty(&document).map_err(ParleyError::from)?;
            println!("{}", output);
        } else {
            print_usage_stats(&stats);
        }
        Ok(())
    }

    async fn wait_quietly(
        client: &mut ChatClient,
        conversation_id: &ConversationId,
        idle_seconds: u64,
    ) -> Option<String> {
        let mut failure = None;
        for update in client.wait_for_idle(conversation_id).await {
            match update {
                StreamUpdate::Completed {
                    conversation_id: id,
                    error: Some(error),
                    ..
                } if &id == conversation_id => failure = Some(error),
                StreamUpdate::TimedOut {
                    conversation_id: id,
                    ..
                } if &id == conversation_id => {
                    failure = Some(
                        ParleyError::StreamTimeout {
                            conversation_id: id.to_string(),
                            idle_seconds,
                        }
                        .to_string(),
                    )
                }
                _ => {}
            }
        }
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::stats::LastResponseStats;
    use chrono::Utc;

    fn stats(last_response: Option<LastResponseStats>) -> UsageStats {
        UsageStats {
            total_tokens: 120,
            total_files: 2,
            context_tokens: 80,
            next_prompt_files: 1,
            last_response,
        }
    }

    #[test]
    fn test_format_response_time() {
        assert_eq!(format_response_time(Some(1.5)), "1.50s");
        assert_eq!(format_response_time(None), "n/a");
    }

    #[test]
    fn test_usage_rows_without_response() {
        let rows = usage_rows(&stats(None));
        assert_eq!(rows[0], ("Total tokens (est.)".to_string(), "120".to_string()));
        assert_eq!(
            rows.last().unwrap(),
            &("Last response".to_string(), "none yet".to_string())
        );
    }

    #[test]
    fn test_usage_rows_with_response() {
        let rows = usage_rows(&stats(Some(LastResponseStats {
            token_count: 12,
            word_count: 9,
            response_time: Some(0.42),
            created_at: Utc::now(),
            context_tokens_used: 60,
            reference_files_used: 2,
        })));
        assert!(rows.contains(&("Last response time".to_string(), "0.42s".to_string())));
        assert!(rows.contains(&(
            "Context used (est.)".to_string(),
            "60 tokens, 2 files".to_string()
        )));
        assert!(rows.iter().all(|(label, _)| label != "Last response"));
    }

    #[test]
    fn test_render_update_reports_failure_of_current_conversation() {
        let current = ConversationId::new("ch_1");
        let other = ConversationId::new("ch_2");
        let failed = StreamUpdate::Completed {
            conversation_id: current.clone(),
            turn_id: crate::storage::TurnId(2),
            response_time: 0.1,
            error: Some("model not found".to_string()),
        };
        assert_eq!(
            render_update(&failed, &current, 0),
            Some("model not found".to_string())
        );
        assert_eq!(render_update(&failed, &other, 0), None);
    }

    #[test]
    fn test_render_update_timeout_message() {
        let current = ConversationId::new("ch_1");
        let timed_out = StreamUpdate::TimedOut {
            conversation_id: current.clone(),
            turn_id: crate::storage::TurnId(2),
        };
        let message = render_update(&timed_out, &current, 30).unwrap();
        assert!(message.contains("idle for 30s"));
    }
}
