//! Command-line interface definition for Parley
//!
//! This module defines the CLI structure using clap's derive API,
//! providing an interactive chat loop and a one-shot ask command.

use clap::{Parser, Subcommand};

/// Parley - streaming chat client for local language models
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Parley
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Model to chat with (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Ollama host URL (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Seed a new conversation with one prompt and stream the reply
    Ask {
        /// Initial message of the conversation
        #[arg(short, long)]
        prompt: String,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Print the conversation and usage statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            command: Commands::Chat {
                model: None,
                host: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Chat {
                model: None,
                host: None
            }
        ));
    }

    #[test]
    fn test_cli_parse_chat_command() {
        let cli = Cli::try_parse_from(["parley", "chat"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { .. }));
        assert_eq!(cli.config.as_deref(), Some("config/config.yaml"));
    }

    #[test]
    fn test_cli_parse_chat_with_overrides() {
        let cli = Cli::try_parse_from([
            "parley",
            "chat",
            "--model",
            "llama3.2",
            "--host",
            "http://gpu:11434",
        ])
        .unwrap();
        if let Commands::Chat { model, host } = cli.command {
            assert_eq!(model.as_deref(), Some("llama3.2"));
            assert_eq!(host.as_deref(), Some("http://gpu:11434"));
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_ask() {
        let cli = Cli::try_parse_from(["parley", "ask", "-p", "What is Rust?", "--json"]).unwrap();
        if let Commands::Ask {
            prompt,
            model,
            json,
        } = cli.command
        {
            assert_eq!(prompt, "What is Rust?");
            assert!(model.is_none());
            assert!(json);
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_cli_parse_ask_requires_prompt() {
        assert!(Cli::try_parse_from(["parley", "ask"]).is_err());
    }

    #[test]
    fn test_cli_parse_with_config_and_verbose() {
        let cli = Cli::try_parse_from(["parley", "-v", "--config", "custom.yaml", "chat"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config.as_deref(), Some("custom.yaml"));
    }

    #[test]
    fn test_cli_parse_missing_command() {
        assert!(Cli::try_parse_from(["parley"]).is_err());
    }

    #[test]
    fn test_cli_parse_invalid_command() {
        assert!(Cli::try_parse_from(["parley", "serve"]).is_err());
    }
}
