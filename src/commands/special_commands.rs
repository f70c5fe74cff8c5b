//! Special commands parser for interactive chat mode
//!
//! Special commands are prefixed with `/` and are case-insensitive, except
//! for their arguments (model names and file paths keep their case). `exit`
//! and `quit` work without the slash.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },

    /// Command takes no argument but one was given
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start a new conversation and switch to it
    NewChat,

    /// List conversations of this session
    ListChats,

    /// Switch to the conversation at this 1-based position in `/chats`
    SwitchChat(usize),

    /// Show usage statistics of the current conversation
    Stats,

    /// Show the model in use
    ShowModel,

    /// Use a different model for the next messages
    SwitchModel(String),

    /// Attach a file to the next message
    Attach(String),

    /// Cancel the stream of the current conversation, if one survived
    Stop,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; send the input as a message
    None,
}

/// Parse a user input string into a special command
///
/// # Errors
///
/// Returns [`CommandError`] when input starts with `/` but is not a valid
/// command or has invalid arguments
///
/// # Examples
///
/// ```
/// use parley::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// let cmd = parse_special_command("/model llama3.2:latest").unwrap();
/// assert_eq!(cmd, SpecialCommand::SwitchModel("llama3.2:latest".to_string()));
///
/// let cmd = parse_special_command("hello there").unwrap();
/// assert_eq!(cmd, SpecialCommand::None);
///
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') {
        return Ok(match lower.as_str() {
            "exit" | "quit" => SpecialCommand::Exit,
            _ => SpecialCommand::None,
        });
    }

    let (command, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((command, arg)) => (command.to_lowercase(), arg.trim()),
        None => (lower.clone(), ""),
    };

    let no_arg = |cmd: SpecialCommand| {
        if arg.is_empty() {
            Ok(cmd)
        } else {
            Err(CommandError::UnsupportedArgument {
                command: command.clone(),
                arg: arg.to_string(),
            })
        }
    };

    match command.as_str() {
        "/new" => no_arg(SpecialCommand::NewChat),
        "/chats" => no_arg(SpecialCommand::ListChats),
        "/stats" | "/context" => no_arg(SpecialCommand::Stats),
        "/stop" => no_arg(SpecialCommand::Stop),
        "/help" | "/?" => no_arg(SpecialCommand::Help),
        "/exit" | "/quit" => no_arg(SpecialCommand::Exit),
        "/model" if arg.is_empty() => Ok(SpecialCommand::ShowModel),
        "/model" => Ok(SpecialCommand::SwitchModel(arg.to_string())),
        "/attach" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/attach".to_string(),
            usage: "/attach <path>".to_string(),
        }),
        "/attach" => Ok(SpecialCommand::Attach(arg.to_string())),
        "/switch" if arg.is_empty() => Err(CommandError::MissingArgument {
            command: "/switch".to_string(),
            usage: "/switch <number from /chats>".to_string(),
        }),
        "/switch" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => Ok(SpecialCommand::SwitchChat(n)),
            _ => Err(CommandError::UnsupportedArgument {
                command: "/switch".to_string(),
                arg: arg.to_string(),
            }),
        },
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print help text for special commands
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Chat
=====================================

CONVERSATIONS:
  /new            - Start a new chat
  /chats          - List chats of this session
  /switch <n>     - Switch to chat number <n> from /chats

MESSAGES:
  /attach <path>  - Attach a file to your next message
  /stop           - Cancel a reply that is still streaming
  Ctrl-C          - Cancel the reply while it streams

MODEL:
  /model          - Show the model in use
  /model <name>   - Use <name> for the next messages

SESSION INFORMATION:
  /stats          - Show usage statistics (token counts are estimates)
  /context        - Same as /stats
  /help           - Show this help message
  /?              - Same as /help

SESSION CONTROL:
  /exit, exit     - Exit interactive mode
  quit            - Same as exit

NOTES:
  - Commands are case-insensitive; arguments keep their case
  - Regular text (not starting with /) is sent to the model
"#
    );
}
