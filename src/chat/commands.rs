//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the API.

use crate::chat::config::{MAX_TOKENS_RANGE, TEMPERATURE_RANGE};
use crate::types::ConversationId;

/// A parsed chat command.
///
/// These commands control the chat session and are not sent as messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a new conversation.
    New,

    /// Change the model.
    Model(String),

    /// List the models the account may use.
    Models,

    /// Set the sampling temperature.
    Temperature(f32),

    /// Set the maximum tokens per response.
    MaxTokens(u32),

    /// Log in with the given email; the password is prompted for.
    Login(String),

    /// Create an account with the given email and username.
    Register {
        /// Email address.
        email: String,
        /// Unique username.
        username: String,
    },

    /// Log out and forget the stored credentials.
    Logout,

    /// Show the logged-in account.
    Whoami,

    /// List stored conversations.
    Conversations,

    /// Continue a stored conversation.
    Open(ConversationId),

    /// Delete a stored conversation.
    Delete(ConversationId),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Display session statistics (message count, current model, etc.).
    Stats,

    /// Show the current configuration.
    ShowConfig,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use zerox::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/open 12").is_some());
/// assert!(parse_command("Hello!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" | "clear" => ChatCommand::New,
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model name".to_string()),
        },
        "models" => ChatCommand::Models,
        "temperature" => match argument {
            Some(arg) => match parse_f32_in_range(arg, *TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end()) {
                Ok(value) => ChatCommand::Temperature(value),
                Err(err) => ChatCommand::Invalid(format!("/temperature {err}")),
            },
            None => ChatCommand::Invalid("/temperature requires a value".to_string()),
        },
        "max_tokens" => match argument {
            Some(arg) => match arg.parse::<u32>() {
                Ok(value) if MAX_TOKENS_RANGE.contains(&value) => ChatCommand::MaxTokens(value),
                _ => ChatCommand::Invalid(format!(
                    "/max_tokens expects an integer between {} and {}",
                    MAX_TOKENS_RANGE.start(),
                    MAX_TOKENS_RANGE.end()
                )),
            },
            None => ChatCommand::Invalid("/max_tokens requires a value".to_string()),
        },
        "login" => match argument {
            Some(email) => ChatCommand::Login(email.to_string()),
            None => ChatCommand::Invalid("/login requires an email address".to_string()),
        },
        "register" => parse_register(argument),
        "logout" => ChatCommand::Logout,
        "whoami" | "me" => ChatCommand::Whoami,
        "conversations" | "list" => ChatCommand::Conversations,
        "open" => parse_id_command(argument, ChatCommand::Open, "/open"),
        "delete" => parse_id_command(argument, ChatCommand::Delete, "/delete"),
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "stats" | "status" => ChatCommand::Stats,
        "config" => ChatCommand::ShowConfig,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn parse_register(argument: Option<&str>) -> ChatCommand {
    let mut words = argument.unwrap_or_default().split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(email), Some(username), None) => ChatCommand::Register {
            email: email.to_string(),
            username: username.to_string(),
        },
        _ => ChatCommand::Invalid("/register expects <email> <username>".to_string()),
    }
}

fn parse_id_command<F>(argument: Option<&str>, constructor: F, name: &str) -> ChatCommand
where
    F: Fn(ConversationId) -> ChatCommand,
{
    match argument {
        Some(arg) => match arg.parse::<ConversationId>() {
            Ok(id) => constructor(id),
            Err(_) => ChatCommand::Invalid(format!("{name} expects a conversation id")),
        },
        None => ChatCommand::Invalid(format!("{name} requires a conversation id")),
    }
}

fn parse_f32_in_range(value: &str, min: f32, max: f32) -> Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| format!("expects a value between {min} and {max}"))?;
    if parsed.is_finite() && parsed >= min && parsed <= max {
        Ok(parsed)
    } else {
        Err(format!("expects a value between {min} and {max}"))
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new conversation
  /model <name>          Change the model (e.g., /model llama-3.1-8b-instant)
  /models                List available models
  /temperature <v>       Set temperature 0.0-2.0
  /max_tokens <n>        Set maximum response tokens (1-8192)
  /login <email>         Log in (prompts for the password)
  /register <email> <username>
                         Create an account (prompts for the password)
  /logout                Log out and forget stored credentials
  /whoami                Show the logged-in account
  /conversations         List stored conversations
  /open <id>             Continue a stored conversation
  /delete <id>           Delete a stored conversation
  /stats                 Show session statistics
  /config                Show current configuration
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl-C while a reply is streaming to stop it."#
}
