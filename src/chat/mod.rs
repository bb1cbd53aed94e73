//! Chat sessions against the ZeroX backend.
//!
//! This module provides the session controller behind the `zerox-chat` REPL.
//! It supports:
//!
//! - Streaming replies applied to the message list as they arrive
//! - One turn at a time per session, cancellable from another task
//! - Slash commands for session control
//! - Configurable model, temperature, and response length
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: The turn state machine and its streaming driver
//! - [`commands`]: Slash command parsing

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{
    ChatArgs, ChatConfig, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
    MAX_TOKENS_RANGE, TEMPERATURE_RANGE,
};
pub use session::{ChatSession, SessionPhase, SessionStats, TurnCanceller, TurnOutcome};
