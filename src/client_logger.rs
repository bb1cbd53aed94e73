//! Logging trait for chat session activity.
//!
//! This module provides the [`ClientLogger`] trait that allows users to capture
//! every frame a [`ChatSession`](crate::chat::ChatSession) applies and every
//! assistant message it settles.

use crate::chat::TurnOutcome;
use crate::types::{ChatMessage, StreamFrame};

/// A trait for logging chat session activity.
///
/// # Example
///
/// ```rust,ignore
/// use zerox::{ChatMessage, ClientLogger, StreamFrame};
/// use zerox::chat::TurnOutcome;
/// use std::sync::Mutex;
///
/// struct FileLogger {
///     file: Mutex<std::fs::File>,
/// }
///
/// impl ClientLogger for FileLogger {
///     fn log_frame(&self, frame: &StreamFrame) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "frame: {frame:?}").unwrap();
///     }
///
///     fn log_turn(&self, message: &ChatMessage, outcome: &TurnOutcome) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "turn {outcome:?}: {}", serde_json::to_string(message).unwrap()).unwrap();
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log a frame as it is applied to the session.
    ///
    /// Frames arriving after a turn settled or was cancelled are not applied
    /// and not logged.
    fn log_frame(&self, frame: &StreamFrame);

    /// Log the assistant message of a turn once it settles.
    fn log_turn(&self, message: &ChatMessage, outcome: &TurnOutcome);
}
