use serde::{Deserialize, Serialize};

use crate::types::ConversationId;

/// Body of `POST /chat/send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,

    /// Conversation to continue; `None` starts a new conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    /// Model to answer with.
    pub model: String,

    /// Sampling temperature, 0.0 to 2.0.
    pub temperature: f32,

    /// Maximum tokens in the reply, 1 to 8192.
    pub max_tokens: u32,

    /// Whether the reply is streamed as `data:` lines.
    pub stream: bool,
}

impl ChatRequest {
    /// Create a streaming request for a new conversation.
    pub fn new(message: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            model: model.into(),
            temperature: 0.7,
            max_tokens: 4096,
            stream: true,
        }
    }

    /// Continue an existing conversation.
    pub fn with_conversation(mut self, conversation_id: Option<ConversationId>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the reply token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set whether the reply is streamed.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}
