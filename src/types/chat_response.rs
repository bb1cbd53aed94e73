use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ConversationId};

/// Reply to a non-streaming `POST /chat/send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Conversation the turn was stored under.
    pub conversation_id: ConversationId,

    /// The stored user message.
    pub message: ChatMessage,

    /// The stored assistant reply.
    pub response: ChatMessage,
}
