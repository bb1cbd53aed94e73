use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{ChatMessage, ConversationId};

/// A stored conversation as listed by `GET /chat/conversations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,

    /// Title, derived from the first message unless set explicitly.
    pub title: String,

    /// Model the conversation was started with.
    pub model: String,

    /// Creation time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Time of the last completed turn.
    #[serde(with = "crate::utils::time")]
    pub updated_at: OffsetDateTime,

    /// Whether the conversation is archived.
    #[serde(default)]
    pub is_archived: bool,

    /// Number of stored messages.
    #[serde(default)]
    pub message_count: Option<i64>,
}

/// A conversation together with its messages, from `GET /chat/conversations/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    /// The conversation itself.
    #[serde(flatten)]
    pub conversation: Conversation,

    /// Messages in creation order.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Body of `POST /chat/conversations`.  The backend fills in omitted fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
