use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Role of the author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The person chatting.
    User,
    /// The model's reply.
    Assistant,
    /// Instructions stored alongside the conversation.
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Identifier of a chat message.
///
/// Messages loaded from the backend carry the server's numeric id; messages
/// created by the session during a turn carry a local id until the
/// conversation is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Assigned by the backend.
    Server(i64),
    /// Assigned by the session.
    Local(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(id) => write!(f, "{id}"),
            MessageId::Local(id) => write!(f, "{id}"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier.
    pub id: MessageId,

    /// Who wrote the message.
    pub role: MessageRole,

    /// Text of the message.  For an assistant reply being streamed this grows
    /// append-only until the turn settles.
    pub content: String,

    /// Model that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    /// Tokens the backend accounted to this message.
    #[serde(default)]
    pub tokens_used: i64,

    /// Creation time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
}

impl ChatMessage {
    /// Create a user message with a local id.
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::Local(id.into()),
            role: MessageRole::User,
            content: content.into(),
            model_used: None,
            tokens_used: 0,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Create an empty assistant placeholder with a local id.
    pub fn assistant_placeholder(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: MessageId::Local(id.into()),
            role: MessageRole::Assistant,
            content: String::new(),
            model_used: Some(model.into()),
            tokens_used: 0,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn deserializes_backend_message() {
        let message: ChatMessage = serde_json::from_value(json!({
            "id": 12,
            "role": "assistant",
            "content": "Hello!",
            "tokens_used": 0,
            "model_used": "llama-3.1-70b-versatile",
            "created_at": "2024-05-01T12:30:45.123456"
        }))
        .unwrap();

        assert_eq!(message.id, MessageId::Server(12));
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.content, "Hello!");
        assert_eq!(
            message.model_used.as_deref(),
            Some("llama-3.1-70b-versatile")
        );
        assert_eq!(message.created_at, datetime!(2024-05-01 12:30:45.123456 UTC));
    }

    #[test]
    fn placeholder_is_empty() {
        let message = ChatMessage::assistant_placeholder("local-2", "m");
        assert_eq!(message.id, MessageId::Local("local-2".to_string()));
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(message.content.is_empty());
    }

    #[test]
    fn local_id_serializes_as_string() {
        let message = ChatMessage::user("local-1", "hi");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["id"], json!("local-1"));
        assert_eq!(value["role"], json!("user"));
        assert!(value.get("model_used").is_none());
    }

    #[test]
    fn conversation_with_system_row_deserializes() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"id": 1, "role": "system", "content": "Be brief.", "tokens_used": 0,
             "model_used": null, "created_at": "2024-05-01T12:00:00"},
            {"id": 2, "role": "user", "content": "hi", "tokens_used": 0,
             "model_used": null, "created_at": "2024-05-01T12:00:01"}
        ]))
        .unwrap();
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[0].role.to_string(), "system");
        assert_eq!(messages[1].role, MessageRole::User);
    }
}
