use serde::Deserialize;

use crate::types::ConversationId;

/// One decoded unit of the chat streaming protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A fragment of assistant text, appended in arrival order.
    Content(String),

    /// The turn completed; carries the conversation the turn was stored under.
    Done {
        /// Identifier of the conversation, assigned by the backend on the first turn.
        conversation_id: Option<ConversationId>,
    },

    /// The backend failed the turn after the stream had started.
    Error(String),
}

#[derive(Deserialize)]
struct FramePayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    error: Option<String>,
}

impl StreamFrame {
    /// Parse the JSON payload of one `data:` line.
    ///
    /// Returns `Ok(None)` for a well-formed object that matches none of the
    /// known shapes, and `Err` when the payload is not a JSON object of the
    /// expected field types.
    pub fn parse(payload: &str) -> Result<Option<Self>, serde_json::Error> {
        let payload: FramePayload = serde_json::from_str(payload)?;
        if let Some(message) = payload.error {
            return Ok(Some(StreamFrame::Error(message)));
        }
        if payload.done == Some(true) {
            return Ok(Some(StreamFrame::Done {
                conversation_id: payload.conversation_id,
            }));
        }
        Ok(payload.content.map(StreamFrame::Content))
    }

    /// Returns true if this frame settles the turn.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamFrame::Content(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_frame() {
        assert_eq!(
            StreamFrame::parse(r#"{"content":"hi"}"#).unwrap(),
            Some(StreamFrame::Content("hi".to_string()))
        );
    }

    #[test]
    fn done_frame() {
        assert_eq!(
            StreamFrame::parse(r#"{"done":true,"conversation_id":7}"#).unwrap(),
            Some(StreamFrame::Done {
                conversation_id: Some(ConversationId(7))
            })
        );
        assert_eq!(
            StreamFrame::parse(r#"{"done":true}"#).unwrap(),
            Some(StreamFrame::Done {
                conversation_id: None
            })
        );
    }

    #[test]
    fn error_frame() {
        let frame = StreamFrame::parse(r#"{"error":"upstream timed out"}"#).unwrap();
        assert_eq!(frame, Some(StreamFrame::Error("upstream timed out".to_string())));
        assert!(frame.unwrap().is_terminal());
    }

    #[test]
    fn unrecognized_but_well_formed() {
        assert_eq!(StreamFrame::parse(r#"{"usage":{"tokens":3}}"#).unwrap(), None);
        assert_eq!(StreamFrame::parse(r#"{"done":false}"#).unwrap(), None);
    }

    #[test]
    fn malformed_payloads() {
        assert!(StreamFrame::parse(r#"{"cont"#).is_err());
        assert!(StreamFrame::parse("[DONE]").is_err());
        assert!(StreamFrame::parse(r#"{"content":5}"#).is_err());
    }
}
