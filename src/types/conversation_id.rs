use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier the backend assigns to a conversation once its first turn completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl ConversationId {
    /// Create a new `ConversationId`.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw numeric identifier.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ConversationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_as_bare_number() {
        assert_eq!(serde_json::to_value(ConversationId(7)).unwrap(), json!(7));
        let id: ConversationId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(id, ConversationId(42));
    }

    #[test]
    fn from_str() {
        assert_eq!(" 12 ".parse::<ConversationId>().unwrap(), ConversationId(12));
        assert!("twelve".parse::<ConversationId>().is_err());
    }
}
