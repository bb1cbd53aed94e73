use serde::{Deserialize, Serialize};

use crate::types::TokenResponse;

/// The access and refresh credentials issued together by the backend.
///
/// The two halves are always stored and cleared together; nothing in this
/// crate updates one without the other.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived token attached to every authenticated call.
    pub access: String,

    /// Longer-lived token exchanged for a fresh pair when `access` expires.
    pub refresh: String,
}

impl CredentialPair {
    /// Create a new `CredentialPair`.
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    /// The value of the `Authorization` header for this pair.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access)
    }
}

impl From<&TokenResponse> for CredentialPair {
    fn from(tokens: &TokenResponse) -> Self {
        Self::new(tokens.access_token.clone(), tokens.refresh_token.clone())
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}
