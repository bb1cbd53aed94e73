use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The authenticated account, from `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Account identifier.
    pub id: i64,
    /// Email address.
    pub email: String,
    /// Unique username.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Account role (`user`, `premium`, `admin`); governs the daily message limit.
    pub role: String,
    /// Whether the account may log in.
    pub is_active: bool,
    /// Whether the email was verified.
    #[serde(default)]
    pub is_verified: bool,
    /// Account creation time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
    /// Messages sent today.
    #[serde(default)]
    pub daily_messages: i64,
    /// Messages sent overall.
    #[serde(default)]
    pub total_messages: i64,
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Body of `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Credential pair returned by login, registration, and refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// New access credential.
    pub access_token: String,
    /// New refresh credential.
    pub refresh_token: String,
    /// Always `bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// The account the tokens were issued for.
    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_response_with_user() {
        let tokens: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "token_type": "bearer",
            "user": {
                "id": 1,
                "email": "ada@example.com",
                "username": "ada",
                "full_name": null,
                "avatar_url": null,
                "role": "premium",
                "is_active": true,
                "is_verified": false,
                "created_at": "2024-01-01T00:00:00",
                "daily_messages": 3,
                "total_messages": 40
            }
        }))
        .unwrap();
        let user = tokens.user.unwrap();
        assert_eq!(user.username, "ada");
        assert_eq!(user.role, "premium");
        assert_eq!(user.daily_messages, 3);
    }

    #[test]
    fn register_omits_missing_name() {
        let body = RegisterRequest {
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
            password: "correct horse".to_string(),
            full_name: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("full_name").is_none());
    }
}
