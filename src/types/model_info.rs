use serde::{Deserialize, Serialize};

/// A model the backend can route chat turns to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Identifier to pass as `model` in a chat request.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Upstream provider, e.g. `groq`.
    pub provider: String,
    /// Short description.
    pub description: String,
    /// Largest `max_tokens` the model accepts.
    pub max_tokens: u32,
    /// Whether the model is available without a paid plan.
    pub is_free: bool,
}

/// Body of `GET /models` and `GET /models/free`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}
