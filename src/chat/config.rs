//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::credentials::FileCredentialStore;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "llama-3.1-70b-versatile";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default maximum tokens per response.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Temperatures the backend accepts.
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;

/// Response lengths the backend accepts.
pub const MAX_TOKENS_RANGE: RangeInclusive<u32> = 1..=8192;

/// Command-line arguments for the zerox-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: llama-3.1-70b-versatile)", "MODEL")]
    pub model: Option<String>,

    /// Sampling temperature.
    #[arrrg(optional, "Sampling temperature, 0 to 2 (default: 0.7)", "TEMPERATURE")]
    pub temperature: Option<f32>,

    /// Maximum tokens per response.
    #[arrrg(optional, "Max tokens per response (default: 4096)", "TOKENS")]
    pub max_tokens: Option<u32>,

    /// Backend base URL.
    #[arrrg(optional, "API base URL (default: $ZEROX_BASE_URL or http://localhost:8000/api/v1/)", "URL")]
    pub base_url: Option<String>,

    /// Where the credential pair is kept between runs.
    #[arrrg(optional, "Credential file (default: <config dir>/zerox/credentials.json)", "PATH")]
    pub credentials: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

// `arrrg::CommandLine` requires `Eq`; `f32` prevents deriving it.
impl Eq for ChatArgs {}

impl ChatArgs {
    /// The credential file to use: the explicit path, else the per-user default.
    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.credentials
            .as_ref()
            .map(PathBuf::from)
            .or_else(FileCredentialStore::default_path)
    }
}

/// Configuration for a chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Maximum tokens per response.
    pub max_tokens: u32,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: llama-3.1-70b-versatile
    /// - Temperature: 0.7
    /// - Max tokens: 4096
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            use_color: true,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the sampling temperature, clamped to the accepted range.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
        self
    }

    /// Sets the maximum tokens per response, clamped to the accepted range.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.clamp(*MAX_TOKENS_RANGE.start(), *MAX_TOKENS_RANGE.end());
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&ChatArgs> for ChatConfig {
    fn from(args: &ChatArgs) -> Self {
        let mut config = ChatConfig::new();
        if let Some(model) = &args.model {
            config = config.with_model(model.clone());
        }
        if let Some(temperature) = args.temperature {
            config = config.with_temperature(temperature);
        }
        if let Some(max_tokens) = args.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }
        if args.no_color {
            config = config.without_color();
        }
        config
    }
}
