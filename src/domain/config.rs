use serde::{Deserialize, Serialize};

use crate::domain::audio::AudioFormat;
use crate::domain::completion::ModelEndpoint;

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Enable file logging with rotation.
    pub file_logging: bool,
    /// Maximum number of log files to keep.
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: true,
            max_files: 7,
        }
    }
}

/// Outbound network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout for provider HTTP calls.
    pub request_timeout_secs: u64,
    /// Hosts the HTTP client may reach. Subdomains are allowed.
    pub allowed_domains: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            allowed_domains: Self::default_allowed_domains(),
        }
    }
}

impl NetworkConfig {
    /// Provider hosts the default configuration talks to.
    pub fn default_allowed_domains() -> Vec<String> {
        vec![
            "generativelanguage.googleapis.com".to_string(),
            "api.groq.com".to_string(),
            "api.openai.com".to_string(),
            "api.anthropic.com".to_string(),
        ]
    }
}

/// Completion routing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Base URL of the generative model API.
    pub base_url: String,
    /// Endpoint tried first until another one succeeds. Empty means the first endpoint.
    pub default_model: String,
    /// Endpoints in priority order.
    pub endpoints: Vec<ModelEndpoint>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            default_model: "gemini-2.5-flash".to_string(),
            endpoints: Self::default_endpoints(),
        }
    }
}

impl RouterConfig {
    pub fn default_endpoints() -> Vec<ModelEndpoint> {
        [
            "gemini-2.5-flash",
            "gemini-2.0-flash",
            "gemini-2.0-flash-exp",
            "gemini-2.5-pro",
            "gemini-flash-latest",
            "gemini-pro-latest",
        ]
        .into_iter()
        .map(ModelEndpoint::primary)
        .collect()
    }
}

/// One OpenAI-compatible or Anthropic-style chat backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatBackendConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Quiz backend configuration. Keys come from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizConfig {
    pub groq: ChatBackendConfig,
    pub openai: ChatBackendConfig,
    pub anthropic: ChatBackendConfig,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            groq: ChatBackendConfig {
                enabled: true,
                base_url: "https://api.groq.com/openai/v1".to_string(),
                model: "llama-3.3-70b-versatile".to_string(),
                temperature: Some(0.7),
                max_tokens: Some(4000),
            },
            openai: ChatBackendConfig {
                enabled: true,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: Some(0.7),
                max_tokens: None,
            },
            anthropic: ChatBackendConfig {
                enabled: true,
                base_url: "https://api.anthropic.com/v1".to_string(),
                model: "claude-3-haiku-20240307".to_string(),
                temperature: None,
                max_tokens: Some(2048),
            },
        }
    }
}

/// Live voice session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the bidirectional streaming API.
    pub url: String,
    pub model: String,
    /// Prebuilt voice name used when the caller does not pick one.
    pub voice: String,
    /// System instruction sent with the session setup.
    pub persona: String,
    #[serde(flatten)]
    pub audio: AudioFormat,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Fenrir".to_string(),
            persona: "You are a senior UI/UX designer assistant named Refyna. \
                You are helpful, concise, and focus on visual design, accessibility, and modern aesthetics. \
                Keep responses brief and conversational. \
                When the user shares a design, assume you are looking at it and provide specific \
                feedback on layout, color, and typography."
                .to_string(),
            audio: AudioFormat::default(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub network: NetworkConfig,
    pub router: RouterConfig,
    pub quiz: QuizConfig,
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    /// Create a new AppConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), crate::domain::DomainError> {
        use crate::domain::DomainError;

        if self.router.endpoints.is_empty() {
            return Err(DomainError::Config("router.endpoints is empty".to_string()));
        }
        let default_model = &self.router.default_model;
        if !default_model.is_empty() && !self.router.endpoints.iter().any(|e| &e.id == default_model) {
            return Err(DomainError::Config(format!(
                "router.default_model {} is not a configured endpoint",
                self.router.default_model
            )));
        }
        if self.realtime.audio.input_sample_rate == 0 || self.realtime.audio.output_sample_rate == 0 {
            return Err(DomainError::Config("sample rates must be non-zero".to_string()));
        }
        Ok(())
    }
}
