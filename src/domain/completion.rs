use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority slot of the provider that serves an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Primary,
    Secondary,
    Tertiary,
    Quaternary,
}

/// What an endpoint can consume or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Image,
    Audio,
}

/// A configured model endpoint. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// Model identifier (e.g., "gemini-2.5-flash").
    pub id: String,
    pub provider: Provider,
    #[serde(default = "ModelEndpoint::default_capabilities")]
    pub capabilities: Vec<Capability>,
}

impl ModelEndpoint {
    pub fn new(id: impl Into<String>, provider: Provider, capabilities: Vec<Capability>) -> Self {
        Self {
            id: id.into(),
            provider,
            capabilities,
        }
    }

    /// A text+image endpoint on the primary provider.
    pub fn primary(id: impl Into<String>) -> Self {
        Self::new(id, Provider::Primary, Self::default_capabilities())
    }

    fn default_capabilities() -> Vec<Capability> {
        vec![Capability::Text, Capability::Image]
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Binary payload with a declared media type, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Render as a `data:` URL for the UI.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One piece of a conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    Inline(InlineData),
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single turn of request content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// Requested image output shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOutput {
    pub aspect_ratio: String,
    /// "1K", "2K" or "4K".
    pub size: String,
}

/// Generation parameters. Every field is optional and omitted when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    /// Response format hint, e.g. "application/json".
    pub response_mime_type: Option<String>,
    /// Structured output schema (provider dialect).
    pub response_schema: Option<Value>,
    pub image_output: Option<ImageOutput>,
}

impl GenerationOptions {
    /// Whether the caller asked for a JSON body back.
    pub fn wants_json(&self) -> bool {
        self.response_mime_type.as_deref() == Some("application/json")
            || self.response_schema.is_some()
    }
}

/// A request routed to one of the configured endpoints.
///
/// Built once and then shared read-only across attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub contents: Vec<Content>,
    pub system_instruction: Option<String>,
    pub options: GenerationOptions,
}

impl CompletionRequest {
    /// A single user turn with one text part.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self::from_parts(vec![Part::Text(prompt.into())])
    }

    /// A single user turn made of `parts`.
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self {
            contents: vec![Content {
                role: Role::User,
                parts,
            }],
            system_instruction: None,
            options: GenerationOptions::default(),
        }
    }

    /// A multi-turn conversation.
    pub fn conversation(contents: Vec<Content>) -> Self {
        Self {
            contents,
            system_instruction: None,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether any part carries a binary attachment.
    pub fn has_attachment(&self) -> bool {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .any(|p| matches!(p, Part::Inline(_)))
    }
}

/// Successful completion from one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    /// Endpoint that produced this result.
    pub model: String,
    pub text: Option<String>,
    /// Parsed body when JSON output was requested.
    pub json: Option<Value>,
    pub inline_data: Option<InlineData>,
}

impl Completion {
    /// Whether the result carries anything a caller can use.
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty()) || self.inline_data.is_some()
    }
}
