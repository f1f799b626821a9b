use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::adapters::env_secrets::{ANTHROPIC_API_KEY, GROQ_API_KEY, OPENAI_API_KEY};
use crate::domain::config::ChatBackendConfig;
use crate::domain::quiz::parse_questions;
use crate::domain::{DomainError, ProviderError, QuizQuestion, QuizRequest};
use crate::ports::{HttpClient, HttpResponse, QuizBackend, SecretProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_SYSTEM_PROMPT: &str =
    "You are a UI/UX design expert creating quiz questions. Return only valid JSON arrays.";

/// Request and response shape of a chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatDialect {
    /// `POST {base}/chat/completions`, bearer auth, `choices[0].message.content`.
    OpenAi,
    /// `POST {base}/messages`, `x-api-key` auth, `content[0].text`.
    Anthropic,
}

/// Quiz backend over a hosted chat API.
pub struct ChatQuizBackend {
    name: String,
    dialect: ChatDialect,
    config: ChatBackendConfig,
    secret_name: &'static str,
    system_prompt: Option<&'static str>,
    http: Arc<dyn HttpClient>,
    secrets: Arc<dyn SecretProvider>,
}

impl ChatQuizBackend {
    /// OpenAI-compatible chat on Groq, single user turn.
    pub fn groq(config: ChatBackendConfig, http: Arc<dyn HttpClient>, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            name: "groq".to_string(),
            dialect: ChatDialect::OpenAi,
            config,
            secret_name: GROQ_API_KEY,
            system_prompt: None,
            http,
            secrets,
        }
    }

    /// OpenAI chat with a system turn.
    pub fn openai(config: ChatBackendConfig, http: Arc<dyn HttpClient>, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            name: "openai".to_string(),
            dialect: ChatDialect::OpenAi,
            config,
            secret_name: OPENAI_API_KEY,
            system_prompt: Some(OPENAI_SYSTEM_PROMPT),
            http,
            secrets,
        }
    }

    /// Anthropic messages API.
    pub fn anthropic(config: ChatBackendConfig, http: Arc<dyn HttpClient>, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            name: "anthropic".to_string(),
            dialect: ChatDialect::Anthropic,
            config,
            secret_name: ANTHROPIC_API_KEY,
            system_prompt: None,
            http,
            secrets,
        }
    }

    fn url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.dialect {
            ChatDialect::OpenAi => format!("{base}/chat/completions"),
            ChatDialect::Anthropic => format!("{base}/messages"),
        }
    }

    fn body(&self, prompt: &str) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = self.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let mut body = json!({ "model": self.config.model, "messages": messages });
        if let Some(t) = self.config.temperature {
            body["temperature"] = json!(t);
        }
        match (self.dialect, self.config.max_tokens) {
            (_, Some(n)) => body["max_tokens"] = json!(n),
            // The messages API refuses requests without a token limit.
            (ChatDialect::Anthropic, None) => body["max_tokens"] = json!(2048),
            (ChatDialect::OpenAi, None) => {}
        }
        body
    }

    fn headers(&self, key: &str) -> Vec<(&'static str, String)> {
        match self.dialect {
            ChatDialect::OpenAi => vec![("authorization", format!("Bearer {key}"))],
            ChatDialect::Anthropic => vec![
                ("x-api-key", key.to_string()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
        }
    }

    fn extract_text(&self, response: &HttpResponse) -> Result<String, ProviderError> {
        if !response.is_success() {
            let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
            let message = parsed
                .as_ref()
                .and_then(|v| v.pointer("/error/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| response.body.chars().take(300).collect());
            return Err(ProviderError::from_http(response.status, None, message));
        }

        let value: Value = serde_json::from_str(&response.body)
            .map_err(|e| ProviderError::malformed(format!("response is not JSON: {e}")))?;
        let pointer = match self.dialect {
            ChatDialect::OpenAi => "/choices/0/message/content",
            ChatDialect::Anthropic => "/content/0/text",
        };
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::empty(format!("no text at {pointer}")))
    }
}

#[async_trait]
impl QuizBackend for ChatQuizBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_generate(&self, request: &QuizRequest) -> Result<Vec<QuizQuestion>, DomainError> {
        let key = self
            .secrets
            .secret(self.secret_name)
            .ok_or_else(|| DomainError::MissingSecret(self.secret_name.to_string()))?;

        let headers = self.headers(key.expose());
        let response = self
            .http
            .post_json(&self.url(), &headers, &self.body(&request.prompt()))
            .await?;

        let text = self
            .extract_text(&response)
            .map_err(|source| DomainError::Provider {
                endpoint: self.name.clone(),
                source,
            })?;

        let questions = parse_questions(&text)?;
        debug!(backend = %self.name, questions = questions.len(), "Quiz generated");
        Ok(questions)
    }
}
