use std::collections::HashMap;

use crate::ports::{ApiKey, SecretProvider};

pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const GROQ_API_KEY: &str = "GROQ_API_KEY";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

/// Reads API keys from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn secret(&self, name: &str) -> Option<ApiKey> {
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(ApiKey::new)
    }
}

/// Fixed in-memory secrets, for tests and embedding.
#[derive(Debug, Default)]
pub struct StaticSecretProvider {
    secrets: HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn new<I, K, V>(secrets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: secrets
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SecretProvider for StaticSecretProvider {
    fn secret(&self, name: &str) -> Option<ApiKey> {
        self.secrets
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| ApiKey::new(v.as_str()))
    }
}
