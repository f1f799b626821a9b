use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::domain::config::NetworkConfig;
use crate::domain::DomainError;
use crate::ports::{HttpClient, HttpResponse};

/// Egress-restricted HTTP client.
///
/// Every request is checked against a host allowlist before it leaves the
/// process. Subdomains of an allowed host pass.
pub struct GuardedHttpClient {
    client: Client,
    allowed_domains: RwLock<Vec<String>>,
}

impl GuardedHttpClient {
    pub fn new(config: &NetworkConfig) -> Result<Self, DomainError> {
        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(format!("Refyna/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DomainError::HttpRequest(format!("Failed to create HTTP client: {}", e)))?;

        debug!(
            allowed_domains = ?config.allowed_domains,
            timeout_secs = config.request_timeout_secs,
            "HTTP client initialized"
        );

        Ok(Self {
            client,
            allowed_domains: RwLock::new(config.allowed_domains.clone()),
        })
    }

    /// Replace the allowlist.
    pub fn set_allowed_domains(&self, domains: Vec<String>) {
        *self.allowed_domains.write() = domains;
    }

    fn check_url(&self, url: &str) -> Result<(), DomainError> {
        let parsed = Url::parse(url).map_err(|e| DomainError::HttpRequest(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| DomainError::HttpRequest("Invalid URL: no host".to_string()))?;

        let allowed = self.allowed_domains.read();
        if !allowed.iter().any(|d| host == d || host.ends_with(&format!(".{}", d))) {
            warn!(host = host, "Network request blocked: domain not in allowlist");
            return Err(DomainError::NetworkBlocked {
                reason: format!("Domain '{}' is not in the allowed list", host),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HttpClient for GuardedHttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<HttpResponse, DomainError> {
        self.check_url(url)?;

        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::HttpRequest(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| DomainError::HttpRequest(e.without_url().to_string()))?;

        debug!(status = status, bytes = body.len(), "HTTP response received");
        Ok(HttpResponse { status, body })
    }

    fn is_allowed(&self, url: &str) -> bool {
        self.check_url(url).is_ok()
    }
}
