use async_trait::async_trait;
use serde_json::Value;

use crate::domain::DomainError;

/// Raw provider response. Non-2xx statuses are returned, not raised.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client port for all network requests.
/// All provider traffic must go through this interface.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// POST a JSON body with extra headers.
    ///
    /// Errors are reserved for requests that never produced a response
    /// (blocked host, connect failure, timeout).
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<HttpResponse, DomainError>;

    /// Check whether a URL passes the egress allowlist.
    fn is_allowed(&self, url: &str) -> bool;
}
