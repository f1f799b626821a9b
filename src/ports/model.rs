use async_trait::async_trait;

use crate::domain::{Completion, CompletionRequest, ModelEndpoint, ProviderError};

/// A generative model API that can serve configured endpoints.
///
/// Every failure must be classified into a [`ProviderError`]; the router
/// decides what to do next purely from its kind.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError>;
}
