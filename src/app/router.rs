use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::domain::{
    Completion, CompletionRequest, DomainError, FailedAttempt, ModelEndpoint, ProviderError,
};
use crate::ports::ModelClient;

/// A configured endpoint and the client that serves it.
#[derive(Clone)]
pub struct RouteTarget {
    pub endpoint: ModelEndpoint,
    pub client: Arc<dyn ModelClient>,
}

impl RouteTarget {
    pub fn new(endpoint: ModelEndpoint, client: Arc<dyn ModelClient>) -> Self {
        Self { endpoint, client }
    }
}

/// Routes completion requests across model endpoints with a sticky preference.
///
/// The endpoint that last succeeded is tried first on the next call; the rest
/// follow in configured order. Concurrent calls share the sticky field and the
/// last success wins.
pub struct CompletionRouter {
    targets: Vec<RouteTarget>,
    sticky: RwLock<String>,
}

impl CompletionRouter {
    /// Build a router over `targets` in priority order.
    ///
    /// `default_model` seeds the sticky choice; when absent or unknown the first
    /// target is used. Duplicate endpoint ids keep their first position.
    pub fn new(targets: Vec<RouteTarget>, default_model: Option<&str>) -> Result<Self, DomainError> {
        let mut seen = HashSet::new();
        let targets: Vec<RouteTarget> = targets
            .into_iter()
            .filter(|t| {
                let fresh = seen.insert(t.endpoint.id.clone());
                if !fresh {
                    warn!(model = %t.endpoint.id, "Duplicate endpoint ignored");
                }
                fresh
            })
            .collect();

        let first = targets
            .first()
            .ok_or_else(|| DomainError::Config("No model endpoints configured".to_string()))?;

        let sticky = match default_model {
            Some(id) if targets.iter().any(|t| t.endpoint.id == id) => id.to_string(),
            Some(id) => {
                warn!(model = id, fallback = %first.endpoint.id, "Default model is not configured");
                first.endpoint.id.clone()
            }
            None => first.endpoint.id.clone(),
        };

        info!(
            endpoints = targets.len(),
            sticky = %sticky,
            "CompletionRouter initialized"
        );

        Ok(Self {
            targets,
            sticky: RwLock::new(sticky),
        })
    }

    /// All endpoints served by one client.
    pub fn with_client(
        endpoints: Vec<ModelEndpoint>,
        client: Arc<dyn ModelClient>,
        default_model: Option<&str>,
    ) -> Result<Self, DomainError> {
        let targets = endpoints
            .into_iter()
            .map(|endpoint| RouteTarget::new(endpoint, Arc::clone(&client)))
            .collect();
        Self::new(targets, default_model)
    }

    /// Id of the endpoint that will be tried first.
    pub fn sticky_model(&self) -> String {
        self.sticky.read().clone()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ModelEndpoint> {
        self.targets.iter().map(|t| &t.endpoint)
    }

    /// Sticky target first, then the others in configured order.
    fn candidates(&self) -> Vec<&RouteTarget> {
        let sticky = self.sticky.read().clone();
        let mut ordered = Vec::with_capacity(self.targets.len());
        ordered.extend(self.targets.iter().filter(|t| t.endpoint.id == sticky));
        ordered.extend(self.targets.iter().filter(|t| t.endpoint.id != sticky));
        ordered
    }

    /// Run `request` against the candidates until one succeeds.
    ///
    /// Transient failures move on to the next candidate. A fatal failure stops
    /// routing and is returned as is. When every candidate fails the error
    /// carries all recorded attempts.
    pub async fn generate(&self, request: &CompletionRequest) -> Result<Completion, DomainError> {
        let candidates = self.candidates();
        let mut attempts = Vec::with_capacity(candidates.len());

        for (attempt, target) in candidates.into_iter().enumerate() {
            let model = &target.endpoint.id;
            debug!(model = %model, attempt = attempt + 1, "Trying model");

            let result = target
                .client
                .complete(&target.endpoint, request)
                .await
                .and_then(|completion| {
                    if completion.has_content() {
                        Ok(completion)
                    } else {
                        Err(ProviderError::empty("response carried no content"))
                    }
                });

            match result {
                Ok(completion) => {
                    *self.sticky.write() = model.clone();
                    info!(model = %model, attempt = attempt + 1, "Completion succeeded");
                    return Ok(completion);
                }
                Err(err) if err.is_fatal() => {
                    error!(
                        model = %model,
                        kind = %err.kind,
                        status = ?err.status,
                        "Fatal provider failure, aborting"
                    );
                    return Err(DomainError::Provider {
                        endpoint: model.clone(),
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(
                        model = %model,
                        attempt = attempt + 1,
                        kind = %err.kind,
                        status = ?err.status,
                        error = %err.message,
                        "Model failed, switching to backup"
                    );
                    attempts.push(FailedAttempt {
                        endpoint: model.clone(),
                        error: err,
                    });
                }
            }
        }

        error!(attempts = attempts.len(), "All model endpoints failed");
        Err(DomainError::AllBackendsExhausted { attempts })
    }
}
