use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::app::router::CompletionRouter;
use crate::app::static_bank::StaticQuestionBank;
use crate::domain::quiz::{fit_to_count, parse_questions};
use crate::domain::{
    CompletionRequest, DomainError, ProviderError, QuizLevel, QuizMode, QuizQuestion, QuizRequest,
};
use crate::ports::QuizBackend;

/// Quiz backend that asks the routed generative models.
pub struct RouterQuizBackend {
    router: Arc<CompletionRouter>,
}

impl RouterQuizBackend {
    pub fn new(router: Arc<CompletionRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl QuizBackend for RouterQuizBackend {
    fn name(&self) -> &str {
        "router"
    }

    async fn try_generate(&self, request: &QuizRequest) -> Result<Vec<QuizQuestion>, DomainError> {
        let completion = self
            .router
            .generate(&CompletionRequest::text(request.prompt()))
            .await?;
        let text = completion.text.ok_or_else(|| DomainError::Provider {
            endpoint: completion.model.clone(),
            source: ProviderError::empty("quiz response had no text"),
        })?;
        parse_questions(&text)
    }
}

/// Tries each quiz backend in order and falls back to the static bank.
pub struct QuizGenerationPipeline {
    backends: Vec<Arc<dyn QuizBackend>>,
    bank: StaticQuestionBank,
}

impl QuizGenerationPipeline {
    pub fn new(backends: Vec<Arc<dyn QuizBackend>>) -> Self {
        Self {
            backends,
            bank: StaticQuestionBank,
        }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Produce exactly `count` questions.
    ///
    /// Only `count == 0` is an error; every backend failure degrades to the next
    /// backend and finally to the authored questions.
    pub async fn generate_quiz(
        &self,
        topic: &str,
        level: QuizLevel,
        mode: QuizMode,
        count: usize,
    ) -> Result<Vec<QuizQuestion>, DomainError> {
        if count == 0 {
            return Err(DomainError::InvalidRequest(
                "quiz size must be at least 1".to_string(),
            ));
        }

        let request = QuizRequest::new(topic, level, mode, count);
        info!(topic = topic, level = %level, mode = %mode, count = count, "Generating quiz");

        for backend in &self.backends {
            match backend.try_generate(&request).await {
                Ok(questions) => {
                    info!(
                        backend = backend.name(),
                        generated = questions.len(),
                        "Quiz backend succeeded"
                    );
                    return Ok(fit_to_count(&questions, count));
                }
                Err(err) => {
                    warn!(backend = backend.name(), error = %err, "Quiz backend failed, trying next");
                }
            }
        }

        info!(topic = topic, "Using static fallback questions");
        Ok(self.bank.quiz(topic, count))
    }
}
