use async_trait::async_trait;

use crate::domain::{DomainError, QuizQuestion, QuizRequest};

/// One source of generated quiz questions.
#[async_trait]
pub trait QuizBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Produce validated questions or fail. Failures fall through to the next backend.
    async fn try_generate(&self, request: &QuizRequest) -> Result<Vec<QuizQuestion>, DomainError>;
}
