pub mod audio;
pub mod completion;
pub mod config;
pub mod error;
pub mod quiz;
pub mod review;
pub mod session;

pub use audio::AudioFormat;
pub use completion::{
    Capability, Completion, CompletionRequest, Content, GenerationOptions, ImageOutput, InlineData,
    ModelEndpoint, Part, Provider, Role,
};
pub use config::AppConfig;
pub use error::{DomainError, FailedAttempt, FailureKind, ProviderError};
pub use quiz::{QuizLevel, QuizMode, QuizQuestion, QuizRequest};
pub use review::{
    Annotation, ChatMessage, ChatRole, DesignAnalysis, DesignResource, FeedbackRating, UserFeedback,
};
pub use session::{AtomicSessionState, SessionState};
