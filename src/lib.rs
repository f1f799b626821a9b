#![forbid(unsafe_code)]

pub mod adapters;
pub mod app;
pub mod commands;
pub mod domain;
pub mod infrastructure;
pub mod ports;

#[cfg(test)]
pub mod testing;

pub use app::{
    AppController, CompletionRouter, QuizGenerationPipeline, RealtimeAudioSession, ReviewService,
    StaticQuestionBank,
};
pub use domain::{DomainError, SessionState};
