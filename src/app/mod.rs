pub mod controller;
pub mod quiz;
pub mod review;
pub mod router;
pub mod session;
pub mod static_bank;

pub use controller::AppController;
pub use quiz::{QuizGenerationPipeline, RouterQuizBackend};
pub use review::ReviewService;
pub use router::{CompletionRouter, RouteTarget};
pub use session::{MessageCallback, RealtimeAudioSession, StatusCallback};
pub use static_bank::StaticQuestionBank;
