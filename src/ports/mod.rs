pub mod audio;
pub mod config;
pub mod http;
pub mod model;
pub mod quiz;
pub mod realtime;
pub mod secrets;

pub use audio::{AudioCapture, AudioPlayback, BufferId};
pub use config::ConfigStore;
pub use http::{HttpClient, HttpResponse};
pub use model::ModelClient;
pub use quiz::QuizBackend;
pub use realtime::{ClientFrame, RealtimeConnection, RealtimeTransport, ServerFrame, SessionSetup};
pub use secrets::{ApiKey, SecretProvider};
