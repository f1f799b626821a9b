#[cfg(feature = "native-audio")]
pub mod audio_cpal;
pub mod config_store;
pub mod env_secrets;
pub mod gemini;
pub mod gemini_live;
pub mod http_client;
pub mod quiz_backends;

#[cfg(feature = "native-audio")]
pub use audio_cpal::{CpalCapture, CpalPlayback};
pub use config_store::TomlConfigStore;
pub use env_secrets::{EnvSecretProvider, StaticSecretProvider};
pub use gemini::GeminiClient;
pub use gemini_live::GeminiLiveTransport;
pub use http_client::GuardedHttpClient;
pub use quiz_backends::ChatQuizBackend;
