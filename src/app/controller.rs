use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::{
    ChatQuizBackend, EnvSecretProvider, GeminiClient, GeminiLiveTransport, GuardedHttpClient,
    TomlConfigStore,
};
use crate::app::quiz::{QuizGenerationPipeline, RouterQuizBackend};
use crate::app::review::ReviewService;
use crate::app::router::CompletionRouter;
use crate::app::session::RealtimeAudioSession;
use crate::domain::{AppConfig, DesignResource, DomainError};
use crate::infrastructure::init_logging;
use crate::ports::{AudioCapture, AudioPlayback, ConfigStore, QuizBackend, SecretProvider};

/// Owns configuration and the long-lived services built from it.
pub struct AppController {
    config: RwLock<AppConfig>,
    config_store: Arc<dyn ConfigStore>,
    http: Arc<GuardedHttpClient>,
    secrets: Arc<dyn SecretProvider>,
    router: Arc<CompletionRouter>,
    review: ReviewService,
    quiz: QuizGenerationPipeline,
    _log_guard: Option<WorkerGuard>,
}

impl AppController {
    /// Load configuration from the platform config directory, start logging
    /// and build the services. API keys come from the environment.
    pub fn new() -> Result<Self, DomainError> {
        let config_store: Arc<dyn ConfigStore> = Arc::new(TomlConfigStore::new()?);
        let config = config_store.load()?;
        let log_guard = init_logging(&config_store.logs_dir(), &config.logging)?;

        info!(version = env!("CARGO_PKG_VERSION"), "Refyna starting up");

        let mut controller = Self::with_services(config, config_store, Arc::new(EnvSecretProvider))?;
        controller._log_guard = log_guard;
        Ok(controller)
    }

    /// Build the services without touching global logging.
    pub fn with_services(
        config: AppConfig,
        config_store: Arc<dyn ConfigStore>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self, DomainError> {
        config.validate()?;
        let http = Arc::new(GuardedHttpClient::new(&config.network)?);

        let gemini = Arc::new(GeminiClient::new(
            http.clone(),
            Arc::clone(&secrets),
            config.router.base_url.clone(),
        ));
        let default_model = Some(config.router.default_model.as_str()).filter(|m| !m.is_empty());
        let router = Arc::new(CompletionRouter::with_client(
            config.router.endpoints.clone(),
            gemini,
            default_model,
        )?);

        let review = ReviewService::new(Arc::clone(&router));
        match config_store.load_resources() {
            Ok(resources) => review.set_resources(resources),
            Err(e) => warn!(error = %e, "Ignoring unreadable design resources"),
        }
        let quiz = QuizGenerationPipeline::new(quiz_backends(&config, &router, &http, &secrets));

        info!(
            endpoints = config.router.endpoints.len(),
            quiz_backends = ?quiz.backend_names(),
            "AppController initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            config_store,
            http,
            secrets,
            router,
            review,
            quiz,
            _log_guard: None,
        })
    }

    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Validate, persist and apply a new configuration.
    ///
    /// The egress allowlist applies immediately; model and backend changes take
    /// effect on the next start.
    pub fn update_config(&self, config: AppConfig) -> Result<(), DomainError> {
        config.validate()?;
        self.config_store.save(&config)?;
        self.http.set_allowed_domains(config.network.allowed_domains.clone());

        let previous = self.config.read().clone();
        if previous.router != config.router || previous.quiz != config.quiz {
            warn!("Model settings changed, restart to apply");
        }
        *self.config.write() = config;
        info!("Configuration updated");
        Ok(())
    }

    /// Replace the design resource library and persist it.
    pub fn save_resources(&self, resources: Vec<DesignResource>) -> Result<(), DomainError> {
        self.config_store.save_resources(&resources)?;
        self.review.set_resources(resources);
        Ok(())
    }

    pub fn router(&self) -> &CompletionRouter {
        &self.router
    }

    pub fn review(&self) -> &ReviewService {
        &self.review
    }

    pub fn quiz(&self) -> &QuizGenerationPipeline {
        &self.quiz
    }

    /// A new voice session over the configured realtime endpoint.
    pub fn realtime_session(
        &self,
        capture: Arc<dyn AudioCapture>,
        playback: Arc<dyn AudioPlayback>,
    ) -> RealtimeAudioSession {
        let config = self.config.read().realtime.clone();
        let transport = Arc::new(GeminiLiveTransport::new(
            config.url.clone(),
            self.http.clone(),
            Arc::clone(&self.secrets),
        ));
        RealtimeAudioSession::new(config, capture, playback, transport)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config_store.data_dir()
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.config_store.logs_dir()
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_store.config_path()
    }
}

/// Router first, then each enabled hosted chat backend.
fn quiz_backends(
    config: &AppConfig,
    router: &Arc<CompletionRouter>,
    http: &Arc<GuardedHttpClient>,
    secrets: &Arc<dyn SecretProvider>,
) -> Vec<Arc<dyn QuizBackend>> {
    let mut backends: Vec<Arc<dyn QuizBackend>> = vec![Arc::new(RouterQuizBackend::new(Arc::clone(router)))];
    let quiz = &config.quiz;
    if quiz.groq.enabled {
        backends.push(Arc::new(ChatQuizBackend::groq(quiz.groq.clone(), http.clone(), Arc::clone(secrets))));
    }
    if quiz.openai.enabled {
        backends.push(Arc::new(ChatQuizBackend::openai(quiz.openai.clone(), http.clone(), Arc::clone(secrets))));
    }
    if quiz.anthropic.enabled {
        backends.push(Arc::new(ChatQuizBackend::anthropic(
            quiz.anthropic.clone(),
            http.clone(),
            Arc::clone(secrets),
        )));
    }
    backends
}
