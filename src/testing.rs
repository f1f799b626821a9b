//! In-memory fakes for the ports, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::{
    Completion, CompletionRequest, DomainError, ModelEndpoint, ProviderError, QuizQuestion,
    QuizRequest,
};
use crate::ports::{
    AudioCapture, AudioPlayback, BufferId, ClientFrame, HttpClient, HttpResponse, ModelClient,
    QuizBackend, RealtimeConnection, RealtimeTransport, ServerFrame, SessionSetup,
};

/// A text completion attributed to `model`.
pub fn completion(model: &str, text: &str) -> Completion {
    Completion {
        model: model.to_string(),
        text: Some(text.to_string()),
        json: None,
        inline_data: None,
    }
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

/// Model client that replays scripted results per endpoint id.
#[derive(Default)]
pub struct ScriptedModelClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<Completion, ProviderError>>>>,
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&self, model: &str, result: Result<Completion, ProviderError>) {
        self.scripts
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn push_ok(&self, model: &str, text: &str) {
        self.push_result(model, Ok(completion(model, text)));
    }

    pub fn push_err(&self, model: &str, error: ProviderError) {
        self.push_result(model, Err(error));
    }

    /// Endpoint ids in the order they were called.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        self.calls.lock().push(endpoint.id.clone());
        self.requests.lock().push(request.clone());
        self.scripts
            .lock()
            .get_mut(&endpoint.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ProviderError::from_http(503, None, "unscripted call")))
    }
}

/// A request seen by [`ScriptedHttpClient`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// HTTP client that returns queued responses in order.
#[derive(Default)]
pub struct ScriptedHttpClient {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: String) {
        self.responses.lock().push_back(HttpResponse { status, body });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<HttpResponse, DomainError> {
        self.requests.lock().push(RecordedRequest {
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            body: body.clone(),
        });
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| DomainError::HttpRequest("connection refused".to_string()))
    }

    fn is_allowed(&self, _url: &str) -> bool {
        true
    }
}

/// Quiz backend that always fails.
pub struct FailingQuizBackend {
    name: String,
    calls: AtomicUsize,
}

impl FailingQuizBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuizBackend for FailingQuizBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_generate(&self, _request: &QuizRequest) -> Result<Vec<QuizQuestion>, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DomainError::Provider {
            endpoint: self.name.clone(),
            source: ProviderError::from_http(429, None, "quota exceeded"),
        })
    }
}

/// Quiz backend that always returns the same questions.
pub struct FixedQuizBackend {
    name: String,
    questions: Vec<QuizQuestion>,
    calls: AtomicUsize,
}

impl FixedQuizBackend {
    pub fn new(name: &str, questions: Vec<QuizQuestion>) -> Self {
        Self {
            name: name.to_string(),
            questions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuizBackend for FixedQuizBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_generate(&self, _request: &QuizRequest) -> Result<Vec<QuizQuestion>, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.questions.clone())
    }
}

/// Microphone fed by the test.
#[derive(Default)]
pub struct ChannelCapture {
    sender: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    started_rate: Mutex<Option<u32>>,
    fail_next: AtomicBool,
}

impl ChannelCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn push_frame(&self, frame: Vec<f32>) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.try_send(frame);
        }
    }

    pub fn started_rate(&self) -> Option<u32> {
        *self.started_rate.lock()
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

#[async_trait]
impl AudioCapture for ChannelCapture {
    async fn start(&self, sample_rate: u32) -> Result<mpsc::Receiver<Vec<f32>>, DomainError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DomainError::AudioDevice {
                message: "microphone permission denied".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock() = Some(tx);
        *self.started_rate.lock() = Some(sample_rate);
        Ok(rx)
    }

    fn stop(&self) {
        self.sender.lock().take();
    }
}

/// One call to [`AudioPlayback::schedule`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,
    pub start: f64,
    pub samples: usize,
}

/// Playback whose clock only moves when the test says so.
#[derive(Default)]
pub struct ManualClockPlayback {
    now: Mutex<f64>,
    next_id: AtomicU64,
    opened_rate: Mutex<Option<u32>>,
    scheduled: Mutex<Vec<ScheduledBuffer>>,
    stopped: Mutex<Vec<BufferId>>,
    closed: AtomicBool,
}

impl ManualClockPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }

    pub fn opened_rate(&self) -> Option<u32> {
        *self.opened_rate.lock()
    }

    pub fn scheduled(&self) -> Vec<ScheduledBuffer> {
        self.scheduled.lock().clone()
    }

    pub fn stopped(&self) -> Vec<BufferId> {
        self.stopped.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioPlayback for ManualClockPlayback {
    async fn open(&self, sample_rate: u32) -> Result<(), DomainError> {
        *self.opened_rate.lock() = Some(sample_rate);
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn current_time(&self) -> f64 {
        *self.now.lock()
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<BufferId, DomainError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.scheduled.lock().push(ScheduledBuffer {
            id,
            start: start_at,
            samples: samples.len(),
        });
        Ok(id)
    }

    fn stop(&self, id: BufferId) {
        self.stopped.lock().push(id);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Realtime transport backed by in-process channels.
///
/// Server frames pushed before `connect` are delivered after it, so a test can
/// queue the setup acknowledgement up front.
pub struct ChannelTransport {
    server_tx: mpsc::Sender<ServerFrame>,
    server_rx: Mutex<Option<mpsc::Receiver<ServerFrame>>>,
    client_tx: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    client_rx: tokio::sync::Mutex<mpsc::Receiver<ClientFrame>>,
    setups: Mutex<Vec<SessionSetup>>,
    fail_next: AtomicBool,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        let (server_tx, server_rx) = mpsc::channel(64);
        let (client_tx, client_rx) = mpsc::channel(64);
        Self {
            server_tx,
            server_rx: Mutex::new(Some(server_rx)),
            client_tx: Mutex::new(Some(client_tx)),
            client_rx: tokio::sync::Mutex::new(client_rx),
            setups: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Deliver a frame as if the provider sent it. Ignored once the session let go.
    pub fn push(&self, frame: ServerFrame) {
        let _ = self.server_tx.try_send(frame);
    }

    pub fn setups(&self) -> Vec<SessionSetup> {
        self.setups.lock().clone()
    }

    /// Next frame the session sent.
    pub async fn next_client_frame(&self) -> ClientFrame {
        let mut rx = self.client_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client stream closed")
    }

    /// Whether every sender on the client stream has been dropped.
    pub async fn outbound_closed(&self) -> bool {
        let mut rx = self.client_rx.lock().await;
        loop {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }
}

#[async_trait]
impl RealtimeTransport for ChannelTransport {
    async fn connect(&self, setup: SessionSetup) -> Result<RealtimeConnection, DomainError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DomainError::Realtime("handshake refused".to_string()));
        }
        self.setups.lock().push(setup);

        let inbound = self
            .server_rx
            .lock()
            .take()
            .ok_or_else(|| DomainError::Realtime("transport already used".to_string()))?;
        let outbound = self
            .client_tx
            .lock()
            .take()
            .ok_or_else(|| DomainError::Realtime("transport already used".to_string()))?;
        Ok(RealtimeConnection { outbound, inbound })
    }
}
