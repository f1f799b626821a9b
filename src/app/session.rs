use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::domain::audio::{decode_pcm16_base64, duration_secs, encode_pcm16_base64, split_data_url};
use crate::domain::config::RealtimeConfig;
use crate::domain::{AtomicSessionState, DomainError, SessionState};
use crate::ports::{
    AudioCapture, AudioPlayback, BufferId, ClientFrame, RealtimeConnection, RealtimeTransport,
    ServerFrame, SessionSetup,
};

/// Receives transcript text and whether the user said it.
pub type MessageCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Receives `true` when the session opens and `false` when it ends on its own.
pub type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Output clock bookkeeping.
#[derive(Debug, Default)]
struct PlaybackQueue {
    /// Where the next chunk starts on the playback clock.
    next_start: f64,
    /// Buffers that have not finished yet, with their end times.
    in_flight: HashMap<BufferId, f64>,
}

/// State shared between the session handle and its background tasks.
struct Shared {
    state: AtomicSessionState,
    capture: Arc<dyn AudioCapture>,
    playback: Arc<dyn AudioPlayback>,
    output_sample_rate: u32,
    queue: Mutex<PlaybackQueue>,
    outbound: Mutex<Option<mpsc::Sender<ClientFrame>>>,
}

impl Shared {
    /// Decode one audio chunk and place it right after what is already queued.
    fn schedule_chunk(&self, data: &str) -> Result<(), DomainError> {
        let samples = decode_pcm16_base64(data)?;
        if samples.is_empty() {
            return Ok(());
        }
        let duration = duration_secs(samples.len(), self.output_sample_rate);

        let mut queue = self.queue.lock();
        let now = self.playback.current_time();
        queue.in_flight.retain(|_, end| *end > now);

        let start = queue.next_start.max(now);
        let id = self.playback.schedule(samples, start)?;
        queue.in_flight.insert(id, start + duration);
        queue.next_start = start + duration;

        trace!(buffer = id, start = start, duration = duration, "Audio chunk scheduled");
        Ok(())
    }

    /// Drop everything queued and restart the output clock.
    fn interrupt(&self) {
        let mut queue = self.queue.lock();
        let stopped = queue.in_flight.len();
        for (id, _) in queue.in_flight.drain() {
            self.playback.stop(id);
        }
        queue.next_start = 0.0;
        debug!(stopped = stopped, "Playback interrupted");
    }

    /// Release devices and the transport. Safe to call repeatedly.
    fn release(&self) {
        self.capture.stop();
        self.interrupt();
        self.playback.close();
        self.outbound.lock().take();
    }
}

/// A live voice conversation with a speech model.
///
/// The session is single use: once Closed it stays Closed.
pub struct RealtimeAudioSession {
    config: RealtimeConfig,
    transport: Arc<dyn RealtimeTransport>,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closing: watch::Sender<bool>,
}

impl RealtimeAudioSession {
    pub fn new(
        config: RealtimeConfig,
        capture: Arc<dyn AudioCapture>,
        playback: Arc<dyn AudioPlayback>,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: AtomicSessionState::default(),
            capture,
            playback,
            output_sample_rate: config.audio.output_sample_rate,
            queue: Mutex::new(PlaybackQueue::default()),
            outbound: Mutex::new(None),
        });
        let (closing, _) = watch::channel(false);
        Self {
            config,
            transport,
            shared,
            tasks: Mutex::new(Vec::new()),
            closing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.load()
    }

    /// Playback clock time where the next audio chunk will start.
    pub fn next_playback_time(&self) -> f64 {
        self.shared.queue.lock().next_start
    }

    /// Number of scheduled buffers that have not been released yet.
    pub fn in_flight_buffers(&self) -> usize {
        self.shared.queue.lock().in_flight.len()
    }

    /// Open the microphone, the speakers and the model stream.
    ///
    /// Only a device failure is returned as an error. A transport or handshake
    /// failure is reported through `on_status(false)` and leaves the session
    /// Closed.
    pub async fn connect(
        &self,
        on_message: MessageCallback,
        on_status: StatusCallback,
        voice: Option<&str>,
    ) -> Result<(), DomainError> {
        if !self
            .shared
            .state
            .compare_exchange(SessionState::Idle, SessionState::Connecting)
        {
            return Err(DomainError::SessionStateTransition {
                from: self.state(),
                to: SessionState::Connecting,
            });
        }
        let mut closing = self.closing.subscribe();
        let audio = self.config.audio;

        let frames = match self.shared.capture.start(audio.input_sample_rate).await {
            Ok(frames) => frames,
            Err(err) => {
                error!(error = %err, "Microphone unavailable");
                self.abandon(&on_status);
                return Err(err);
            }
        };

        if let Err(err) = self.shared.playback.open(audio.output_sample_rate).await {
            error!(error = %err, "Audio output unavailable");
            self.abandon(&on_status);
            return Err(err);
        }

        let voice = voice.unwrap_or(&self.config.voice).to_string();
        let setup = SessionSetup {
            model: self.config.model.clone(),
            voice: voice.clone(),
            system_instruction: self.config.persona.clone(),
        };

        let connected = tokio::select! {
            result = self.transport.connect(setup) => result,
            _ = closing.wait_for(|c| *c) => Err(DomainError::Realtime("disconnected while connecting".to_string())),
        };
        let RealtimeConnection { outbound, mut inbound } = match connected {
            Ok(connection) => connection,
            Err(err) => {
                warn!(error = %err, "Realtime connection failed");
                self.abandon(&on_status);
                return Ok(());
            }
        };

        let acknowledged = tokio::select! {
            ack = wait_for_setup(&mut inbound) => ack,
            _ = closing.wait_for(|c| *c) => Err("disconnected while connecting".to_string()),
        };
        if let Err(reason) = acknowledged {
            warn!(reason = %reason, "Realtime session setup was not acknowledged");
            self.abandon(&on_status);
            return Ok(());
        }

        let mut tasks = self.tasks.lock();
        if !self
            .shared
            .state
            .compare_exchange(SessionState::Connecting, SessionState::Open)
        {
            debug!("Session closed during handshake");
            drop(tasks);
            self.shared.release();
            return Ok(());
        }

        *self.shared.outbound.lock() = Some(outbound.clone());
        info!(model = %self.config.model, voice = %voice, "Realtime session open");
        on_status(true);

        tasks.push(tokio::spawn(capture_loop(
            frames,
            outbound,
            audio.input_mime_type(),
        )));
        tasks.push(tokio::spawn(inbound_loop(
            Arc::clone(&self.shared),
            inbound,
            on_message,
            on_status,
        )));
        Ok(())
    }

    /// Send a still image into the conversation. Ignored unless Open.
    ///
    /// Accepts bare base64 or a `data:` URL; the MIME type defaults to JPEG.
    pub async fn send_image(&self, payload: &str) {
        if !self.state().is_open() {
            debug!("Session not open, image dropped");
            return;
        }
        let Some(sender) = self.shared.outbound.lock().clone() else {
            return;
        };

        let (mime, data) = split_data_url(payload);
        let frame = ClientFrame::Media {
            mime_type: mime.unwrap_or(DEFAULT_IMAGE_MIME).to_string(),
            data: data.to_string(),
        };
        if sender.send(frame).await.is_err() {
            debug!("Transport closed, image dropped");
        }
    }

    /// Tear the session down. Safe from any state and safe to repeat.
    ///
    /// When this returns no background task is running and no callback will
    /// fire again.
    pub async fn disconnect(&self) {
        let previous = self.shared.state.swap(SessionState::Closed);
        self.closing.send_replace(true);

        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(error = %err, "Session task panicked");
                }
            }
        }

        self.shared.release();
        if previous != SessionState::Closed {
            info!(from = ?previous, "Realtime session disconnected");
        }
    }

    /// Give up a connection attempt that never opened.
    fn abandon(&self, on_status: &StatusCallback) {
        self.shared.release();
        if self
            .shared
            .state
            .compare_exchange(SessionState::Connecting, SessionState::Closed)
        {
            on_status(false);
        }
    }
}

impl Drop for RealtimeAudioSession {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
        if self.shared.state.swap(SessionState::Closed) != SessionState::Closed {
            self.shared.release();
        }
    }
}

/// Wait for the provider to accept the setup message.
async fn wait_for_setup(inbound: &mut mpsc::Receiver<ServerFrame>) -> Result<(), String> {
    loop {
        match inbound.recv().await {
            Some(ServerFrame::SetupComplete) => return Ok(()),
            Some(ServerFrame::Closed { reason }) => return Err(reason),
            Some(other) => trace!(frame = ?other, "Frame before setup acknowledgement ignored"),
            None => return Err("stream ended before setup acknowledgement".to_string()),
        }
    }
}

/// Forward microphone frames as PCM16 chunks without waiting on the network.
async fn capture_loop(
    mut frames: mpsc::Receiver<Vec<f32>>,
    outbound: mpsc::Sender<ClientFrame>,
    mime_type: String,
) {
    let mut dropped = 0u64;
    while let Some(frame) = frames.recv().await {
        let chunk = ClientFrame::Media {
            mime_type: mime_type.clone(),
            data: encode_pcm16_base64(&frame),
        };
        match outbound.try_send(chunk) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                dropped += 1;
                if dropped % 50 == 1 {
                    warn!(dropped = dropped, "Outbound audio backlog, dropping frames");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
    debug!("Capture loop finished");
}

/// Handle provider frames strictly in arrival order.
async fn inbound_loop(
    shared: Arc<Shared>,
    mut inbound: mpsc::Receiver<ServerFrame>,
    on_message: MessageCallback,
    on_status: StatusCallback,
) {
    let reason = loop {
        match inbound.recv().await {
            Some(ServerFrame::Audio { data }) => {
                if let Err(err) = shared.schedule_chunk(&data) {
                    warn!(error = %err, "Dropping undecodable audio chunk");
                }
            }
            Some(ServerFrame::Interrupted) => shared.interrupt(),
            Some(ServerFrame::Transcript { text, is_user }) => on_message(&text, is_user),
            Some(ServerFrame::TurnComplete) => trace!("Model turn complete"),
            Some(ServerFrame::SetupComplete) => {}
            Some(ServerFrame::Closed { reason }) => break reason,
            None => break "stream ended".to_string(),
        }
    };

    if shared
        .state
        .compare_exchange(SessionState::Open, SessionState::Closed)
    {
        info!(reason = %reason, "Realtime session closed by provider");
        shared.release();
        on_status(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::encode_pcm16_base64;
    use crate::testing::{eventually, ChannelCapture, ChannelTransport, ManualClockPlayback};

    struct Harness {
        session: RealtimeAudioSession,
        capture: Arc<ChannelCapture>,
        playback: Arc<ManualClockPlayback>,
        transport: Arc<ChannelTransport>,
        messages: Arc<Mutex<Vec<(String, bool)>>>,
        statuses: Arc<Mutex<Vec<bool>>>,
    }

    impl Harness {
        fn new() -> Self {
            let capture = Arc::new(ChannelCapture::new());
            let playback = Arc::new(ManualClockPlayback::new());
            let transport = Arc::new(ChannelTransport::new());
            let session = RealtimeAudioSession::new(
                RealtimeConfig::default(),
                capture.clone(),
                playback.clone(),
                transport.clone(),
            );
            Self {
                session,
                capture,
                playback,
                transport,
                messages: Arc::new(Mutex::new(Vec::new())),
                statuses: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn callbacks(&self) -> (MessageCallback, StatusCallback) {
            let messages = Arc::clone(&self.messages);
            let statuses = Arc::clone(&self.statuses);
            let on_message: MessageCallback =
                Arc::new(move |text: &str, is_user: bool| messages.lock().push((text.to_string(), is_user)));
            let on_status: StatusCallback = Arc::new(move |open: bool| statuses.lock().push(open));
            (on_message, on_status)
        }

        async fn open(&self) {
            self.transport.push(ServerFrame::SetupComplete);
            let (on_message, on_status) = self.callbacks();
            self.session.connect(on_message, on_status, None).await.unwrap();
            assert_eq!(self.session.state(), SessionState::Open);
        }
    }

    /// `seconds` of silence at 24 kHz.
    fn chunk(seconds: f64) -> ServerFrame {
        let samples = vec![0.0f32; (24_000.0 * seconds) as usize];
        ServerFrame::Audio {
            data: encode_pcm16_base64(&samples),
        }
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        let h = Harness::new();
        h.session.disconnect().await;
        h.session.disconnect().await;
        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(h.statuses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connect_sends_setup_and_opens() {
        let h = Harness::new();
        h.open().await;

        assert_eq!(*h.statuses.lock(), vec![true]);
        let setup = h.transport.setups().pop().unwrap();
        assert_eq!(setup.voice, "Fenrir");
        assert_eq!(setup.model, "gemini-2.5-flash-native-audio-preview-09-2025");
        assert!(setup.system_instruction.contains("Refyna"));
        assert_eq!(h.capture.started_rate(), Some(16_000));
        assert_eq!(h.playback.opened_rate(), Some(24_000));
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let h = Harness::new();
        h.open().await;
        let (on_message, on_status) = h.callbacks();
        let err = h.session.connect(on_message, on_status, None).await.unwrap_err();
        assert!(matches!(err, DomainError::SessionStateTransition { from: SessionState::Open, .. }));
    }

    #[tokio::test]
    async fn test_microphone_failure_is_returned() {
        let h = Harness::new();
        h.capture.fail_next_start();
        let (on_message, on_status) = h.callbacks();

        let err = h.session.connect(on_message, on_status, None).await.unwrap_err();
        assert!(matches!(err, DomainError::AudioDevice { .. }));
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(*h.statuses.lock(), vec![false]);
        assert!(h.transport.setups().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_reports_status_only() {
        let h = Harness::new();
        h.transport.fail_next_connect();
        let (on_message, on_status) = h.callbacks();

        h.session.connect(on_message, on_status, Some("Puck")).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(*h.statuses.lock(), vec![false]);
        assert!(!h.capture.is_running());
        assert!(h.playback.is_closed());
    }

    #[tokio::test]
    async fn test_handshake_rejection_closes() {
        let h = Harness::new();
        h.transport.push(ServerFrame::Closed {
            reason: "invalid model".to_string(),
        });
        let (on_message, on_status) = h.callbacks();

        h.session.connect(on_message, on_status, None).await.unwrap();
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(*h.statuses.lock(), vec![false]);
    }

    #[tokio::test]
    async fn test_captured_audio_is_streamed_as_pcm16() {
        let h = Harness::new();
        h.open().await;

        h.capture.push_frame(vec![1.0, -1.0]);
        let frame = h.transport.next_client_frame().await;
        assert_eq!(
            frame,
            ClientFrame::Media {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: encode_pcm16_base64(&[1.0, -1.0]),
            }
        );
    }

    #[tokio::test]
    async fn test_chunks_are_scheduled_back_to_back() {
        let h = Harness::new();
        h.open().await;
        h.playback.set_time(1.0);

        h.transport.push(chunk(0.5));
        h.transport.push(chunk(0.25));
        h.transport.push(chunk(0.5));
        eventually(|| h.playback.scheduled().len() == 3).await;

        let scheduled = h.playback.scheduled();
        assert!((scheduled[0].start - 1.0).abs() < 1e-9);
        assert!(scheduled[1].start >= scheduled[0].start + 0.5 - 1e-9);
        assert!(scheduled[2].start >= scheduled[1].start + 0.25 - 1e-9);
        assert!((h.session.next_playback_time() - 2.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_late_chunk_starts_at_current_time() {
        let h = Harness::new();
        h.open().await;

        h.transport.push(chunk(0.5));
        eventually(|| h.playback.scheduled().len() == 1).await;

        h.playback.set_time(3.0);
        h.transport.push(chunk(0.5));
        eventually(|| h.playback.scheduled().len() == 2).await;

        assert!((h.playback.scheduled()[1].start - 3.0).abs() < 1e-9);
        // The first buffer ended before the second was scheduled.
        assert_eq!(h.session.in_flight_buffers(), 1);
    }

    #[tokio::test]
    async fn test_interruption_stops_everything_and_resets_clock() {
        let h = Harness::new();
        h.open().await;

        for _ in 0..3 {
            h.transport.push(chunk(1.0));
        }
        eventually(|| h.playback.scheduled().len() == 3).await;
        assert_eq!(h.session.in_flight_buffers(), 3);

        h.transport.push(ServerFrame::Interrupted);
        eventually(|| h.playback.stopped().len() == 3).await;
        assert_eq!(h.session.in_flight_buffers(), 0);
        assert_eq!(h.session.next_playback_time(), 0.0);

        let mut stopped = h.playback.stopped();
        stopped.sort_unstable();
        let mut ids: Vec<_> = h.playback.scheduled().iter().map(|b| b.id).collect();
        ids.sort_unstable();
        assert_eq!(stopped, ids);

        h.playback.set_time(4.2);
        h.transport.push(chunk(0.5));
        eventually(|| h.playback.scheduled().len() == 4).await;
        assert!((h.playback.scheduled()[3].start - 4.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_transcripts_reach_callback() {
        let h = Harness::new();
        h.open().await;

        h.transport.push(ServerFrame::Transcript {
            text: "make the button bigger?".to_string(),
            is_user: true,
        });
        h.transport.push(ServerFrame::Transcript {
            text: "Yes, aim for 44 pixels.".to_string(),
            is_user: false,
        });
        eventually(|| h.messages.lock().len() == 2).await;
        assert_eq!(
            *h.messages.lock(),
            vec![
                ("make the button bigger?".to_string(), true),
                ("Yes, aim for 44 pixels.".to_string(), false)
            ]
        );
    }

    #[tokio::test]
    async fn test_send_image_strips_data_url() {
        let h = Harness::new();
        h.session.send_image("AAAA").await;
        h.open().await;

        h.session.send_image("data:image/png;base64,iVBOR").await;
        h.session.send_image("/9j/4AAQ").await;
        assert_eq!(
            h.transport.next_client_frame().await,
            ClientFrame::Media {
                mime_type: "image/png".to_string(),
                data: "iVBOR".to_string()
            }
        );
        assert_eq!(
            h.transport.next_client_frame().await,
            ClientFrame::Media {
                mime_type: "image/jpeg".to_string(),
                data: "/9j/4AAQ".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_provider_close_releases_and_reports() {
        let h = Harness::new();
        h.open().await;
        h.transport.push(chunk(1.0));
        eventually(|| h.playback.scheduled().len() == 1).await;

        h.transport.push(ServerFrame::Closed {
            reason: "deadline".to_string(),
        });
        eventually(|| h.session.state() == SessionState::Closed).await;
        eventually(|| h.statuses.lock().len() == 2).await;

        assert_eq!(*h.statuses.lock(), vec![true, false]);
        assert!(!h.capture.is_running());
        assert!(h.playback.is_closed());
        assert_eq!(h.playback.stopped().len(), 1);
        h.session.disconnect().await;
        assert_eq!(h.statuses.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_releases_everything_and_silences_callbacks() {
        let h = Harness::new();
        h.open().await;
        h.transport.push(chunk(1.0));
        h.transport.push(chunk(1.0));
        eventually(|| h.playback.scheduled().len() == 2).await;

        h.session.disconnect().await;
        h.session.disconnect().await;

        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(!h.capture.is_running());
        assert!(h.playback.is_closed());
        assert_eq!(h.playback.stopped().len(), 2);
        assert_eq!(h.session.in_flight_buffers(), 0);
        assert!(h.transport.outbound_closed().await);

        let before = (h.messages.lock().len(), h.statuses.lock().len());
        h.transport.push(ServerFrame::Transcript {
            text: "late".to_string(),
            is_user: false,
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!((h.messages.lock().len(), h.statuses.lock().len()), before);
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting_for_setup() {
        let h = Harness::new();
        let (on_message, on_status) = h.callbacks();

        let (connected, _) = tokio::join!(h.session.connect(on_message, on_status, None), async {
            eventually(|| h.transport.setups().len() == 1).await;
            assert_eq!(h.session.state(), SessionState::Connecting);
            h.session.disconnect().await;
        });

        assert!(connected.is_ok());
        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(h.statuses.lock().is_empty());
        assert!(!h.capture.is_running());
        assert!(h.playback.is_closed());

        h.transport.push(ServerFrame::SetupComplete);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(h.statuses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_cannot_reconnect() {
        let h = Harness::new();
        h.open().await;
        h.session.disconnect().await;

        let (on_message, on_status) = h.callbacks();
        let err = h.session.connect(on_message, on_status, None).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::SessionStateTransition { from: SessionState::Closed, .. }
        ));
    }
}
