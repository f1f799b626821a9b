use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::DomainError;

/// Parameters of a bidirectional streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// Client to provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// One realtime input chunk (microphone audio or a still image).
    Media { mime_type: String, data: String },
}

/// Provider to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// The provider accepted the session setup.
    SetupComplete,
    /// Base64 PCM16 audio for playback.
    Audio { data: String },
    /// The user barged in; queued model audio must be discarded.
    Interrupted,
    Transcript { text: String, is_user: bool },
    TurnComplete,
    /// The stream ended, cleanly or not.
    Closed { reason: String },
}

/// An open streaming connection.
///
/// Dropping `outbound` asks the transport to close the stream.
#[derive(Debug)]
pub struct RealtimeConnection {
    pub outbound: mpsc::Sender<ClientFrame>,
    pub inbound: mpsc::Receiver<ServerFrame>,
}

/// Port for the realtime speech model stream.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open the stream and send the setup message. Does not wait for the acknowledgement.
    async fn connect(&self, setup: SessionSetup) -> Result<RealtimeConnection, DomainError>;
}
