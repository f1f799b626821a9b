use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::adapters::env_secrets::GEMINI_API_KEY;
use crate::domain::DomainError;
use crate::ports::{
    ClientFrame, HttpClient, RealtimeConnection, RealtimeTransport, SecretProvider, ServerFrame,
    SessionSetup,
};

const CHANNEL_CAPACITY: usize = 64;

/// Bidirectional audio stream against the Gemini Live API.
///
/// Each `connect` opens one WebSocket and two tasks: a writer draining the
/// outbound channel and a reader mapping provider messages to [`ServerFrame`]s.
pub struct GeminiLiveTransport {
    url: String,
    http: Arc<dyn HttpClient>,
    secrets: Arc<dyn SecretProvider>,
}

impl GeminiLiveTransport {
    /// `http` is only consulted for the egress allowlist.
    pub fn new(url: impl Into<String>, http: Arc<dyn HttpClient>, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            url: url.into(),
            http,
            secrets,
        }
    }

    fn endpoint(&self, key: &str) -> Result<Url, DomainError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| DomainError::Config(format!("Invalid realtime URL {}: {e}", self.url)))?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }
}

#[async_trait]
impl RealtimeTransport for GeminiLiveTransport {
    async fn connect(&self, setup: SessionSetup) -> Result<RealtimeConnection, DomainError> {
        if !self.http.is_allowed(&self.url) {
            return Err(DomainError::NetworkBlocked {
                reason: format!("{} is not in the allowed domains", self.url),
            });
        }
        let key = self
            .secrets
            .secret(GEMINI_API_KEY)
            .ok_or_else(|| DomainError::MissingSecret(GEMINI_API_KEY.to_string()))?;
        let url = self.endpoint(key.expose())?;

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| DomainError::Realtime(format!("WebSocket connect failed: {e}")))?;
        info!(host = ?url.host_str(), model = %setup.model, "Realtime socket open");

        let (mut sink, mut stream) = ws.split();
        sink.send(Message::Text(setup_message(&setup).to_string()))
            .await
            .map_err(|e| DomainError::Realtime(format!("Sending setup failed: {e}")))?;

        let (outbound, mut outbound_rx) = mpsc::channel::<ClientFrame>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel::<ServerFrame>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(client_message(&frame).to_string())).await {
                    warn!(error = %e, "Realtime send failed");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("Realtime writer finished");
        });

        tokio::spawn(async move {
            let reason = loop {
                let text = match stream.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            trace!("Ignoring non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("{} {}", f.code, f.reason))
                            .unwrap_or_else(|| "closed by provider".to_string());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                };

                let frames = match serde_json::from_str::<Value>(&text) {
                    Ok(message) => parse_server_message(&message),
                    Err(e) => {
                        warn!(error = %e, "Unparseable realtime message");
                        continue;
                    }
                };
                for frame in frames {
                    if inbound_tx.send(frame).await.is_err() {
                        debug!("Realtime reader detached");
                        return;
                    }
                }
            };
            let _ = inbound_tx.send(ServerFrame::Closed { reason }).await;
        });

        Ok(RealtimeConnection { outbound, inbound })
    }
}

/// First message on the socket.
pub fn setup_message(setup: &SessionSetup) -> Value {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };
    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": setup.voice } }
                }
            },
            "systemInstruction": { "parts": [{ "text": setup.system_instruction }] },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
}

pub fn client_message(frame: &ClientFrame) -> Value {
    match frame {
        ClientFrame::Media { mime_type, data } => json!({
            "realtimeInput": { "mediaChunks": [{ "mimeType": mime_type, "data": data }] }
        }),
    }
}

/// Map one provider message to frames in the order they must be handled.
pub fn parse_server_message(message: &Value) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    if message.get("setupComplete").is_some() {
        frames.push(ServerFrame::SetupComplete);
    }
    if let Some(go_away) = message.get("goAway") {
        debug!(time_left = ?go_away.get("timeLeft"), "Provider announced disconnect");
    }

    let Some(content) = message.get("serverContent") else {
        return frames;
    };

    let transcript = |field: &str| {
        content
            .pointer(&format!("/{field}/text"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };
    if let Some(text) = transcript("inputTranscription") {
        frames.push(ServerFrame::Transcript { text, is_user: true });
    }

    let parts = content
        .pointer("/modelTurn/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for part in parts {
        if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
            frames.push(ServerFrame::Audio {
                data: data.to_string(),
            });
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            if part.get("thought").and_then(Value::as_bool) != Some(true) && !text.is_empty() {
                frames.push(ServerFrame::Transcript {
                    text: text.to_string(),
                    is_user: false,
                });
            }
        }
    }

    if let Some(text) = transcript("outputTranscription") {
        frames.push(ServerFrame::Transcript { text, is_user: false });
    }
    if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
        frames.push(ServerFrame::Interrupted);
    }
    if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
        frames.push(ServerFrame::TurnComplete);
    }
    frames
}
