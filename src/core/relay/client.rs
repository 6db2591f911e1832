//! Upstream WebSocket relay implementation.
//!
//! Each active session owns one outbound streaming connection, run by a
//! spawned task. The task multiplexes three concerns in a `select!` loop:
//! outbound audio frames from clients, a shutdown signal from session
//! teardown, and inbound transcript events from the provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::config::UpstreamConfig;
use super::messages::{TerminateMessage, UpstreamEvent};
use crate::core::buffer::BufferScheduler;
use crate::core::session::{ClientEvent, LiveTranscript, SessionRegistry};
use crate::utils::now_rfc3339;

/// Frames smaller than this are treated as noise or silence artifacts from
/// client audio capture and dropped without forwarding.
pub const MIN_AUDIO_CHUNK_SIZE: usize = 100;

/// Maximum audio frame size. At 48kHz mono 16-bit PCM one second is ~96KB,
/// so 256KB allows ~2.5 seconds per frame, far beyond what a sane client
/// sends.
pub const MAX_AUDIO_CHUNK_SIZE: usize = 256 * 1024;

/// Bounded audio channel per upstream connection, for backpressure.
const AUDIO_CHANNEL_SIZE: usize = 32;

/// Errors that can occur while relaying audio upstream.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Provider unreachable or misconfigured. Fatal to session setup; the
    /// caller reports it to the client and aborts the session.
    #[error("Upstream transcription unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No upstream connection is open for the session. Audio arriving
    /// before `open_upstream` is a caller-ordering bug, not a transient
    /// condition; it is surfaced, never retried.
    #[error("No upstream session open for {0}")]
    NoUpstreamSession(String),

    /// The upstream connection task has already terminated.
    #[error("Upstream connection for {0} is closed")]
    UpstreamClosed(String),

    /// Frame exceeds the sanity limit.
    #[error("Audio frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// Channel ends for one live upstream connection.
struct UpstreamHandle {
    audio_tx: mpsc::Sender<Bytes>,
    shutdown_tx: mpsc::Sender<()>,
    /// Distinguishes this connection's task from a successor opened for the
    /// same session id, so a stale task never removes its successor's
    /// handle.
    generation: u64,
}

/// Relay between client sessions and the upstream streaming STT service.
pub struct UpstreamRelay {
    config: UpstreamConfig,
    registry: Arc<SessionRegistry>,
    scheduler: Arc<BufferScheduler>,
    sessions: DashMap<String, UpstreamHandle>,
    generation: AtomicU64,
}

impl UpstreamRelay {
    pub fn new(
        config: UpstreamConfig,
        registry: Arc<SessionRegistry>,
        scheduler: Arc<BufferScheduler>,
    ) -> Self {
        Self {
            config,
            registry,
            scheduler,
            sessions: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn has_upstream(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Open the upstream connection for a session. Idempotent while a
    /// connection is live. Fails with [`RelayError::UpstreamUnavailable`]
    /// when the API key is unconfigured or the connection attempt errors.
    pub async fn open_upstream(
        self: &Arc<Self>,
        session_id: &str,
        sample_rate: u32,
    ) -> Result<(), RelayError> {
        let api_key = self
            .config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                RelayError::UpstreamUnavailable("API key not configured".to_string())
            })?;

        if self.sessions.contains_key(session_id) {
            return Ok(());
        }

        let ws_url = self.config.build_websocket_url(sample_rate);
        let host = self.config.host().ok_or_else(|| {
            RelayError::UpstreamUnavailable(format!(
                "Invalid upstream base URL: {}",
                self.config.base_url
            ))
        })?;

        // The provider expects the raw API key in the Authorization header,
        // without a Bearer prefix.
        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(&ws_url)
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header("Authorization", &api_key)
            .body(())
            .map_err(|e| {
                RelayError::UpstreamUnavailable(format!("Failed to build upstream request: {e}"))
            })?;

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            RelayError::UpstreamUnavailable(format!("Failed to connect to upstream: {e}"))
        })?;

        info!(session_id, sample_rate, "Upstream transcription connected");

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        self.sessions.insert(
            session_id.to_string(),
            UpstreamHandle {
                audio_tx,
                shutdown_tx,
                generation,
            },
        );

        let relay = Arc::clone(self);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            relay
                .run_connection(session_id, generation, ws_stream, audio_rx, shutdown_rx)
                .await;
        });

        Ok(())
    }

    /// Forward a binary audio frame to the session's upstream connection.
    /// Undersized frames are silently dropped before the session lookup.
    pub async fn forward_audio(&self, session_id: &str, data: Bytes) -> Result<(), RelayError> {
        if data.len() < MIN_AUDIO_CHUNK_SIZE {
            debug!(
                session_id,
                size = data.len(),
                "Dropping noise-sized audio frame"
            );
            return Ok(());
        }
        if data.len() > MAX_AUDIO_CHUNK_SIZE {
            return Err(RelayError::FrameTooLarge {
                size: data.len(),
                max: MAX_AUDIO_CHUNK_SIZE,
            });
        }

        let audio_tx = self
            .sessions
            .get(session_id)
            .map(|handle| handle.audio_tx.clone())
            .ok_or_else(|| RelayError::NoUpstreamSession(session_id.to_string()))?;

        let size = data.len();
        audio_tx
            .send(data)
            .await
            .map_err(|_| RelayError::UpstreamClosed(session_id.to_string()))?;

        debug!(session_id, size, "Queued audio frame for upstream");
        Ok(())
    }

    /// Tear down the session's upstream connection. Best-effort: the
    /// connection task sends a termination notice and closes; any error on
    /// that path is logged, not propagated.
    pub fn close_upstream(&self, session_id: &str) {
        if let Some((_, handle)) = self.sessions.remove(session_id) {
            debug!(session_id, "Signalling upstream teardown");
            let _ = handle.shutdown_tx.try_send(());
        }
    }

    /// Connection task: owns the WebSocket for one session.
    async fn run_connection(
        self: Arc<Self>,
        session_id: String,
        generation: u64,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        mut audio_rx: mpsc::Receiver<Bytes>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        loop {
            tokio::select! {
                Some(audio) = audio_rx.recv() => {
                    let size = audio.len();
                    if let Err(e) = ws_sink.send(Message::Binary(audio)).await {
                        error!(session_id = %session_id, "Failed to forward audio upstream: {e}");
                        self.registry
                            .broadcast(
                                &session_id,
                                ClientEvent::Error {
                                    message: format!("Failed to process audio: {e}"),
                                },
                                None,
                            )
                            .await;
                        break;
                    }
                    debug!(session_id = %session_id, size, "Sent audio frame upstream");
                }

                // Fires on an explicit teardown signal, and also when the
                // handle is dropped from the session map (channel closed).
                _ = shutdown_rx.recv() => {
                    info!(session_id = %session_id, "Closing upstream connection");
                    if let Ok(json) = serde_json::to_string(&TerminateMessage::default()) {
                        let _ = ws_sink.send(Message::Text(json.into())).await;
                    }
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }

                message = ws_stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_upstream_text(&session_id, &text).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(session_id = %session_id, "Upstream WebSocket closed: {frame:?}");
                            break;
                        }
                        Some(Ok(_)) => {
                            debug!(session_id = %session_id, "Ignoring non-text upstream frame");
                        }
                        Some(Err(e)) => {
                            warn!(session_id = %session_id, "Upstream WebSocket error: {e}");
                            break;
                        }
                        None => {
                            info!(session_id = %session_id, "Upstream WebSocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Only clear our own handle; a successor connection for the same
        // session id must not be evicted by a stale task.
        self.sessions
            .remove_if(&session_id, |_, handle| handle.generation == generation);
        info!(session_id = %session_id, "Upstream connection task finished");
    }

    /// Route one inbound upstream event. A malformed event is logged and
    /// dropped; the stream continues.
    async fn handle_upstream_text(&self, session_id: &str, text: &str) {
        let event = match UpstreamEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(session_id, "Failed to parse upstream event: {e}");
                return;
            }
        };

        match event {
            UpstreamEvent::Begin(begin) => {
                info!(
                    session_id,
                    upstream_id = %begin.id,
                    "Upstream transcription session began"
                );
            }

            UpstreamEvent::Turn(turn) => {
                let transcript = turn.transcript.trim();
                if transcript.is_empty() {
                    return;
                }

                let is_final = turn.end_of_turn && turn.turn_is_formatted;

                // Live update first, so incremental display always precedes
                // the buffered paragraph built from the same text.
                self.registry
                    .broadcast(
                        session_id,
                        ClientEvent::LiveTranscript {
                            data: LiveTranscript {
                                text: transcript.to_string(),
                                timestamp: now_rfc3339(),
                                session_id: session_id.to_string(),
                                is_final,
                            },
                        },
                        None,
                    )
                    .await;

                if is_final {
                    self.scheduler.append(session_id, transcript).await;
                }
            }

            UpstreamEvent::Termination(term) => {
                info!(
                    session_id,
                    audio_duration_seconds = term.audio_duration_seconds,
                    "Upstream session terminated"
                );
                // Whatever is still buffered becomes the final paragraph.
                self.scheduler.flush(session_id).await;
            }

            UpstreamEvent::Error(err) => {
                error!(
                    session_id,
                    error_code = err.error_code.as_deref().unwrap_or(""),
                    "Upstream error: {}",
                    err.error
                );
                self.registry
                    .broadcast(
                        session_id,
                        ClientEvent::Error {
                            message: format!("Transcription error: {}", err.error),
                        },
                        None,
                    )
                    .await;
            }

            UpstreamEvent::Unknown(value) => {
                warn!(session_id, "Unknown upstream event: {value}");
                if let Some(error) = value.get("error").and_then(|v| v.as_str()) {
                    self.registry
                        .broadcast(
                            session_id,
                            ClientEvent::Error {
                                message: format!("Transcription error: {error}"),
                            },
                            None,
                        )
                        .await;
                }
            }
        }
    }
}
