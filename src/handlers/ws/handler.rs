//! Client WebSocket handler.
//!
//! Each connection runs two tasks: this receive loop, and a sender task
//! that drains the connection's event channel into the socket. The event
//! channel's sender side is what the registry holds for the connection, so
//! a closed channel is the registry's eviction signal.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::relay::RelayError;
use crate::core::session::{ClientEvent, ConnectionAck, ConnectionId};
use crate::state::AppState;

/// Outbound event channel size per connection.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame and message size (1 MB). Audio frames are
/// bounded far below this by the relay's own chunk limit.
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

fn default_sample_rate() -> u32 {
    16000
}

fn default_encoding() -> String {
    "pcm_s16le".to_string()
}

/// Connect-time query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscribeQuery {
    pub session_id: String,
    pub user_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

/// Transcription WebSocket handler.
///
/// Upgrades the HTTP request and hands the socket to [`handle_socket`].
pub async fn transcribe_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TranscribeQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(
        session_id = %query.session_id,
        user_id = %query.user_id,
        sample_rate = query.sample_rate,
        "WebSocket connection upgrade requested"
    );

    ws.max_frame_size(MAX_WS_MESSAGE_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query: TranscribeQuery) {
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<ClientEvent>(CHANNEL_BUFFER_SIZE);

    // Sender task: the only writer to this socket. Ends when every sender
    // clone is gone (registry eviction + handler teardown).
    let sender_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to serialize outgoing event: {e}");
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let connection_id = ConnectionId::new_v4();
    let session_id = query.session_id.clone();

    state
        .registry
        .join(&session_id, connection_id, &query.user_id, event_tx.clone());

    // First joiner opens the upstream connection; a setup failure is fatal
    // to this connection and reported before closing.
    if let Err(err) = state
        .relay
        .open_upstream(&session_id, query.sample_rate)
        .await
    {
        warn!(session_id = %session_id, "Session setup aborted: {err}");
        let _ = event_tx
            .send(ClientEvent::Error {
                message: format!("Failed to start transcription: {err}"),
            })
            .await;
        teardown(&state, &session_id, connection_id).await;
        drop(event_tx);
        let _ = sender_task.await;
        return;
    }

    state
        .registry
        .set_current_speaker(&session_id, &query.user_id);

    let _ = event_tx
        .send(ClientEvent::Connected {
            message: format!("Connected to session {session_id}"),
            config: ConnectionAck {
                session_id: session_id.clone(),
                user_id: query.user_id.clone(),
                sample_rate: query.sample_rate,
                encoding: query.encoding.clone(),
                upstream_enabled: true,
            },
        })
        .await;

    info!(
        session_id = %session_id,
        user_id = %query.user_id,
        %connection_id,
        "WebSocket connected"
    );

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                if let Err(err) = state.relay.forward_audio(&session_id, data).await {
                    warn!(session_id = %session_id, "Audio forward failed: {err}");
                    let _ = event_tx
                        .send(ClientEvent::Error {
                            message: format!("Failed to process audio: {err}"),
                        })
                        .await;
                    // Without a live upstream the connection cannot make
                    // progress; an oversized frame is the client's to fix.
                    match err {
                        RelayError::FrameTooLarge { .. } => {}
                        _ => break,
                    }
                }
            }
            Ok(Message::Text(_)) => {
                debug!(session_id = %session_id, "Ignoring unexpected text frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "WebSocket closed by client");
                break;
            }
            Err(e) => {
                warn!(session_id = %session_id, "WebSocket error: {e}");
                break;
            }
        }
    }

    teardown(&state, &session_id, connection_id).await;
    drop(event_tx);
    let _ = sender_task.await;

    info!(
        session_id = %session_id,
        user_id = %query.user_id,
        %connection_id,
        "WebSocket disconnected"
    );
}

/// Leave the session; when this was the last connection, cancel the
/// session's buffer and close its upstream connection.
async fn teardown(state: &Arc<AppState>, session_id: &str, connection_id: ConnectionId) {
    if state.registry.leave(session_id, connection_id) {
        state.scheduler.cancel(session_id).await;
        state.relay.close_upstream(session_id);
    }
}
