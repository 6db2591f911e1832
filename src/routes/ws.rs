//! Transcription WebSocket route configuration.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::transcribe_handler;
use crate::state::AppState;

/// Create the transcription WebSocket router.
///
/// # Endpoint
///
/// `GET /ws?session_id=<id>&user_id=<id>&sample_rate=16000&encoding=pcm_s16le`
///
/// After the upgrade, clients stream raw PCM audio as binary frames and
/// receive JSON events: `connected`, `live_transcript`,
/// `text_buffer_complete`, `paragraph_refined`, and `error`.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(transcribe_handler))
        .layer(TraceLayer::new_for_http())
}
