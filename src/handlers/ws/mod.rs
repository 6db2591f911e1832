//! Client transcription WebSocket.
//!
//! Clients connect to `GET /ws` with query parameters and stream raw PCM
//! audio as binary frames; the server pushes JSON events back.
//!
//! ## Client → Server
//!
//! - Query parameters at connect time: `session_id`, `user_id`,
//!   `sample_rate` (default 16000), `encoding` (default `pcm_s16le`)
//! - **Binary frames**: raw PCM audio, forwarded upstream essentially
//!   verbatim (frames under ~100 bytes dropped as noise)
//!
//! ## Server → Client
//!
//! - **connected**: handshake acknowledgement with echoed settings
//! - **live_transcript**: incremental transcript per upstream turn
//! - **text_buffer_complete**: raw paragraph on debounce flush
//! - **paragraph_refined**: refined paragraph once refinement completes
//! - **error**: fatal or per-chunk failure

mod handler;

pub use handler::{TranscribeQuery, transcribe_handler};
