//! Upstream streaming transcription relay.
//!
//! Bridges one session's audio to the upstream streaming speech-to-text
//! service over a WebSocket and routes the resulting transcript events back
//! into the pipeline:
//!
//! - every non-empty turn is broadcast to the session as a live transcript,
//! - formatted end-of-turn transcripts are appended to the session's text
//!   buffer (arming the debounce timer),
//! - a termination event forces a final flush of whatever is buffered.
//!
//! One upstream connection exists per active session, owned by a spawned
//! task; the relay only hands frames and shutdown signals to that task over
//! channels.

mod client;
mod config;
mod messages;

pub use client::{MAX_AUDIO_CHUNK_SIZE, MIN_AUDIO_CHUNK_SIZE, RelayError, UpstreamRelay};
pub use config::{UpstreamConfig, UpstreamEncoding};
pub use messages::{
    BeginEvent, TerminateMessage, TerminationEvent, TurnEvent, UpstreamErrorEvent, UpstreamEvent,
};
