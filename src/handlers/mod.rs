//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `ws` - Client transcription WebSocket

pub mod api;
pub mod ws;

pub use ws::transcribe_handler;
