pub mod buffer;
pub mod refine;
pub mod relay;
pub mod session;

// Re-export commonly used types for convenience
pub use buffer::{BufferScheduler, ParagraphEvent};
pub use refine::{REFINE_INSTRUCTION, RefineBackend, RefineError, RefineOrchestrator};
pub use relay::{
    MAX_AUDIO_CHUNK_SIZE, MIN_AUDIO_CHUNK_SIZE, RelayError, UpstreamConfig, UpstreamEncoding,
    UpstreamEvent, UpstreamRelay,
};
pub use session::{
    ClientEvent, ConnectionAck, ConnectionId, LiveTranscript, ParagraphPayload, RefinedParagraph,
    Session, SessionRegistry,
};
