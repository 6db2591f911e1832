//! Session registry and broadcast fan-out.
//!
//! A session is a logical transcription room: zero or more client
//! connections grouped under an opaque id, plus the per-session metadata
//! the rest of the pipeline needs (paragraph counter, current speaker).
//! The registry is the only owner of session membership; every other
//! component refers to sessions by id and goes through the registry's
//! operations.
//!
//! Lifecycle: a session record exists exactly while it has at least one
//! live connection. The first `join` creates it, the last `leave` destroys
//! it and reports that to the caller so dependent state (text buffer,
//! upstream connection) can be torn down.

mod events;
mod registry;
mod session;

pub use events::{ClientEvent, ConnectionAck, LiveTranscript, ParagraphPayload, RefinedParagraph};
pub use registry::SessionRegistry;
pub use session::{ConnectionId, Session};
