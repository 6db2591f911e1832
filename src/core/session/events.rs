//! Client-facing event types.
//!
//! Every message the server pushes to a client is one of these variants,
//! serialized as JSON with a `type` tag. These are the currency of the
//! broadcast fan-out, so they live next to the registry rather than in the
//! WebSocket handler.

use serde::{Deserialize, Serialize};

/// Outgoing events delivered to every connection of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Handshake acknowledgement with the echoed connection settings.
    #[serde(rename = "connected")]
    Connected {
        message: String,
        config: ConnectionAck,
    },

    /// Incremental transcript for real-time display, one per upstream turn.
    #[serde(rename = "live_transcript")]
    LiveTranscript { data: LiveTranscript },

    /// A paragraph's raw buffered text, emitted when the debounce window
    /// elapses.
    #[serde(rename = "text_buffer_complete")]
    TextBufferComplete { data: ParagraphPayload },

    /// The refined version of a previously flushed paragraph.
    #[serde(rename = "paragraph_refined")]
    ParagraphRefined { data: RefinedParagraph },

    /// Fatal or per-chunk error surfaced to the client.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Echoed connection settings sent with the `connected` handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAck {
    pub session_id: String,
    pub user_id: String,
    pub sample_rate: u32,
    pub encoding: String,
    /// Whether an upstream transcription connection is live for the session.
    pub upstream_enabled: bool,
}

/// Payload of a `live_transcript` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTranscript {
    pub text: String,
    pub timestamp: String,
    pub session_id: String,
    pub is_final: bool,
}

/// Payload of a `text_buffer_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphPayload {
    pub session_id: String,
    pub paragraph_number: u64,
    pub buffered_text: String,
    pub completed_at: String,
}

/// Payload of a `paragraph_refined` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedParagraph {
    pub session_id: String,
    pub paragraph_number: u64,
    pub refined_text: String,
    pub completed_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_transcript_wire_format() {
        let event = ClientEvent::LiveTranscript {
            data: LiveTranscript {
                text: "hello".to_string(),
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                session_id: "s1".to_string(),
                is_final: true,
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "live_transcript");
        assert_eq!(json["data"]["text"], "hello");
        assert_eq!(json["data"]["is_final"], true);
    }

    #[test]
    fn test_error_wire_format() {
        let event = ClientEvent::Error {
            message: "boom".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"boom"}"#);
    }

    #[test]
    fn test_paragraph_events_share_number() {
        let raw = ClientEvent::TextBufferComplete {
            data: ParagraphPayload {
                session_id: "s1".to_string(),
                paragraph_number: 3,
                buffered_text: "a b c".to_string(),
                completed_at: "2024-01-01T00:00:10Z".to_string(),
            },
        };
        let refined = ClientEvent::ParagraphRefined {
            data: RefinedParagraph {
                session_id: "s1".to_string(),
                paragraph_number: 3,
                refined_text: "a b c".to_string(),
                completed_at: "2024-01-01T00:00:12Z".to_string(),
            },
        };

        let raw = serde_json::to_value(&raw).unwrap();
        let refined = serde_json::to_value(&refined).unwrap();
        assert_eq!(
            raw["data"]["paragraph_number"],
            refined["data"]["paragraph_number"]
        );
        assert_eq!(raw["type"], "text_buffer_complete");
        assert_eq!(refined["type"], "paragraph_refined");
    }
}
