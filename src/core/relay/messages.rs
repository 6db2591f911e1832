//! Wire types for the upstream streaming transcription API.
//!
//! Incoming events are JSON objects tagged by a `type` field:
//!
//! - `Begin`: session handshake acknowledged
//! - `Turn`: transcript text with end-of-turn and formatting flags
//! - `Termination`: session over, with the total audio duration
//! - `Error`: explicit error from the provider
//!
//! Anything else is preserved as [`UpstreamEvent::Unknown`] for forward
//! compatibility; error-bearing unknown shapes are still surfaced to
//! clients by the relay.

use serde::{Deserialize, Serialize};

/// Handshake acknowledgement for a new upstream session.
#[derive(Debug, Clone, Deserialize)]
pub struct BeginEvent {
    /// Session identifier assigned by the provider
    pub id: String,
    /// Session expiration timestamp (Unix epoch seconds)
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// One provider-delimited span of speech.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnEvent {
    /// Transcript text for this turn so far
    #[serde(default)]
    pub transcript: String,
    /// Whether this delivery closes the turn
    #[serde(default)]
    pub end_of_turn: bool,
    /// Whether the transcript has been formatted. With turn formatting
    /// enabled the provider re-delivers each closed turn once more with
    /// this flag set; only that delivery is buffered, so a turn is never
    /// appended twice.
    #[serde(default)]
    pub turn_is_formatted: bool,
}

/// Upstream session termination notice.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminationEvent {
    /// Total audio processed over the session's lifetime, in seconds
    #[serde(default)]
    pub audio_duration_seconds: f64,
}

/// Explicit error event from the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamErrorEvent {
    pub error: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Termination notice sent to the provider before closing the connection.
#[derive(Debug, Clone, Serialize)]
pub struct TerminateMessage {
    #[serde(rename = "type")]
    pub message_type: &'static str,
}

impl Default for TerminateMessage {
    fn default() -> Self {
        Self {
            message_type: "Terminate",
        }
    }
}

/// Enum for all possible events from the upstream WebSocket.
#[derive(Debug)]
pub enum UpstreamEvent {
    Begin(BeginEvent),
    Turn(TurnEvent),
    Termination(TerminationEvent),
    Error(UpstreamErrorEvent),
    /// Unrecognized event shape, kept raw for logging and error extraction
    Unknown(serde_json::Value),
}

impl UpstreamEvent {
    /// Parse a WebSocket text frame into the appropriate event type.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let event = match value.get("type").and_then(|t| t.as_str()) {
            Some("Begin") => UpstreamEvent::Begin(serde_json::from_value(value)?),
            Some("Turn") => UpstreamEvent::Turn(serde_json::from_value(value)?),
            Some("Termination") => UpstreamEvent::Termination(serde_json::from_value(value)?),
            Some("Error") => UpstreamEvent::Error(serde_json::from_value(value)?),
            _ => UpstreamEvent::Unknown(value),
        };
        Ok(event)
    }

    /// Check if this event closes a turn with a formatted transcript.
    #[inline]
    pub fn is_final_transcript(&self) -> bool {
        matches!(self, UpstreamEvent::Turn(turn) if turn.end_of_turn && turn.turn_is_formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_begin_event() {
        let json = r#"{"type":"Begin","id":"session-123","expires_at":1704067200}"#;
        let event = UpstreamEvent::parse(json).unwrap();

        match event {
            UpstreamEvent::Begin(begin) => {
                assert_eq!(begin.id, "session-123");
                assert_eq!(begin.expires_at, Some(1704067200));
            }
            _ => panic!("Expected Begin event"),
        }
    }

    #[test]
    fn test_parse_turn_event() {
        let json = r#"{
            "type": "Turn",
            "transcript": "Hello world",
            "end_of_turn": true,
            "turn_is_formatted": true
        }"#;

        let event = UpstreamEvent::parse(json).unwrap();

        match &event {
            UpstreamEvent::Turn(turn) => {
                assert_eq!(turn.transcript, "Hello world");
                assert!(turn.end_of_turn);
                assert!(turn.turn_is_formatted);
            }
            _ => panic!("Expected Turn event"),
        }
        assert!(event.is_final_transcript());
    }

    #[test]
    fn test_partial_turn_is_not_final() {
        let json = r#"{"type":"Turn","transcript":"Hello","end_of_turn":false}"#;
        let event = UpstreamEvent::parse(json).unwrap();
        assert!(!event.is_final_transcript());

        // Unformatted end-of-turn deliveries are superseded by the formatted
        // re-delivery and must not count as final either.
        let json = r#"{"type":"Turn","transcript":"Hello","end_of_turn":true}"#;
        let event = UpstreamEvent::parse(json).unwrap();
        assert!(!event.is_final_transcript());
    }

    #[test]
    fn test_parse_termination_event() {
        let json = r#"{"type":"Termination","audio_duration_seconds":12.5}"#;
        let event = UpstreamEvent::parse(json).unwrap();

        match event {
            UpstreamEvent::Termination(term) => {
                assert!((term.audio_duration_seconds - 12.5).abs() < f64::EPSILON);
            }
            _ => panic!("Expected Termination event"),
        }
    }

    #[test]
    fn test_parse_error_event() {
        let json = r#"{"type":"Error","error_code":"invalid_api_key","error":"API key is invalid"}"#;
        let event = UpstreamEvent::parse(json).unwrap();

        match event {
            UpstreamEvent::Error(err) => {
                assert_eq!(err.error, "API key is invalid");
                assert_eq!(err.error_code.as_deref(), Some("invalid_api_key"));
            }
            _ => panic!("Expected Error event"),
        }
    }

    #[test]
    fn test_parse_unknown_event_keeps_raw_value() {
        let json = r#"{"type":"FutureEventType","error":"something broke"}"#;
        let event = UpstreamEvent::parse(json).unwrap();

        match event {
            UpstreamEvent::Unknown(value) => {
                assert_eq!(
                    value.get("error").and_then(|v| v.as_str()),
                    Some("something broke")
                );
            }
            _ => panic!("Expected Unknown event"),
        }
    }

    #[test]
    fn test_parse_untyped_object_is_unknown() {
        let event = UpstreamEvent::parse(r#"{"error":"no type field"}"#).unwrap();
        assert!(matches!(event, UpstreamEvent::Unknown(_)));
    }

    #[test]
    fn test_parse_invalid_json_fails() {
        assert!(UpstreamEvent::parse("not json").is_err());
    }

    #[test]
    fn test_terminate_message_serialization() {
        let msg = TerminateMessage::default();
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"Terminate"}"#);
    }
}
