//! Per-session state owned by the registry.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ClientEvent;

/// Opaque identifier of one client connection.
pub type ConnectionId = Uuid;

/// Outbound side of one client connection. The receiving half is drained by
/// the connection's sender task in the WebSocket handler; a closed channel
/// therefore means the socket is gone.
pub(crate) struct ConnectionHandle {
    pub user_id: String,
    pub tx: mpsc::Sender<ClientEvent>,
}

/// One transcription room.
///
/// Owned exclusively by [`super::SessionRegistry`]; other components refer
/// to it by id only.
pub struct Session {
    id: String,
    created_at: OffsetDateTime,
    /// Monotonic paragraph counter, starts at 0. The first flushed
    /// paragraph is number 1.
    paragraph_counter: AtomicU64,
    /// Last user to join; purely informational metadata.
    current_speaker: RwLock<Option<String>>,
    pub(crate) connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl Session {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            created_at: OffsetDateTime::now_utc(),
            paragraph_counter: AtomicU64::new(0),
            current_speaker: RwLock::new(None),
            connections: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Claim the next paragraph number. Numbers are strictly increasing and
    /// never reused for the lifetime of the session.
    pub fn next_paragraph_number(&self) -> u64 {
        self.paragraph_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_speaker(&self) -> Option<String> {
        self.current_speaker.read().clone()
    }

    pub(crate) fn set_current_speaker(&self, user_id: &str) {
        *self.current_speaker.write() = Some(user_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraph_numbers_start_at_one_and_increase() {
        let session = Session::new("s1");
        assert_eq!(session.next_paragraph_number(), 1);
        assert_eq!(session.next_paragraph_number(), 2);
        assert_eq!(session.next_paragraph_number(), 3);
    }

    #[test]
    fn test_current_speaker_tracks_last_writer() {
        let session = Session::new("s1");
        assert_eq!(session.current_speaker(), None);
        session.set_current_speaker("alice");
        session.set_current_speaker("bob");
        assert_eq!(session.current_speaker().as_deref(), Some("bob"));
    }
}
