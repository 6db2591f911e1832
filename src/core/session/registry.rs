//! Connection registry: membership, metadata, and broadcast fan-out.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::ClientEvent;
use super::session::{ConnectionHandle, ConnectionId, Session};

/// Registry of live sessions, keyed by session id.
///
/// All mutation of session membership goes through `join`/`leave`;
/// `broadcast` is the only delivery path and evicts connections whose
/// outbound channel has closed. A session exists in the map exactly while
/// it has at least one live connection.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a connection under a session, creating the session if this
    /// is its first connection. Returns `true` when the session was created
    /// by this call. Idempotent for a given connection id.
    pub fn join(
        &self,
        session_id: &str,
        connection_id: ConnectionId,
        user_id: &str,
        tx: mpsc::Sender<ClientEvent>,
    ) -> bool {
        let mut created = false;
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Session::new(session_id))
            })
            .value()
            .clone();

        session.connections.insert(
            connection_id,
            ConnectionHandle {
                user_id: user_id.to_string(),
                tx,
            },
        );

        info!(
            session_id,
            user_id,
            %connection_id,
            members = session.connection_count(),
            created,
            "Connection joined session"
        );
        created
    }

    /// Remove a connection from a session. Returns `true` when this was the
    /// last connection and the session record was destroyed; the caller is
    /// then responsible for tearing down the session's buffer and upstream
    /// connection.
    pub fn leave(&self, session_id: &str, connection_id: ConnectionId) -> bool {
        let emptied = match self.sessions.get(session_id) {
            Some(session) => {
                session.connections.remove(&connection_id);
                session.connections.is_empty()
            }
            None => return false,
        };

        if !emptied {
            return false;
        }

        // Re-check emptiness under the removal to avoid racing a concurrent
        // join between the check above and the removal here.
        let destroyed = self
            .sessions
            .remove_if(session_id, |_, session| session.connections.is_empty())
            .is_some();

        if destroyed {
            info!(session_id, "Last connection left, session destroyed");
        }
        destroyed
    }

    /// Record the most recent writer as the session's current speaker.
    /// No-op when the session does not exist.
    pub fn set_current_speaker(&self, session_id: &str, user_id: &str) {
        if let Some(session) = self.sessions.get(session_id) {
            session.set_current_speaker(user_id);
        }
    }

    /// Snapshot of the connection ids currently registered for a session.
    pub fn members_of(&self, session_id: &str) -> Vec<ConnectionId> {
        match self.sessions.get(session_id) {
            Some(session) => session.connections.iter().map(|e| *e.key()).collect(),
            None => Vec::new(),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }

    /// Claim the next paragraph number for a session, or `None` when the
    /// session no longer exists.
    pub fn next_paragraph_number(&self, session_id: &str) -> Option<u64> {
        self.sessions
            .get(session_id)
            .map(|session| session.next_paragraph_number())
    }

    /// Deliver an event to every connection of a session, optionally
    /// skipping one. A failed send means the connection's socket task is
    /// gone, so the connection is evicted and delivery continues with the
    /// rest. Broadcasting to an absent session is a silent no-op: the
    /// session may have been destroyed by a racing `leave`.
    pub async fn broadcast(
        &self,
        session_id: &str,
        event: ClientEvent,
        excluding: Option<ConnectionId>,
    ) {
        let Some(session) = self.get(session_id) else {
            debug!(session_id, "Broadcast to absent session dropped");
            return;
        };

        // Snapshot the targets so no map guard is held across await points.
        let targets: Vec<(ConnectionId, mpsc::Sender<ClientEvent>)> = session
            .connections
            .iter()
            .filter(|entry| Some(*entry.key()) != excluding)
            .map(|entry| (*entry.key(), entry.value().tx.clone()))
            .collect();

        for (connection_id, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                warn!(
                    session_id,
                    %connection_id,
                    "Dropping dead connection from session"
                );
                session.connections.remove(&connection_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<ClientEvent>, mpsc::Receiver<ClientEvent>) {
        mpsc::channel(16)
    }

    #[test]
    fn test_session_exists_iff_members() {
        let registry = SessionRegistry::new();
        let a = ConnectionId::new_v4();
        let b = ConnectionId::new_v4();
        let (tx, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();

        assert!(!registry.contains("s1"));
        assert!(registry.join("s1", a, "alice", tx));
        assert!(!registry.join("s1", b, "bob", tx_b));
        assert_eq!(registry.members_of("s1").len(), 2);

        assert!(!registry.leave("s1", a));
        assert!(registry.contains("s1"));
        assert_eq!(registry.members_of("s1").len(), 1);

        assert!(registry.leave("s1", b));
        assert!(!registry.contains("s1"));
        assert!(registry.members_of("s1").is_empty());
    }

    #[test]
    fn test_leave_unknown_session_is_noop() {
        let registry = SessionRegistry::new();
        assert!(!registry.leave("ghost", ConnectionId::new_v4()));
    }

    #[test]
    fn test_rejoin_after_destroy_resets_counter() {
        let registry = SessionRegistry::new();
        let a = ConnectionId::new_v4();
        let (tx, _rx) = channel();
        registry.join("s1", a, "alice", tx);
        assert_eq!(registry.next_paragraph_number("s1"), Some(1));
        assert_eq!(registry.next_paragraph_number("s1"), Some(2));
        registry.leave("s1", a);

        let (tx, _rx) = channel();
        registry.join("s1", ConnectionId::new_v4(), "alice", tx);
        assert_eq!(registry.next_paragraph_number("s1"), Some(1));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let registry = SessionRegistry::new();
        let a = ConnectionId::new_v4();
        let b = ConnectionId::new_v4();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.join("s1", a, "alice", tx_a);
        registry.join("s1", b, "bob", tx_b);

        registry
            .broadcast(
                "s1",
                ClientEvent::Error {
                    message: "ping".to_string(),
                },
                None,
            )
            .await;

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ClientEvent::Error { .. }
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ClientEvent::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_broadcast_evicts_dead_connection() {
        let registry = SessionRegistry::new();
        let dead = ConnectionId::new_v4();
        let alive = ConnectionId::new_v4();
        let (tx_dead, rx_dead) = channel();
        let (tx_alive, mut rx_alive) = channel();
        registry.join("s1", dead, "alice", tx_dead);
        registry.join("s1", alive, "bob", tx_alive);

        drop(rx_dead);

        registry
            .broadcast(
                "s1",
                ClientEvent::Error {
                    message: "ping".to_string(),
                },
                None,
            )
            .await;

        assert!(rx_alive.try_recv().is_ok());
        assert_eq!(registry.members_of("s1"), vec![alive]);
    }

    #[tokio::test]
    async fn test_broadcast_to_absent_session_is_noop() {
        let registry = SessionRegistry::new();
        registry
            .broadcast(
                "ghost",
                ClientEvent::Error {
                    message: "ping".to_string(),
                },
                None,
            )
            .await;
    }

    #[tokio::test]
    async fn test_broadcast_excluding_skips_one() {
        let registry = SessionRegistry::new();
        let a = ConnectionId::new_v4();
        let b = ConnectionId::new_v4();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.join("s1", a, "alice", tx_a);
        registry.join("s1", b, "bob", tx_b);

        registry
            .broadcast(
                "s1",
                ClientEvent::Error {
                    message: "ping".to_string(),
                },
                Some(a),
            )
            .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
