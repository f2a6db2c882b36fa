//! Per-session event fan-out to connected clients.

use std::sync::Arc;

use agora_core::{Envelope, ServerEvent, SessionId, WireEvent};
use dashmap::DashMap;
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Connected clients indexed by connection id.
pub struct BroadcastManager {
    connections: DashMap<String, Arc<ClientConnection>>,
}

impl BroadcastManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self { connections: DashMap::new() }
    }

    /// Add a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by id.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.remove(connection_id).map(|(_, conn)| conn)
    }

    /// Encode `event` once and queue it for every client in `session_id`.
    ///
    /// Returns the number of clients the frame was queued for.
    pub fn broadcast_to_session(&self, session_id: &SessionId, event: ServerEvent) -> usize {
        self.broadcast_except(session_id, event, None)
    }

    /// Like [`broadcast_to_session`](Self::broadcast_to_session), skipping one connection.
    pub fn broadcast_except(
        &self,
        session_id: &SessionId,
        event: ServerEvent,
        except: Option<&str>,
    ) -> usize {
        let kind = event.kind();
        let json: Arc<str> = match Envelope::new(Some(session_id.clone()), event).encode() {
            Ok(json) => Arc::from(json),
            Err(error) => {
                warn!(kind, %error, "failed to encode event");
                return 0;
            }
        };

        let mut delivered = 0;
        for entry in &self.connections {
            let conn = entry.value();
            if conn.session_id() != session_id || except == Some(conn.id.as_str()) {
                continue;
            }
            if conn.send(Arc::clone(&json)) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn.id, %session_id, kind, "failed to queue event for client");
            }
        }
        debug!(kind, %session_id, delivered, "broadcast event to session");
        delivered
    }

    /// Number of connected clients.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of distinct sessions with at least one client.
    pub fn active_sessions(&self) -> usize {
        let mut sessions: Vec<SessionId> =
            self.connections.iter().map(|c| c.session_id().clone()).collect();
        sessions.sort_unstable();
        sessions.dedup();
        sessions.len()
    }

    /// Whether any client is still joined to `session_id`.
    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.connections.iter().any(|c| c.session_id() == session_id)
    }

    /// Outbound frames dropped across the connected clients.
    pub fn frames_dropped(&self) -> u64 {
        self.connections.iter().map(|c| c.drop_count()).sum()
    }

    /// Clients joined to `session_id`.
    pub fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|c| c.session_id() == session_id)
            .map(|c| Arc::clone(c.value()))
            .collect()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use tokio::sync::mpsc;

    fn make_connection(
        id: &str,
        session: &str,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        make_connection_with(id, session, 8)
    }

    fn make_connection_with(
        id: &str,
        session: &str,
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(id.into(), session.into(), format!("p_{id}").into(), tx);
        (Arc::new(conn), rx)
    }

    fn frames(rx: &mut mpsc::Receiver<Outbound>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn add_and_remove() {
        let bm = BroadcastManager::new();
        let (conn, _rx) = make_connection("c1", "s1");
        bm.add(conn);
        assert_eq!(bm.connection_count(), 1);
        assert!(bm.remove("c1").is_some());
        assert!(bm.remove("c1").is_none());
        assert_eq!(bm.connection_count(), 0);
    }

    #[test]
    fn broadcast_reaches_only_the_session() {
        let bm = BroadcastManager::new();
        let (a, mut rx_a) = make_connection("c1", "s1");
        let (b, mut rx_b) = make_connection("c2", "s1");
        let (c, mut rx_c) = make_connection("c3", "s2");
        bm.add(a);
        bm.add(b);
        bm.add(c);

        let delivered = bm.broadcast_to_session(&"s1".into(), ServerEvent::Heartbeat);
        assert_eq!(delivered, 2);
        assert_eq!(frames(&mut rx_a), 1);
        assert_eq!(frames(&mut rx_b), 1);
        assert_eq!(frames(&mut rx_c), 0);
    }

    #[test]
    fn broadcast_except_skips_the_sender() {
        let bm = BroadcastManager::new();
        let (a, mut rx_a) = make_connection("c1", "s1");
        let (b, mut rx_b) = make_connection("c2", "s1");
        bm.add(a);
        bm.add(b);

        let delivered = bm.broadcast_except(&"s1".into(), ServerEvent::Heartbeat, Some("c1"));
        assert_eq!(delivered, 1);
        assert_eq!(frames(&mut rx_a), 0);
        assert_eq!(frames(&mut rx_b), 1);
    }

    #[test]
    fn counts_sessions_and_members() {
        let bm = BroadcastManager::new();
        for (id, session) in [("c1", "s1"), ("c2", "s1"), ("c3", "s2")] {
            let (conn, _rx) = make_connection(id, session);
            bm.add(conn);
        }
        assert_eq!(bm.active_sessions(), 2);
        assert_eq!(bm.session_connections(&"s1".into()).len(), 2);
        assert!(bm.session_connections(&"s9".into()).is_empty());
        assert!(bm.has_session(&"s2".into()));
        assert!(!bm.has_session(&"s9".into()));
    }

    #[test]
    fn dropped_frames_are_summed_over_live_clients() {
        let bm = BroadcastManager::new();
        let (slow, _slow_rx) = make_connection_with("c1", "s1", 1);
        let (fast, _fast_rx) = make_connection("c2", "s1");
        bm.add(slow);
        bm.add(fast);

        for _ in 0..3 {
            let _ = bm.broadcast_to_session(&"s1".into(), ServerEvent::Heartbeat);
        }
        assert_eq!(bm.frames_dropped(), 2);
        let _ = bm.remove("c1");
        assert_eq!(bm.frames_dropped(), 0);
    }
}
