//! Connection registry
//!
//! Tracks the open WebSocket connections and fans text messages out to them.
//! Each connection is represented by the sending half of its bounded outbound
//! queue; the connection's own task drains the queue into the socket.

use std::fmt;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Handle used to push text frames to one peer
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl Connection {
    /// Wrap an existing outbound queue
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self { id, tx }
    }

    /// Create a connection with a fresh id and an outbound queue of `capacity` messages
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(ConnectionId::new(), tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn try_send(&self, message: &str) -> Result<(), TrySendError<String>> {
        self.tx.try_send(message.to_string())
    }
}

/// Result of a broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Connections the message was queued for
    pub delivered: usize,
    /// Connections dropped because their send failed
    pub removed: Vec<ConnectionId>,
}

/// The set of currently active connections
///
/// Connections are kept in insertion order and appear at most once.
/// Broadcasts iterate over a snapshot taken under the read lock, so
/// connections added or removed while a broadcast is running never corrupt
/// it: a connection added meanwhile may miss the message, and one removed
/// meanwhile is still attempted once.
pub struct ConnectionRegistry {
    connections: RwLock<Vec<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
        }
    }

    /// Register a connection whose handshake has completed
    ///
    /// Returns `false` and leaves the registry untouched if a connection with
    /// the same id is already registered.
    pub async fn add(&self, connection: Connection) -> bool {
        let mut connections = self.connections.write().await;
        if connections.iter().any(|c| c.id == connection.id) {
            warn!("Connection {} is already registered", connection.id);
            return false;
        }

        debug!("Registered connection {}", connection.id);
        connections.push(connection);
        true
    }

    /// Remove a connection, returning whether it was registered
    ///
    /// Removing an unknown connection is a no-op.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.iter().position(|c| c.id == id) {
            Some(index) => {
                connections.remove(index);
                debug!("Removed connection {}", id);
                true
            }
            None => false,
        }
    }

    /// Send a text message to every registered connection
    ///
    /// A connection whose queue is closed or full is removed; the others
    /// still get the message. Never fails.
    pub async fn broadcast(&self, message: &str) -> BroadcastOutcome {
        let snapshot = self.snapshot().await;
        self.deliver(&snapshot, message).await
    }

    /// Send to every connection of a snapshot, dropping the ones that fail
    async fn deliver(&self, snapshot: &[Connection], message: &str) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        for connection in snapshot {
            match connection.try_send(message) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue of connection {} is full, dropping it",
                        connection.id
                    );
                    if self.disconnect(connection.id).await {
                        outcome.removed.push(connection.id);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} is gone, dropping it", connection.id);
                    if self.disconnect(connection.id).await {
                        outcome.removed.push(connection.id);
                    }
                }
            }
        }

        debug!(
            "Broadcast to {} of {} connections",
            outcome.delivered,
            snapshot.len()
        );
        outcome
    }

    /// Number of registered connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Ids of the registered connections, in insertion order
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.iter().map(|c| c.id).collect()
    }

    async fn snapshot(&self) -> Vec<Connection> {
        self.connections.read().await.clone()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn connection() -> (Connection, mpsc::Receiver<String>) {
        Connection::channel(8)
    }

    #[tokio::test]
    async fn test_registry_new() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_add_and_disconnect() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = connection();
        let id = a.id();

        assert!(registry.add(a).await);
        assert_eq!(registry.ids().await, vec![id]);

        assert!(registry.disconnect(id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_duplicate_is_rejected() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = connection();

        assert!(registry.add(a.clone()).await);
        assert!(!registry.add(a).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = connection();
        let id = a.id();
        registry.add(a).await;

        assert!(!registry.disconnect(ConnectionId::new()).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.disconnect(id).await);
        assert!(!registry.disconnect(id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_replay_keeps_live_set() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..6 {
            let (conn, rx) = connection();
            ids.push(conn.id());
            receivers.push(rx);
            registry.add(conn).await;
        }

        registry.disconnect(ids[1]).await;
        registry.disconnect(ids[4]).await;
        registry.disconnect(ids[4]).await;
        registry.disconnect(ids[0]).await;

        let live = registry.ids().await;
        assert_eq!(live, vec![ids[2], ids[3], ids[5]]);
        let unique: HashSet<_> = live.iter().collect();
        assert_eq!(unique.len(), live.len());
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_all() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = connection();
            registry.add(conn).await;
            receivers.push(rx);
        }

        let outcome = registry.broadcast("hello").await;
        assert_eq!(outcome.delivered, 3);
        assert!(outcome.removed.is_empty());

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), "hello");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_broadcast_empty_registry() {
        let registry = ConnectionRegistry::new();
        let outcome = registry.broadcast("nobody").await;
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[tokio::test]
    async fn test_broadcast_visits_insertion_order() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let first = Connection::new(ConnectionId::new(), tx.clone());
        let second = Connection::new(ConnectionId::new(), tx);
        registry.add(first).await;
        registry.add(second).await;

        registry.broadcast("one").await;
        registry.broadcast("two").await;

        let received: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(received, vec!["one", "one", "two", "two"]);
    }

    #[tokio::test]
    async fn test_broadcast_removes_closed_connection() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = connection();
        let (b, mut rx_b) = connection();
        let (c, mut rx_c) = connection();
        let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());
        registry.add(a).await;
        registry.add(b).await;
        registry.add(c).await;

        drop(rx_a);

        let outcome = registry.broadcast("m").await;
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.removed, vec![a_id]);
        assert_eq!(registry.ids().await, vec![b_id, c_id]);
        assert_eq!(rx_b.try_recv().unwrap(), "m");
        assert_eq!(rx_c.try_recv().unwrap(), "m");
    }

    #[tokio::test]
    async fn test_broadcast_removes_full_connection() {
        let registry = ConnectionRegistry::new();
        let (slow, _slow_rx) = Connection::channel(1);
        let (fast, mut fast_rx) = connection();
        let slow_id = slow.id();
        registry.add(slow).await;
        registry.add(fast).await;

        let outcome = registry.broadcast("first").await;
        assert_eq!(outcome.delivered, 2);

        let outcome = registry.broadcast("second").await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.removed, vec![slow_id]);
        assert!(!registry.ids().await.contains(&slow_id));

        assert_eq!(fast_rx.try_recv().unwrap(), "first");
        assert_eq!(fast_rx.try_recv().unwrap(), "second");
    }

    #[tokio::test]
    async fn test_removed_connection_stops_receiving() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connection();
        let (b, mut rx_b) = connection();
        let b_id = b.id();
        registry.add(a).await;
        registry.add(b).await;

        registry.disconnect(b_id).await;
        let outcome = registry.broadcast("x").await;

        assert_eq!(outcome.delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap(), "x");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_membership_changes_after_snapshot() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connection();
        let (b, mut rx_b) = connection();
        let (c, rx_c) = connection();
        let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());
        registry.add(a).await;
        registry.add(b).await;
        registry.add(c).await;

        let snapshot = registry.snapshot().await;

        // B leaves cleanly, C's peer goes away, D joins
        registry.disconnect(b_id).await;
        registry.disconnect(c_id).await;
        drop(rx_c);
        let (d, mut rx_d) = connection();
        let d_id = d.id();
        registry.add(d).await;

        let outcome = registry.deliver(&snapshot, "m").await;

        // B is still attempted from the snapshot, C fails without a second removal
        assert_eq!(outcome.delivered, 2);
        assert!(outcome.removed.is_empty());
        assert_eq!(rx_a.try_recv().unwrap(), "m");
        assert_eq!(rx_b.try_recv().unwrap(), "m");
        assert!(rx_d.try_recv().is_err());
        assert_eq!(registry.ids().await, vec![a_id, d_id]);
    }
}
