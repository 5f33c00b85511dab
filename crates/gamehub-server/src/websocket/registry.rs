//! Registry of live WebSocket connections.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use gamehub_core::ConnectionId;
use metrics::{counter, gauge};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use super::connection::{ClientConnection, ConnectionState};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

/// Normal-closure code sent to every live client on shutdown.
pub const SHUTDOWN_CLOSE_CODE: u16 = 1000;
/// Reason paired with [`SHUTDOWN_CLOSE_CODE`].
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutting down";

/// Tracks open connections by ID.
///
/// A connection is present from `register` until `unregister`. The count is
/// kept in an atomic so `/health` never waits on the map lock.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    active_count: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Allocate an ID, open the connection, and add it.
    ///
    /// IDs are unique among live connections; a collision regenerates.
    pub async fn register(
        &self,
        tx: mpsc::Sender<Arc<String>>,
        remote_addr: Option<SocketAddr>,
    ) -> Arc<ClientConnection> {
        let mut conns = self.connections.write().await;
        let connection = loop {
            match conns.entry(ConnectionId::generate()) {
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    let conn = Arc::new(ClientConnection::new(slot.key().clone(), tx, remote_addr));
                    let _ = conn.advance(ConnectionState::Open);
                    let _ = slot.insert(Arc::clone(&conn));
                    break conn;
                }
            }
        };
        let total = self.active_count.fetch_add(1, Ordering::AcqRel) + 1;
        drop(conns);

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).set(total as f64);
        info!(
            client_id = %connection.id,
            remote_addr = ?remote_addr,
            total_clients = total,
            "client connected"
        );
        connection
    }

    /// Remove a connection. Returns `false` if it was already gone.
    ///
    /// The connection moves to `Closing` and drops its sender, so concurrent
    /// broadcasts holding a snapshot refuse to enqueue.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = {
            let mut conns = self.connections.write().await;
            if let Some(conn) = conns.get(id) {
                conn.begin_close();
            }
            conns.remove(id)
        };
        if removed.is_none() {
            debug!(client_id = %id, "unregister for unknown connection");
            return false;
        }
        let remaining = self.active_count.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!(WS_CONNECTIONS_ACTIVE).set(remaining as f64);
        true
    }

    /// Look up a connection.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Open connections at this instant.
    pub async fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// Request a normal close of every registered connection.
    ///
    /// Returns how many were asked to close. Sessions unregister themselves.
    pub async fn close_all(&self) -> usize {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            conn.request_close(SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON);
        }
        conns.len()
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
    use crate::websocket::connection::CloseRequest;

    async fn register(
        registry: &ConnectionRegistry,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        (registry.register(tx, None).await, rx)
    }

    #[tokio::test]
    async fn register_opens_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = register(&registry).await;
        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.id.as_str().starts_with("client_"));
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.get(&conn.id).await.is_some());
    }

    #[tokio::test]
    async fn ids_unique_among_live_connections() {
        let registry = ConnectionRegistry::new();
        let mut rxs = Vec::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..50 {
            let (conn, rx) = register(&registry).await;
            assert!(ids.insert(conn.id.clone()));
            rxs.push(rx);
        }
        assert_eq!(registry.connection_count(), 50);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = register(&registry).await;
        assert!(registry.unregister(&conn.id).await);
        assert!(!registry.unregister(&conn.id).await);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(registry.get(&conn.id).await.is_none());
    }

    #[tokio::test]
    async fn unregister_unknown_id() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.unregister(&ConnectionId::from("client_0_nope")).await);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_excludes_removed() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = register(&registry).await;
        let (b, _rx_b) = register(&registry).await;
        let _ = registry.unregister(&a.id).await;
        let snap = registry.snapshot().await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, b.id);
    }

    #[tokio::test]
    async fn snapshot_held_across_unregister_refuses_sends() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = register(&registry).await;
        let snap = registry.snapshot().await;
        let _ = registry.unregister(&a.id).await;
        assert!(snap[0].send(Arc::new("late".into())).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_subset_leaves_the_rest() {
        const REGISTERED: usize = 7;
        const REMOVED: usize = 4;

        let registry = ConnectionRegistry::new();
        let mut conns = Vec::new();
        for _ in 0..REGISTERED {
            conns.push(register(&registry).await);
        }
        for (conn, _) in &conns[..REMOVED] {
            assert!(registry.unregister(&conn.id).await);
        }

        assert_eq!(registry.connection_count(), REGISTERED - REMOVED);
        let snap = registry.snapshot().await;
        assert_eq!(snap.len(), REGISTERED - REMOVED);
        for (conn, _) in &conns[REMOVED..] {
            assert!(snap.iter().any(|c| c.id == conn.id));
        }
        for (conn, _) in &conns[..REMOVED] {
            assert!(registry.get(&conn.id).await.is_none());
        }
    }

    #[tokio::test]
    async fn close_all_requests_normal_close() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = register(&registry).await;
        let (b, _rx_b) = register(&registry).await;
        assert_eq!(registry.close_all().await, 2);
        for conn in [a, b] {
            assert!(conn.is_close_requested());
            assert_eq!(
                conn.close_request(),
                Some(CloseRequest {
                    code: 1000,
                    reason: "Server shutting down"
                })
            );
        }
        // close_all does not remove; sessions do.
        assert_eq!(registry.connection_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_register_unregister_keeps_count() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let conn = registry.register(tx, None).await;
                tokio::task::yield_now().await;
                assert!(registry.unregister(&conn.id).await);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.snapshot().await.is_empty());
    }
}
