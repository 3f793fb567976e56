//! Fan-out broadcast to every live connection.
//!
//! Uses a tokio broadcast channel for O(1) send to all subscribers.
//! Each connection gets an independent receiver that buffers up to
//! `capacity` frames; receivers that fall behind drop frames
//! (backpressure) rather than stalling the hub.
//!
//! There is one global group — every client mirrors both collections, so
//! every outbound event goes to all connections, originator included.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{Frame, ProtocolError};

/// Connection identity with display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: Uuid,
    pub user_login: String,
}

impl ClientInfo {
    pub fn new(user_login: impl Into<String>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            user_login: user_login.into(),
        }
    }

    /// Create with explicit client_id (for testing)
    pub fn with_id(client_id: Uuid, user_login: impl Into<String>) -> Self {
        Self {
            client_id,
            user_login: user_login.into(),
        }
    }
}

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default)]
pub struct FanoutStats {
    pub frames_sent: u64,
    pub active_clients: usize,
}

/// Atomic counters — the broadcast hot path never takes a lock.
struct AtomicFanoutStats {
    frames_sent: AtomicU64,
}

impl AtomicFanoutStats {
    fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
        }
    }
}

/// The set of live connections and their shared broadcast channel.
///
/// Ownership of a connection ends at `remove_client` — nothing is
/// buffered for a departed client; a reconnecting client re-requests a
/// full snapshot instead.
pub struct ConnectionGroup {
    /// Broadcast channel sender
    sender: broadcast::Sender<Arc<Vec<u8>>>,

    /// Connected clients
    clients: Arc<RwLock<HashMap<Uuid, ClientInfo>>>,

    /// Channel capacity (frames buffered per receiver)
    capacity: usize,

    /// Lock-free stats
    atomic_stats: Arc<AtomicFanoutStats>,
}

impl ConnectionGroup {
    /// Create a new group with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            clients: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            atomic_stats: Arc::new(AtomicFanoutStats::new()),
        }
    }

    /// Add a client to the fan-out set.
    ///
    /// Returns the receiver this connection consumes frames from.
    pub async fn add_client(&self, info: ClientInfo) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut clients = self.clients.write().await;
        clients.insert(info.client_id, info);
        self.sender.subscribe()
    }

    /// Remove a client from the fan-out set.
    pub async fn remove_client(&self, client_id: &Uuid) -> Option<ClientInfo> {
        let mut clients = self.clients.write().await;
        clients.remove(client_id)
    }

    /// Broadcast a frame to every connection.
    ///
    /// The frame is encoded once and shared; returns the number of
    /// receivers it reached. Stats are tracked via atomics.
    pub fn broadcast(&self, frame: &Frame) -> Result<usize, ProtocolError> {
        let encoded = frame.encode()?;
        let receiver_count = self.sender.send(Arc::new(encoded)).unwrap_or(0);
        self.atomic_stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(receiver_count)
    }

    /// Broadcast pre-encoded bytes directly (zero-copy fast path).
    pub fn broadcast_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(encoded).unwrap_or(0);
        self.atomic_stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Get the current client count.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get all connected client infos.
    pub async fn clients(&self) -> Vec<ClientInfo> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Check if a client is connected.
    pub async fn has_client(&self, client_id: &Uuid) -> bool {
        self.clients.read().await.contains_key(client_id)
    }

    /// Get fan-out statistics.
    pub async fn stats(&self) -> FanoutStats {
        let clients = self.clients.read().await;
        FanoutStats {
            frames_sent: self.atomic_stats.frames_sent.load(Ordering::Relaxed),
            active_clients: clients.len(),
        }
    }

    /// Get the channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe without registering a client (raw receiver).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{NewProduct, Product};

    #[tokio::test]
    async fn test_add_remove_client() {
        let group = ConnectionGroup::new(16);
        let info = ClientInfo::new("ana");
        let client_id = info.client_id;

        let _rx = group.add_client(info).await;
        assert_eq!(group.client_count().await, 1);
        assert!(group.has_client(&client_id).await);

        group.remove_client(&client_id).await;
        assert_eq!(group.client_count().await, 0);
        assert!(!group.has_client(&client_id).await);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_connection() {
        let group = ConnectionGroup::new(16);

        let mut rx1 = group.add_client(ClientInfo::new("ana")).await;
        let mut rx2 = group.add_client(ClientInfo::new("bruno")).await;
        let mut rx3 = group.add_client(ClientInfo::new("carla")).await;

        let products = vec![Product::from_submission(
            0,
            NewProduct::new("Widget", "9.99", "u"),
        )];
        let count = group.broadcast(&Frame::product_list(&products)).unwrap();

        // All 3 receivers get it — the originator is not excluded.
        assert_eq!(count, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let bytes = rx.recv().await.unwrap();
            let frame = Frame::decode(&bytes).unwrap();
            assert_eq!(frame.products().unwrap(), products);
        }
    }

    #[tokio::test]
    async fn test_broadcast_raw_zero_copy() {
        let group = ConnectionGroup::new(16);
        let mut rx = group.add_client(ClientInfo::new("ana")).await;

        let data = Arc::new(vec![10, 20, 30]);
        let count = group.broadcast_raw(data.clone());
        assert_eq!(count, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(*received, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients() {
        let group = ConnectionGroup::new(16);
        let count = group
            .broadcast(&Frame::product_list(&[]))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let group = ConnectionGroup::new(16);
        let _rx = group.add_client(ClientInfo::new("ana")).await;

        group.broadcast(&Frame::product_list(&[])).unwrap();
        group.broadcast(&Frame::product_list(&[])).unwrap();

        let stats = group.stats().await;
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.active_clients, 1);
    }

    #[tokio::test]
    async fn test_capacity() {
        let group = ConnectionGroup::new(32);
        assert_eq!(group.capacity(), 32);
    }

    #[tokio::test]
    async fn test_clients_list() {
        let group = ConnectionGroup::new(16);

        let _rx1 = group.add_client(ClientInfo::new("ana")).await;
        let _rx2 = group.add_client(ClientInfo::new("bruno")).await;

        let clients = group.clients().await;
        assert_eq!(clients.len(), 2);

        let logins: Vec<&str> = clients.iter().map(|c| c.user_login.as_str()).collect();
        assert!(logins.contains(&"ana"));
        assert!(logins.contains(&"bruno"));
    }

    #[tokio::test]
    async fn test_removed_client_not_counted_in_fan_out() {
        let group = ConnectionGroup::new(16);

        let info = ClientInfo::new("ana");
        let client_id = info.client_id;
        let rx1 = group.add_client(info).await;
        let _rx2 = group.add_client(ClientInfo::new("bruno")).await;

        group.remove_client(&client_id).await;
        drop(rx1);

        let count = group.broadcast(&Frame::product_list(&[])).unwrap();
        assert_eq!(count, 1);
        assert_eq!(group.client_count().await, 1);
    }
}
