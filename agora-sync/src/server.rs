//! WebSocket hub keeping every client current with both collections.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── HubServer ── SessionGate (handshake)
//! Client B ──┘      │
//!                   ├── Collection "products" ── RocksDB
//!                   ├── Collection "messages" ── RocksDB
//!                   │        │
//!                   │   normalize()
//!                   │        │
//!                   └── ConnectionGroup (fan-out)
//!                            │
//!                 ┌──────────┼───────────┐
//!                 ▼          ▼           ▼
//!              Client A   Client B    Client C
//! ```
//!
//! Every mutation re-fetches the entire affected collection and resends
//! it to all connections — full replication, no deltas. Two concurrent
//! writers may interleave; the last completed list-then-broadcast wins as
//! the global view. Records are never lost (the append completes before
//! the re-fetch), only intermediate broadcasts.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 5

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{ClientInfo, ConnectionGroup};
use crate::normalize::{normalize, ChatMessage, MessageSet};
use crate::protocol::{EventKind, Frame, Product};
use crate::session::{Admission, SessionGate, SessionRegistry};
use crate::store::{Collection, StoreConfig, StoreError};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity
    pub broadcast_capacity: usize,
    /// Redirect target handed to denied handshakes
    pub logout_path: String,
    /// Collection storage root
    pub storage: StoreConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            logout_path: "/api/logout".to_string(),
            storage: StoreConfig::default(),
        }
    }
}

impl HubConfig {
    /// Config for testing: given storage root, ephemeral port.
    pub fn for_testing(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            storage: StoreConfig::for_testing(storage_root),
            ..Self::default()
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub total_bytes: u64,
    pub broadcasts: u64,
}

/// The synchronization hub.
pub struct HubServer {
    config: HubConfig,
    /// Product catalog collection
    products: Arc<Collection<Product>>,
    /// Message log collection
    messages: Arc<Collection<ChatMessage>>,
    /// Live connections
    connections: Arc<ConnectionGroup>,
    /// Session registry consulted by the gate
    sessions: Arc<SessionRegistry>,
    gate: SessionGate,
    stats: Arc<RwLock<HubStats>>,
}

impl HubServer {
    /// Open the hub, establishing both collection handles.
    ///
    /// A collection that cannot be opened makes the hub unusable, so the
    /// error propagates out of startup — no retry.
    pub fn open(config: HubConfig) -> Result<Self, StoreError> {
        let products = Arc::new(Collection::open("products", &config.storage)?);
        let messages = Arc::new(Collection::open("messages", &config.storage)?);

        let connections = Arc::new(ConnectionGroup::new(config.broadcast_capacity));
        let gate = SessionGate::new(config.logout_path.clone());

        Ok(Self {
            config,
            products,
            messages,
            connections,
            sessions: Arc::new(SessionRegistry::new()),
            gate,
            stats: Arc::new(RwLock::new(HubStats::default())),
        })
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the hub event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Hub listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let products = self.products.clone();
            let messages = self.messages.clone();
            let connections = self.connections.clone();
            let sessions = self.sessions.clone();
            let gate = self.gate.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(
                    stream, addr, products, messages, connections, sessions, gate, stats,
                )
                .await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    ///
    /// The session gate runs inside the handshake: a denied request is
    /// answered with a redirect to the logout path and never reaches the
    /// event loop or any store operation.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        products: Arc<Collection<Product>>,
        messages: Arc<Collection<ChatMessage>>,
        connections: Arc<ConnectionGroup>,
        sessions: Arc<SessionRegistry>,
        gate: SessionGate,
        stats: Arc<RwLock<HubStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut user_login: Option<String> = None;

        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let token = token_from_path(req.uri().path());
            let state = token.and_then(|t| sessions.get(&t));

            match gate.check(state.as_ref()) {
                Admission::Admit => {
                    user_login = state.map(|s| s.user_login);
                    Ok(resp)
                }
                Admission::Deny { redirect } => {
                    log::info!("Handshake from {addr} denied, redirecting to {redirect}");
                    let mut deny = ErrorResponse::new(None);
                    *deny.status_mut() = StatusCode::FOUND;
                    if let Ok(location) = HeaderValue::from_str(&redirect) {
                        deny.headers_mut().insert(header::LOCATION, location);
                    }
                    Err(deny)
                }
            }
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let info = ClientInfo::new(user_login.unwrap_or_default());
        let client_id = info.client_id;
        log::info!(
            "Client {} ({}) connected from {addr}",
            info.user_login,
            client_id
        );

        let mut broadcast_rx = connections.add_client(info).await;

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            match Frame::decode(&bytes) {
                                Ok(frame) => {
                                    {
                                        let mut s = stats.write().await;
                                        s.total_events += 1;
                                        s.total_bytes += bytes.len() as u64;
                                    }

                                    let pushed = match frame.kind {
                                        EventKind::ClientReady => {
                                            log::debug!(
                                                "{} from {client_id}",
                                                frame.kind.wire_name()
                                            );
                                            let mut pushed = 0;
                                            pushed += push_product_list(&products, &connections) as u64;
                                            pushed += push_message_set(&messages, &connections) as u64;
                                            pushed
                                        }

                                        EventKind::ProductSubmitted => {
                                            match frame.new_product() {
                                                Ok(submission) => {
                                                    match products.save_with(|id| {
                                                        Product::from_submission(id, submission)
                                                    }) {
                                                        Ok((id, product)) => {
                                                            log::debug!(
                                                                "Product {id} ({}) saved",
                                                                product.name
                                                            );
                                                            push_product_list(&products, &connections) as u64
                                                        }
                                                        Err(e) => {
                                                            log::error!("Product save failed: {e}");
                                                            0
                                                        }
                                                    }
                                                }
                                                Err(e) => {
                                                    log::warn!(
                                                        "Malformed product submission from {client_id}: {e}"
                                                    );
                                                    0
                                                }
                                            }
                                        }

                                        EventKind::MessageSubmitted => {
                                            match frame.chat_message() {
                                                Ok(message) => {
                                                    match messages.save(&message) {
                                                        Ok(seq) => {
                                                            log::debug!(
                                                                "Message {} saved at {seq}",
                                                                message.id
                                                            );
                                                            push_message_set(&messages, &connections) as u64
                                                        }
                                                        Err(e) => {
                                                            log::error!("Message save failed: {e}");
                                                            0
                                                        }
                                                    }
                                                }
                                                Err(e) => {
                                                    log::warn!(
                                                        "Malformed message submission from {client_id}: {e}"
                                                    );
                                                    0
                                                }
                                            }
                                        }

                                        EventKind::Ping => {
                                            // Point-to-point, not fanned out
                                            let pong = Frame::pong(client_id);
                                            let encoded = pong.encode()?;
                                            ws_sender.send(Message::Binary(encoded.into())).await?;
                                            0
                                        }

                                        _ => {
                                            log::debug!(
                                                "Unhandled inbound event: {}",
                                                frame.kind.wire_name()
                                            );
                                            0
                                        }
                                    };

                                    if pushed > 0 {
                                        let mut s = stats.write().await;
                                        s.broadcasts += pushed;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing fan-out frame — forwarded to every connection,
                // originator included (full replication).
                msg = broadcast_rx.recv() => {
                    match msg {
                        Ok(data) => {
                            ws_sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Client {client_id} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: drop this connection from the fan-out set. In-flight
        // store calls dispatched on its behalf are not cancelled.
        connections.remove_client(&client_id).await;

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }

        log::info!("Client {client_id} removed from fan-out set");
        Ok(())
    }

    /// Get hub statistics.
    pub async fn stats(&self) -> HubStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the session registry (shared with the login mechanism).
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Get the live connection set.
    pub fn connections(&self) -> &Arc<ConnectionGroup> {
        &self.connections
    }

    /// Get the product collection.
    pub fn products(&self) -> &Arc<Collection<Product>> {
        &self.products
    }

    /// Get the message collection.
    pub fn messages(&self) -> &Arc<Collection<ChatMessage>> {
        &self.messages
    }
}

/// Extract the session token from the request path (`/<token>`).
fn token_from_path(path: &str) -> Option<Uuid> {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .and_then(|segment| segment.parse().ok())
}

/// Re-fetch the full product list and fan it out.
///
/// A failed fetch logs and does not broadcast — stale or empty data is
/// never pushed. Returns whether a broadcast happened.
fn push_product_list(products: &Collection<Product>, connections: &ConnectionGroup) -> bool {
    match products.list() {
        Ok(list) => {
            let frame = Frame::product_list(&list);
            match connections.broadcast(&frame) {
                Ok(count) => {
                    log::debug!("product-list ({} items) sent to {count} clients", list.len());
                    true
                }
                Err(e) => {
                    log::error!("product-list broadcast failed: {e}");
                    false
                }
            }
        }
        Err(e) => {
            log::error!("Product list fetch failed, broadcast skipped: {e}");
            false
        }
    }
}

/// Re-fetch the full message log, normalize it, and fan it out.
///
/// Same policy as [`push_product_list`]: fetch failure means no broadcast.
fn push_message_set(messages: &Collection<ChatMessage>, connections: &ConnectionGroup) -> bool {
    match messages.list() {
        Ok(log_entries) => {
            let set = normalize(&MessageSet::from_log(log_entries));
            let frame = Frame::message_set(&set);
            match connections.broadcast(&frame) {
                Ok(count) => {
                    log::debug!(
                        "message-set ({} messages) sent to {count} clients",
                        set.message_count()
                    );
                    true
                }
                Err(e) => {
                    log::error!("message-set broadcast failed: {e}");
                    false
                }
            }
        }
        Err(e) => {
            log::error!("Message list fetch failed, broadcast skipped: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Author;
    use crate::protocol::NewProduct;

    #[test]
    fn test_hub_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.logout_path, "/api/logout");
    }

    #[test]
    fn test_hub_open() {
        let dir = tempfile::tempdir().unwrap();
        let hub = HubServer::open(HubConfig::for_testing(dir.path())).unwrap();

        assert_eq!(hub.bind_addr(), "127.0.0.1:0");
        assert!(hub.products().is_empty());
        assert!(hub.messages().is_empty());
    }

    #[test]
    fn test_hub_open_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the products database should go.
        std::fs::write(dir.path().join("products"), b"in the way").unwrap();

        let result = HubServer::open(HubConfig::for_testing(dir.path()));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_hub_stats_initial() {
        let dir = tempfile::tempdir().unwrap();
        let hub = HubServer::open(HubConfig::for_testing(dir.path())).unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.broadcasts, 0);
    }

    #[test]
    fn test_token_from_path() {
        let token = Uuid::new_v4();
        assert_eq!(token_from_path(&format!("/{token}")), Some(token));
        assert_eq!(token_from_path(&format!("/{token}/")), Some(token));
        assert_eq!(token_from_path("/"), None);
        assert_eq!(token_from_path("/not-a-token"), None);
        assert_eq!(token_from_path(""), None);
    }

    #[tokio::test]
    async fn test_push_product_list_broadcasts_full_collection() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path());
        let products: Collection<Product> = Collection::open("products", &config).unwrap();
        let connections = ConnectionGroup::new(16);

        products
            .save_with(|id| Product::from_submission(id, NewProduct::new("A", "1.00", "u")))
            .unwrap();
        products
            .save_with(|id| Product::from_submission(id, NewProduct::new("B", "2.00", "u")))
            .unwrap();

        let mut rx = connections.add_client(ClientInfo::new("ana")).await;
        assert!(push_product_list(&products, &connections));

        let frame = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        let list = frame.products().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "A");
        assert_eq!(list[1].name, "B");
    }

    #[tokio::test]
    async fn test_push_message_set_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path());
        let messages: Collection<ChatMessage> = Collection::open("messages", &config).unwrap();
        let connections = ConnectionGroup::new(16);

        messages
            .save(&ChatMessage::new(Author::new("a@x", "Ana", ""), "hola", "t0"))
            .unwrap();
        messages
            .save(&ChatMessage::new(Author::new("a@x", "Ana", ""), "otra", "t1"))
            .unwrap();

        let mut rx = connections.add_client(ClientInfo::new("ana")).await;
        assert!(push_message_set(&messages, &connections));

        let frame = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        let set = frame.normalized_messages().unwrap();
        assert_eq!(set.message_count(), 2);
        // Shared author stored once.
        assert_eq!(set.author_count(), 1);
    }
}
