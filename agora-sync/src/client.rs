//! WebSocket client for the synchronization hub.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect)
//! - Snapshot requests and product/message submissions
//! - Pending queue for submissions made while disconnected
//!
//! The hub buffers nothing for a departed client, so after every
//! (re)connect the client replays its pending submissions and then
//! requests a fresh full snapshot with `client-ready`.

use std::collections::VecDeque;
use std::sync::Arc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::broadcast::ClientInfo;
use crate::normalize::{ChatMessage, NormalizedMessageSet};
use crate::protocol::{EventKind, Frame, NewProduct, Product, ProtocolError};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted to the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Full product catalog pushed by the hub
    ProductList(Vec<Product>),
    /// Full normalized message set pushed by the hub
    MessageSet(NormalizedMessageSet),
}

/// A submission made while disconnected, queued for replay.
#[derive(Debug, Clone)]
enum PendingSubmission {
    Product(NewProduct),
    Message(ChatMessage),
}

/// Queue of submissions awaiting reconnection.
pub struct PendingQueue {
    queue: VecDeque<PendingSubmission>,
    max_size: usize,
}

impl PendingQueue {
    /// Create a new pending queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(256)),
            max_size,
        }
    }

    fn enqueue(&mut self, submission: PendingSubmission) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(submission);
        true
    }

    fn drain(&mut self) -> Vec<PendingSubmission> {
        self.queue.drain(..).collect()
    }

    /// Number of queued submissions.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Clear all queued submissions.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The hub client.
///
/// Manages a WebSocket connection to the hub, decodes pushed collection
/// snapshots into [`ClientEvent`]s, and submits products and messages.
pub struct HubClient {
    /// Our connection identity
    info: ClientInfo,

    /// Session token presented during the handshake
    session_token: Uuid,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Submissions queued while disconnected
    pending: Arc<Mutex<PendingQueue>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<ClientEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<ClientEvent>,

    /// Hub URL
    server_url: String,
}

impl HubClient {
    /// Create a new hub client.
    pub fn new(info: ClientInfo, session_token: Uuid, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            info,
            session_token,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            pending: Arc::new(Mutex::new(PendingQueue::new(1_000))),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to the hub.
    ///
    /// The session token travels in the URL path; a deauthorized session
    /// is turned away during the handshake and `connect` fails. On
    /// success, pending submissions are replayed and a fresh snapshot is
    /// requested.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!("{}/{}", self.server_url, self.session_token);
        let ws_result = tokio_tungstenite::connect_async(&url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (ws_writer, mut ws_reader) = futures_util::StreamExt::split(ws_stream);

                // Outgoing message channel
                let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward outgoing channel to WebSocket
                let ws_writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                let writer = ws_writer.clone();
                tokio::spawn(async move {
                    while let Some(data) = out_rx.recv().await {
                        let mut w = writer.lock().await;
                        use futures_util::SinkExt;
                        if w.send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });

                *self.state.write().await = ConnectionState::Connected;
                let _ = self.event_tx.send(ClientEvent::Connected).await;

                // Replay pending submissions, then request a fresh snapshot
                {
                    let mut pending = self.pending.lock().await;
                    let queued = pending.drain();
                    if !queued.is_empty() {
                        log::info!("Replaying {} queued submissions", queued.len());
                        for submission in queued {
                            let frame = match &submission {
                                PendingSubmission::Product(product) => {
                                    Frame::product_submitted(self.info.client_id, product)
                                }
                                PendingSubmission::Message(message) => {
                                    Frame::message_submitted(self.info.client_id, message)
                                }
                            };
                            if let Ok(encoded) = frame.encode() {
                                if let Some(ref tx) = self.outgoing_tx {
                                    let _ = tx.send(encoded).await;
                                }
                            }
                        }
                    }
                }
                self.send_ready().await?;

                // Reader task: decode pushed frames into client events
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                if let Ok(frame) = Frame::decode(&bytes) {
                                    let event = match frame.kind {
                                        EventKind::ProductList => {
                                            frame.products().ok().map(ClientEvent::ProductList)
                                        }
                                        EventKind::MessageSet => frame
                                            .normalized_messages()
                                            .ok()
                                            .map(ClientEvent::MessageSet),
                                        _ => None,
                                    };

                                    if let Some(evt) = event {
                                        let _ = event_tx.send(evt).await;
                                    }
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(ClientEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Request a full snapshot of both collections.
    pub async fn send_ready(&self) -> Result<(), ProtocolError> {
        let frame = Frame::client_ready(self.info.client_id);
        self.send_frame(frame).await
    }

    /// Submit a new product.
    ///
    /// If disconnected, queues the submission for replay.
    pub async fn submit_product(&self, product: NewProduct) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            let mut pending = self.pending.lock().await;
            if !pending.enqueue(PendingSubmission::Product(product)) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }

        let frame = Frame::product_submitted(self.info.client_id, &product);
        self.send_frame(frame).await
    }

    /// Submit a chat message.
    ///
    /// If disconnected, queues the submission for replay.
    pub async fn submit_message(&self, message: ChatMessage) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            let mut pending = self.pending.lock().await;
            if !pending.enqueue(PendingSubmission::Message(message)) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }

        let frame = Frame::message_submitted(self.info.client_id, &message);
        self.send_frame(frame).await
    }

    /// Send a ping to the hub.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let frame = Frame::ping(self.info.client_id);
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), ProtocolError> {
        let encoded = frame.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get our connection identity.
    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Get the session token.
    pub fn session_token(&self) -> Uuid {
        self.session_token
    }

    /// Get the hub URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Get pending queue length.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Author;

    #[test]
    fn test_client_creation() {
        let info = ClientInfo::new("ana");
        let token = Uuid::new_v4();
        let client = HubClient::new(info.clone(), token, "ws://localhost:9090");

        assert_eq!(client.info().user_login, "ana");
        assert_eq!(client.session_token(), token);
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = HubClient::new(ClientInfo::new("ana"), Uuid::new_v4(), "ws://localhost:9090");

        assert_eq!(
            client.connection_state().await,
            ConnectionState::Disconnected
        );
        assert_eq!(client.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_submit_offline_queues() {
        let client = HubClient::new(ClientInfo::new("ana"), Uuid::new_v4(), "ws://localhost:9090");

        client
            .submit_product(NewProduct::new("Widget", "9.99", "u"))
            .await
            .unwrap();
        assert_eq!(client.pending_len().await, 1);

        client
            .submit_message(ChatMessage::new(Author::new("a@x", "Ana", ""), "hola", "t0"))
            .await
            .unwrap();
        assert_eq!(client.pending_len().await, 2);
    }

    #[test]
    fn test_pending_queue() {
        let mut queue = PendingQueue::new(100);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        queue.enqueue(PendingSubmission::Product(NewProduct::new("A", "1", "u")));
        queue.enqueue(PendingSubmission::Product(NewProduct::new("B", "2", "u")));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pending_queue_capacity() {
        let mut queue = PendingQueue::new(2);

        assert!(queue.enqueue(PendingSubmission::Product(NewProduct::new("A", "1", "u"))));
        assert!(queue.enqueue(PendingSubmission::Product(NewProduct::new("B", "2", "u"))));
        assert!(!queue.enqueue(PendingSubmission::Product(NewProduct::new("C", "3", "u"))));

        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pending_queue_clear() {
        let mut queue = PendingQueue::new(100);
        queue.enqueue(PendingSubmission::Product(NewProduct::new("A", "1", "u")));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client =
            HubClient::new(ClientInfo::new("ana"), Uuid::new_v4(), "ws://localhost:9090");

        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[test]
    fn test_connection_state_values() {
        assert_ne!(ConnectionState::Disconnected, ConnectionState::Connected);
        assert_ne!(ConnectionState::Connecting, ConnectionState::Reconnecting);
    }
}
