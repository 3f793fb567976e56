//! # agora-sync — Real-time storefront synchronization hub
//!
//! Keeps every connected client eventually consistent with two shared,
//! durably persisted collections: a product catalog and a message log.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ HubClient   │ ◄─────────────────► │ HubServer   │── SessionGate
//! │ (per user)  │     Binary Proto    │ (central)   │   (handshake)
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                       ┌───────────┐ ┌───────────┐ ┌───────────────┐
//!                       │ products  │ │ messages  │ │ConnectionGroup│
//!                       │ (RocksDB) │ │ (RocksDB) │ │ (fan-out)     │
//!                       └───────────┘ └─────┬─────┘ └───────────────┘
//!                                           │
//!                                      normalize()
//! ```
//!
//! Every mutation re-fetches the entire affected collection and resends
//! it to all connections; the message log is normalized into flat entity
//! tables before transmission.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded frames)
//! - [`store`] — Append-only per-collection RocksDB store
//! - [`normalize`] — Nested message graph ⇄ entity tables
//! - [`session`] — Session registry and admission gate
//! - [`broadcast`] — Fan-out to every live connection
//! - [`server`] — WebSocket hub
//! - [`client`] — WebSocket client with pending-submission queue

pub mod broadcast;
pub mod client;
pub mod normalize;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use broadcast::{ClientInfo, ConnectionGroup, FanoutStats};
pub use client::{ClientEvent, ConnectionState, HubClient, PendingQueue};
pub use normalize::{
    denormalize, normalize, Author, ChatMessage, DocEntity, Entities, MessageSet,
    NormalizeError, NormalizedMessageSet, PostEntity, PostsEntity, MESSAGE_ROOT_ID,
};
pub use protocol::{EventKind, Frame, NewProduct, Product, ProtocolError};
pub use server::{HubConfig, HubServer, HubStats};
pub use session::{Admission, SessionGate, SessionRegistry, SessionState};
pub use store::{Collection, StoreConfig, StoreError};
