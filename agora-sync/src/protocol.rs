//! Binary protocol for the event channel.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┐
//! │ kind     │ client_id │ payload  │
//! │ 1 byte   │ 16 bytes  │ variable │
//! └──────────┴───────────┴──────────┘
//! ```
//!
//! Inbound events carry the submitting client's id; frames originated by
//! the hub carry the nil id. Payloads are bincode-encoded typed records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize::{ChatMessage, NormalizedMessageSet};

/// Named events of the sync channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// Client requests a full snapshot of both collections
    ClientReady = 1,
    /// Client submits a new product (no id)
    ProductSubmitted = 2,
    /// Client submits a new chat message
    MessageSubmitted = 3,
    /// Hub pushes the full product list
    ProductList = 4,
    /// Hub pushes the full normalized message set
    MessageSet = 5,
    /// Heartbeat ping
    Ping = 6,
    /// Heartbeat pong
    Pong = 7,
}

impl EventKind {
    /// Channel name as it appears on the wire contract.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ClientReady => "client-ready",
            Self::ProductSubmitted => "product-submitted",
            Self::MessageSubmitted => "message-submitted",
            Self::ProductList => "product-list",
            Self::MessageSet => "message-set",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// A catalog product. Identity = `id`, assigned by the store at append time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    /// Decimal price kept as a string, exactly as submitted
    pub price: String,
    pub photo: String,
}

impl Product {
    /// Build the stored record from a submission and its assigned id.
    pub fn from_submission(id: u64, submission: NewProduct) -> Self {
        Self {
            id,
            name: submission.name,
            price: submission.price,
            photo: submission.photo,
        }
    }
}

/// A client-submitted product, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price: String,
    pub photo: String,
}

impl NewProduct {
    pub fn new(
        name: impl Into<String>,
        price: impl Into<String>,
        photo: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            price: price.into(),
            photo: photo.into(),
        }
    }
}

/// Top-level protocol frame.
///
/// Serialized with bincode for minimal overhead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub kind: EventKind,
    pub client_id: Uuid,
    /// Frame payload (varies by kind)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a snapshot request (no payload).
    pub fn client_ready(client_id: Uuid) -> Self {
        Self {
            kind: EventKind::ClientReady,
            client_id,
            payload: Vec::new(),
        }
    }

    /// Create a product submission.
    pub fn product_submitted(client_id: Uuid, product: &NewProduct) -> Self {
        let payload = bincode::serde::encode_to_vec(product, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: EventKind::ProductSubmitted,
            client_id,
            payload,
        }
    }

    /// Create a message submission.
    pub fn message_submitted(client_id: Uuid, message: &ChatMessage) -> Self {
        let payload = bincode::serde::encode_to_vec(message, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: EventKind::MessageSubmitted,
            client_id,
            payload,
        }
    }

    /// Create a full product-list push (hub-originated).
    pub fn product_list(products: &[Product]) -> Self {
        let payload = bincode::serde::encode_to_vec(products, bincode::config::standard())
            .unwrap_or_default();
        Self {
            kind: EventKind::ProductList,
            client_id: Uuid::nil(),
            payload,
        }
    }

    /// Create a full message-set push (hub-originated).
    pub fn message_set(set: &NormalizedMessageSet) -> Self {
        let payload =
            bincode::serde::encode_to_vec(set, bincode::config::standard()).unwrap_or_default();
        Self {
            kind: EventKind::MessageSet,
            client_id: Uuid::nil(),
            payload,
        }
    }

    /// Create a ping frame.
    pub fn ping(client_id: Uuid) -> Self {
        Self {
            kind: EventKind::Ping,
            client_id,
            payload: Vec::new(),
        }
    }

    /// Create a pong frame.
    pub fn pong(client_id: Uuid) -> Self {
        Self {
            kind: EventKind::Pong,
            client_id,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }

    /// Parse a product-submission payload.
    pub fn new_product(&self) -> Result<NewProduct, ProtocolError> {
        if self.kind != EventKind::ProductSubmitted {
            return Err(ProtocolError::InvalidEventKind);
        }
        let (product, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(product)
    }

    /// Parse a message-submission payload.
    pub fn chat_message(&self) -> Result<ChatMessage, ProtocolError> {
        if self.kind != EventKind::MessageSubmitted {
            return Err(ProtocolError::InvalidEventKind);
        }
        let (message, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(message)
    }

    /// Parse a product-list payload.
    pub fn products(&self) -> Result<Vec<Product>, ProtocolError> {
        if self.kind != EventKind::ProductList {
            return Err(ProtocolError::InvalidEventKind);
        }
        let (products, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(products)
    }

    /// Parse a message-set payload.
    pub fn normalized_messages(&self) -> Result<NormalizedMessageSet, ProtocolError> {
        if self.kind != EventKind::MessageSet {
            return Err(ProtocolError::InvalidEventKind);
        }
        let (set, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(set)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidEventKind,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidEventKind => write!(f, "Invalid event kind"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
