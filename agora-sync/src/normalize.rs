//! Entity normalization for the message log.
//!
//! Converts the nested message graph into flat entity tables for
//! transmission, and back:
//!
//! ```text
//! MessageSet { id, post: [ChatMessage { id, author: Author, … }] }
//!       │ normalize                         ▲ denormalize
//!       ▼                                   │
//! NormalizedMessageSet {
//!     result: id,
//!     entities: {
//!         autor: { email → Author },
//!         doc:   { id → DocEntity  (author replaced by email ref) },
//!         post:  { id → PostEntity (doc replaced by id ref) },
//!         posts: { id → PostsEntity (ordered id list) },
//!     }
//! }
//! ```
//!
//! The walk is posts → post → doc → author: each nested object is hoisted
//! into its per-entity table keyed by its identity attribute, and a
//! reference key takes its place. An author embedded by many messages is
//! stored once, keyed by email.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 2

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root identity of the message log entity.
pub const MESSAGE_ROOT_ID: &str = "mensajes";

/// Message author. Identity = `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub email: String,
    pub name: String,
    pub avatar: String,
}

impl Author {
    pub fn new(
        email: impl Into<String>,
        name: impl Into<String>,
        avatar: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            avatar: avatar.into(),
        }
    }
}

/// A chat message with its embedded author. Identity = `id` (opaque).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub author: Author,
    pub content: String,
    pub timestamp: String,
}

impl ChatMessage {
    /// Create a message with a freshly assigned opaque id.
    pub fn new(author: Author, content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author,
            content: content.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// The nested root object handed to [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSet {
    pub id: String,
    pub post: Vec<ChatMessage>,
}

impl MessageSet {
    /// Wrap the full message log under the canonical root id.
    pub fn from_log(post: Vec<ChatMessage>) -> Self {
        Self {
            id: MESSAGE_ROOT_ID.to_string(),
            post,
        }
    }
}

/// Message body with the author replaced by its email reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocEntity {
    pub id: String,
    pub author: String,
    pub content: String,
    pub timestamp: String,
}

/// Message entry referencing its body by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntity {
    pub id: String,
    pub doc: String,
}

/// Root entry carrying the ordered message id list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostsEntity {
    pub id: String,
    pub post: Vec<String>,
}

/// Per-entity-type tables keyed by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub autor: HashMap<String, Author>,
    pub doc: HashMap<String, DocEntity>,
    pub post: HashMap<String, PostEntity>,
    pub posts: HashMap<String, PostsEntity>,
}

/// The flat, reference-based form of a [`MessageSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessageSet {
    pub result: String,
    pub entities: Entities,
}

impl NormalizedMessageSet {
    /// Number of distinct authors in the set.
    pub fn author_count(&self) -> usize {
        self.entities.autor.len()
    }

    /// Number of messages in the set.
    pub fn message_count(&self) -> usize {
        self.entities.post.len()
    }
}

/// Errors raised when rehydrating a normalized set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// The `result` key has no entry in the posts table.
    MissingRoot(String),
    /// A message id listed by the root has no post entry.
    MissingPost(String),
    /// A post references a doc id with no entry.
    MissingDoc(String),
    /// A doc references an author email with no entry.
    MissingAuthor(String),
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRoot(id) => write!(f, "Missing root entity: {id}"),
            Self::MissingPost(id) => write!(f, "Missing post entity: {id}"),
            Self::MissingDoc(id) => write!(f, "Missing doc entity: {id}"),
            Self::MissingAuthor(email) => write!(f, "Missing author entity: {email}"),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Flatten a nested message set into entity tables.
///
/// Pure and deterministic given input order. Duplicate identity keys
/// overwrite in traversal order (last write wins) — the tables never
/// merge divergent copies.
pub fn normalize(set: &MessageSet) -> NormalizedMessageSet {
    let mut entities = Entities::default();
    let mut ids = Vec::with_capacity(set.post.len());

    for msg in &set.post {
        entities
            .autor
            .insert(msg.author.email.clone(), msg.author.clone());

        entities.doc.insert(
            msg.id.clone(),
            DocEntity {
                id: msg.id.clone(),
                author: msg.author.email.clone(),
                content: msg.content.clone(),
                timestamp: msg.timestamp.clone(),
            },
        );

        entities.post.insert(
            msg.id.clone(),
            PostEntity {
                id: msg.id.clone(),
                doc: msg.id.clone(),
            },
        );

        ids.push(msg.id.clone());
    }

    entities.posts.insert(
        set.id.clone(),
        PostsEntity {
            id: set.id.clone(),
            post: ids,
        },
    );

    NormalizedMessageSet {
        result: set.id.clone(),
        entities,
    }
}

/// Rehydrate the nested shape from `result` + `entities`.
///
/// Inverse of [`normalize`] for inputs without duplicate identity keys.
pub fn denormalize(normalized: &NormalizedMessageSet) -> Result<MessageSet, NormalizeError> {
    let root = normalized
        .entities
        .posts
        .get(&normalized.result)
        .ok_or_else(|| NormalizeError::MissingRoot(normalized.result.clone()))?;

    let mut post = Vec::with_capacity(root.post.len());
    for id in &root.post {
        let entry = normalized
            .entities
            .post
            .get(id)
            .ok_or_else(|| NormalizeError::MissingPost(id.clone()))?;
        let doc = normalized
            .entities
            .doc
            .get(&entry.doc)
            .ok_or_else(|| NormalizeError::MissingDoc(entry.doc.clone()))?;
        let author = normalized
            .entities
            .autor
            .get(&doc.author)
            .ok_or_else(|| NormalizeError::MissingAuthor(doc.author.clone()))?;

        post.push(ChatMessage {
            id: entry.id.clone(),
            author: author.clone(),
            content: doc.content.clone(),
            timestamp: doc.timestamp.clone(),
        });
    }

    Ok(MessageSet {
        id: root.id.clone(),
        post,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, email: &str, name: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            author: Author::new(email, name, "https://avatars.test/a.png"),
            content: content.to_string(),
            timestamp: "2024-05-01T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_normalize_single_message() {
        let set = MessageSet::from_log(vec![msg("m1", "a@x", "Ana", "hola")]);
        let normalized = normalize(&set);

        assert_eq!(normalized.result, MESSAGE_ROOT_ID);
        assert_eq!(normalized.entities.autor.len(), 1);
        assert_eq!(normalized.entities.doc.len(), 1);
        assert_eq!(normalized.entities.post.len(), 1);

        let doc = &normalized.entities.doc["m1"];
        assert_eq!(doc.author, "a@x");
        assert_eq!(doc.content, "hola");

        let root = &normalized.entities.posts[MESSAGE_ROOT_ID];
        assert_eq!(root.post, vec!["m1"]);
    }

    #[test]
    fn test_shared_author_stored_once() {
        let set = MessageSet::from_log(vec![
            msg("m1", "a@x", "Ana", "first"),
            msg("m2", "a@x", "Ana", "second"),
            msg("m3", "b@x", "Bruno", "third"),
        ]);
        let normalized = normalize(&set);

        assert_eq!(normalized.author_count(), 2);
        assert_eq!(normalized.message_count(), 3);
        assert_eq!(normalized.entities.doc["m1"].author, "a@x");
        assert_eq!(normalized.entities.doc["m2"].author, "a@x");
        assert_eq!(normalized.entities.doc["m3"].author, "b@x");
    }

    #[test]
    fn test_duplicate_divergent_author_last_write_wins() {
        let set = MessageSet::from_log(vec![
            msg("m1", "a@x", "A1", "first"),
            msg("m2", "a@x", "A2", "second"),
        ]);
        let normalized = normalize(&set);

        // Exactly one entry for a@x, carrying the later name.
        assert_eq!(normalized.entities.autor.len(), 1);
        assert_eq!(normalized.entities.autor["a@x"].name, "A2");
    }

    #[test]
    fn test_round_trip() {
        let set = MessageSet::from_log(vec![
            msg("m1", "a@x", "Ana", "hola"),
            msg("m2", "b@x", "Bruno", "buenas"),
            msg("m3", "c@x", "Carla", "qué tal"),
        ]);
        let rehydrated = denormalize(&normalize(&set)).unwrap();
        assert_eq!(rehydrated, set);
    }

    #[test]
    fn test_round_trip_shared_author() {
        let set = MessageSet::from_log(vec![
            msg("m1", "a@x", "Ana", "one"),
            msg("m2", "a@x", "Ana", "two"),
        ]);
        let rehydrated = denormalize(&normalize(&set)).unwrap();
        assert_eq!(rehydrated, set);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let set = MessageSet::from_log(vec![
            msg("z", "a@x", "Ana", "last id, first position"),
            msg("a", "a@x", "Ana", "first id, last position"),
        ]);
        let rehydrated = denormalize(&normalize(&set)).unwrap();
        assert_eq!(rehydrated.post[0].id, "z");
        assert_eq!(rehydrated.post[1].id, "a");
    }

    #[test]
    fn test_empty_set() {
        let set = MessageSet::from_log(Vec::new());
        let normalized = normalize(&set);

        assert_eq!(normalized.author_count(), 0);
        assert_eq!(normalized.message_count(), 0);
        assert!(normalized.entities.posts[MESSAGE_ROOT_ID].post.is_empty());

        let rehydrated = denormalize(&normalized).unwrap();
        assert_eq!(rehydrated, set);
    }

    #[test]
    fn test_denormalize_missing_root() {
        let normalized = NormalizedMessageSet {
            result: "nowhere".to_string(),
            entities: Entities::default(),
        };
        assert_eq!(
            denormalize(&normalized),
            Err(NormalizeError::MissingRoot("nowhere".to_string()))
        );
    }

    #[test]
    fn test_denormalize_dangling_author() {
        let mut normalized = normalize(&MessageSet::from_log(vec![msg("m1", "a@x", "Ana", "hi")]));
        normalized.entities.autor.clear();

        assert_eq!(
            denormalize(&normalized),
            Err(NormalizeError::MissingAuthor("a@x".to_string()))
        );
    }

    #[test]
    fn test_denormalize_dangling_doc() {
        let mut normalized = normalize(&MessageSet::from_log(vec![msg("m1", "a@x", "Ana", "hi")]));
        normalized.entities.doc.clear();

        assert_eq!(
            denormalize(&normalized),
            Err(NormalizeError::MissingDoc("m1".to_string()))
        );
    }

    #[test]
    fn test_normalize_deterministic() {
        let set = MessageSet::from_log(vec![
            msg("m1", "a@x", "Ana", "one"),
            msg("m2", "b@x", "Bruno", "two"),
        ]);
        assert_eq!(normalize(&set), normalize(&set));
    }

    #[test]
    fn test_chat_message_new_assigns_id() {
        let a = ChatMessage::new(Author::new("a@x", "Ana", ""), "hi", "t0");
        let b = ChatMessage::new(Author::new("a@x", "Ana", ""), "hi", "t0");
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_error_display() {
        let err = NormalizeError::MissingAuthor("a@x".to_string());
        assert!(err.to_string().contains("a@x"));
    }
}
