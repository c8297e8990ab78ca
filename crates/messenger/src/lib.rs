//! Messenger Store
//!
//! Provides the state behind the messenger service: topics and their
//! subscribers, registered operator nodes, published messages kept for a
//! limited time, and streamed ceremony results.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Topic with its subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRecord {
    /// Topic name
    pub name: String,
    /// Subscriber names (operator IDs)
    pub subscribers: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Registered operator node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node name (operator ID)
    pub name: String,
    /// Base URL of the node
    pub address: String,
    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
}

/// Published message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Content hash
    pub hash: String,
    /// Topic the message was published on
    pub topic: String,
    /// Message payload
    pub payload: Vec<u8>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
}

/// Streamed ceremony result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Stream kind (`dkgoutput`, `dkgblame`)
    pub kind: String,
    /// Request identifier
    pub request_id: String,
    /// Payload as received
    pub payload: Vec<u8>,
    /// Arrival timestamp
    pub received_at: DateTime<Utc>,
}

/// Content hash of a message on a topic
pub fn message_hash(topic: &str, payload: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(topic.as_bytes());
    hasher.update(b":");
    hasher.update(payload);
    hex::encode(hasher.finalize().as_bytes())
}

/// Messenger state
#[derive(Clone)]
pub struct MessengerStore {
    /// Topics by name
    topics: Arc<DashMap<String, TopicRecord>>,
    /// Nodes by name
    nodes: Arc<DashMap<String, NodeRecord>>,
    /// Messages indexed by hash
    messages: Arc<DashMap<String, StoredMessage>>,
    /// Streams by (kind, request ID)
    streams: Arc<DashMap<(String, String), StreamRecord>>,
    /// Message TTL in seconds
    ttl_seconds: i64,
}

impl MessengerStore {
    /// Create a new store
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            nodes: Arc::new(DashMap::new()),
            messages: Arc::new(DashMap::new()),
            streams: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    /// Create or replace a topic
    pub fn create_topic(&self, name: &str, subscribers: Vec<String>) -> Result<TopicRecord> {
        if name.is_empty() {
            return Err(StoreError::InvalidRequest("empty topic name".into()));
        }
        if subscribers.is_empty() {
            return Err(StoreError::InvalidRequest(format!(
                "topic {} has no subscribers",
                name
            )));
        }

        let record = TopicRecord {
            name: name.to_string(),
            subscribers,
            created_at: Utc::now(),
        };
        self.topics.insert(name.to_string(), record.clone());
        Ok(record)
    }

    /// Get a topic by name
    pub fn get_topic(&self, name: &str) -> Result<TopicRecord> {
        self.topics
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("topic {}", name)))
    }

    /// Register a node and subscribe it to a topic, creating the topic if needed
    pub fn register_node(&self, name: &str, address: &str, topic: &str) -> Result<NodeRecord> {
        if name.is_empty() || address.is_empty() {
            return Err(StoreError::InvalidRequest(
                "node name and address are required".into(),
            ));
        }

        let record = NodeRecord {
            name: name.to_string(),
            address: address.to_string(),
            registered_at: Utc::now(),
        };
        self.nodes.insert(name.to_string(), record.clone());

        let mut entry = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicRecord {
                name: topic.to_string(),
                subscribers: Vec::new(),
                created_at: Utc::now(),
            });
        if !entry.subscribers.iter().any(|s| s == name) {
            entry.subscribers.push(name.to_string());
        }

        Ok(record)
    }

    /// Get a node by name
    pub fn get_node(&self, name: &str) -> Result<NodeRecord> {
        self.nodes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("node {}", name)))
    }

    /// Store a message on an existing topic, returning its hash
    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String> {
        if !self.topics.contains_key(topic) {
            return Err(StoreError::NotFound(format!("topic {}", topic)));
        }

        let now = Utc::now();
        let hash = message_hash(topic, &payload);
        let message = StoredMessage {
            hash: hash.clone(),
            topic: topic.to_string(),
            payload,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.ttl_seconds),
        };

        self.messages.insert(hash.clone(), message);
        debug!(topic, hash = %hash, "Message stored");
        Ok(hash)
    }

    /// Messages on a topic, oldest first
    pub fn topic_messages(&self, topic: &str) -> Vec<StoredMessage> {
        let mut messages: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|entry| entry.topic == topic)
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    /// Record a streamed result, replacing an earlier one for the same request
    pub fn put_stream(&self, kind: &str, request_id: &str, payload: Vec<u8>) -> Result<()> {
        if request_id.is_empty() {
            return Err(StoreError::InvalidRequest("empty request_id".into()));
        }

        let record = StreamRecord {
            kind: kind.to_string(),
            request_id: request_id.to_string(),
            payload,
            received_at: Utc::now(),
        };
        self.streams
            .insert((kind.to_string(), request_id.to_string()), record);
        Ok(())
    }

    /// Get a streamed result
    pub fn get_stream(&self, kind: &str, request_id: &str) -> Result<StreamRecord> {
        self.streams
            .get(&(kind.to_string(), request_id.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("{} for {}", kind, request_id)))
    }

    /// Remove expired messages
    pub fn cleanup(&self) {
        let now = Utc::now();
        self.messages.retain(|_, v| v.expires_at > now);
    }
}

impl Default for MessengerStore {
    fn default() -> Self {
        Self::new(3600) // 1 hour default TTL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_hash() {
        assert_eq!(message_hash("t", b"a"), message_hash("t", b"a"));
        assert_ne!(message_hash("t", b"a"), message_hash("u", b"a"));
    }

    #[test]
    fn test_topic_rules() {
        let store = MessengerStore::default();

        assert!(matches!(
            store.create_topic("abcd", vec![]),
            Err(StoreError::InvalidRequest(_))
        ));
        assert!(matches!(store.get_topic("abcd"), Err(StoreError::NotFound(_))));

        store
            .create_topic("abcd", vec!["1".into(), "2".into()])
            .unwrap();
        assert_eq!(store.get_topic("abcd").unwrap().subscribers, vec!["1", "2"]);
    }

    #[test]
    fn test_register_subscribes_once() {
        let store = MessengerStore::default();

        store.register_node("1", "http://a", "default").unwrap();
        store.register_node("1", "http://a2", "default").unwrap();

        assert_eq!(store.get_topic("default").unwrap().subscribers, vec!["1"]);
        assert_eq!(store.get_node("1").unwrap().address, "http://a2");
    }

    #[test]
    fn test_publish_requires_topic() {
        let store = MessengerStore::default();
        assert!(store.publish("abcd", vec![1]).is_err());

        store.create_topic("abcd", vec!["1".into()]).unwrap();
        let hash = store.publish("abcd", vec![1, 2, 3]).unwrap();

        let messages = store.topic_messages("abcd");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].hash, hash);
        assert_eq!(messages[0].payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_cleanup_drops_expired() {
        let store = MessengerStore::new(-1);
        store.create_topic("abcd", vec!["1".into()]).unwrap();
        store.publish("abcd", vec![1]).unwrap();

        store.cleanup();

        assert!(store.topic_messages("abcd").is_empty());
    }

    #[test]
    fn test_streams() {
        let store = MessengerStore::default();
        store.put_stream("dkgoutput", "ab", b"{}".to_vec()).unwrap();

        assert_eq!(store.get_stream("dkgoutput", "ab").unwrap().payload, b"{}");
        assert!(store.get_stream("dkgblame", "ab").is_err());
        assert!(store.put_stream("dkgoutput", "", vec![]).is_err());
    }
}
