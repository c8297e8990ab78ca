//! In-memory messenger implementation for testing

use super::{async_trait, Messenger, StreamKind, Subscriber, Topic};
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory messenger with failure injection
#[derive(Default)]
pub struct MemoryMessenger {
    /// Topics by name
    topics: Arc<DashMap<String, Topic>>,
    /// Registered subscribers per topic
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    /// Published payloads per topic
    published: Arc<DashMap<String, Vec<Vec<u8>>>>,
    /// Streamed payloads in arrival order
    streamed: Mutex<Vec<(StreamKind, String, Vec<u8>)>>,
    /// Reject topic creation
    fail_topics: AtomicBool,
    /// Number of upcoming registrations to reject
    failing_registrations: AtomicUsize,
    create_topic_calls: AtomicUsize,
    register_calls: AtomicUsize,
}

impl MemoryMessenger {
    /// Create a new in-memory messenger
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every topic creation fail
    pub fn fail_topic_creation(self) -> Self {
        self.fail_topics.store(true, Ordering::SeqCst);
        self
    }

    /// Reject the next `count` registrations
    pub fn fail_registrations(self, count: usize) -> Self {
        self.failing_registrations.store(count, Ordering::SeqCst);
        self
    }

    /// Number of topic creation calls seen
    pub fn create_topic_calls(&self) -> usize {
        self.create_topic_calls.load(Ordering::SeqCst)
    }

    /// Number of registration calls seen
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Subscribers registered under a topic
    pub fn subscribers(&self, topic: &str) -> Vec<Subscriber> {
        self.subscribers
            .get(topic)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Payloads published to a topic
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .get(topic)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Streamed payloads
    pub fn streamed(&self) -> Vec<(StreamKind, String, Vec<u8>)> {
        self.streamed
            .lock()
            .map(|streamed| streamed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Messenger for MemoryMessenger {
    async fn create_topic(&self, topic: &Topic) -> Result<()> {
        self.create_topic_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_topics.load(Ordering::SeqCst) {
            return Err(Error::Messenger("createTopic returned status 500".into()));
        }
        self.topics.insert(topic.topic_name.clone(), topic.clone());
        Ok(())
    }

    async fn get_topic(&self, name: &str) -> Result<Option<Topic>> {
        Ok(self.topics.get(name).map(|entry| entry.value().clone()))
    }

    async fn register_node(&self, subscriber: &Subscriber, topic: &str) -> Result<()> {
        let call = self.register_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let rejected = self
            .failing_registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(Error::Messenger(format!(
                "register_node returned status 503 on call {}",
                call
            )));
        }

        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(subscriber.clone());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.topics.contains_key(topic) {
            return Err(Error::Messenger(format!("unknown topic {}", topic)));
        }
        self.published
            .entry(topic.to_string())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }

    async fn stream(&self, kind: StreamKind, request_id: &str, payload: &[u8]) -> Result<()> {
        let mut streamed = self
            .streamed
            .lock()
            .map_err(|_| Error::Messenger("stream log poisoned".into()))?;
        streamed.push((kind, request_id.to_string(), payload.to_vec()));
        Ok(())
    }
}
