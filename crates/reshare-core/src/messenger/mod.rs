//! Messenger service contract
//!
//! The messenger is the pub/sub service operators use to exchange DKG
//! traffic. The orchestrator only needs topic creation and node
//! registration; publishing and streaming are used by operator nodes.

use crate::Result;
use serde::{Deserialize, Serialize};

pub use ::async_trait::async_trait;

/// Topic every operator node subscribes to on registration
pub const DEFAULT_TOPIC: &str = "default";

/// Named channel scoped to a set of subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name (hex session identifier for resharing topics)
    pub topic_name: String,
    /// Subscribed operator IDs, stringified
    pub subscribers: Vec<String>,
}

impl Topic {
    /// Topic over a set of operator IDs
    pub fn for_operators(name: impl Into<String>, operator_ids: &[crate::OperatorId]) -> Self {
        Self {
            topic_name: name.into(),
            subscribers: operator_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// Node registration record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Operator ID, stringified
    pub name: String,
    /// Base URL the messenger forwards to
    pub address: String,
}

/// Result streams accepted by the messenger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Signed keygen/reshare outputs
    DkgOutput,
    /// Blame evidence from a failed ceremony
    DkgBlame,
}

impl StreamKind {
    /// URL path segment
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::DkgOutput => "dkgoutput",
            StreamKind::DkgBlame => "dkgblame",
        }
    }
}

/// Messenger capability
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Create a topic
    async fn create_topic(&self, topic: &Topic) -> Result<()>;

    /// Look up a topic by name
    async fn get_topic(&self, name: &str) -> Result<Option<Topic>>;

    /// Register a node under a topic (single attempt)
    async fn register_node(&self, subscriber: &Subscriber, topic: &str) -> Result<()>;

    /// Publish a payload to every subscriber of a topic
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Stream a result for a request
    async fn stream(&self, kind: StreamKind, request_id: &str, payload: &[u8]) -> Result<()>;
}

/// In-memory messenger for testing
pub mod memory;

pub use memory::MemoryMessenger;
