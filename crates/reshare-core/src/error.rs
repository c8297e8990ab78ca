//! Error types for resharing orchestration

use crate::OperatorId;
use thiserror::Error;

/// Result type alias for resharing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a resharing session or a messenger operation
#[derive(Debug, Error)]
pub enum Error {
    /// Operator specification is not of the form `ID=address`
    #[error("Operator {0} is not in the form of key=value")]
    MalformedOperatorSpec(String),

    /// Operator ID is not a non-negative integer
    #[error("Invalid operator ID in {token}: {reason}")]
    InvalidOperatorId { token: String, reason: String },

    /// Validator public key is not valid hex
    #[error("Invalid validator public key encoding: {0}")]
    InvalidPublicKeyEncoding(String),

    /// Threshold outside 1..=|new operators|
    #[error("Invalid threshold {threshold} for {operators} operators")]
    InvalidThreshold { threshold: usize, operators: usize },

    /// No operators to address
    #[error("Operator set is empty")]
    EmptyOperatorSet,

    /// Messenger refused or failed to create the session topic
    #[error("Failed to create topic on messenger service: {0}")]
    TopicProvisioningFailed(String),

    /// Building or signing the initiation payload failed
    #[error("Failed to compose initiation message: {0}")]
    MessageCompositionFailed(String),

    /// Every registration attempt failed
    #[error("Failed to register node after {attempts} attempts: {errors:?}")]
    RegistrationFailed { attempts: usize, errors: Vec<String> },

    /// Operator is unknown to the directory
    #[error("Operator not found: {0}")]
    OperatorNotFound(OperatorId),

    /// Directory lookup failed
    #[error("Directory error: {0}")]
    Directory(String),

    /// Key-value store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Messenger request failed
    #[error("Messenger error: {0}")]
    Messenger(String),

    /// Signer key could not be loaded
    #[error("Invalid signer key: {0}")]
    InvalidSignerKey(String),

    /// Signature does not verify
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signed outputs disagree on their request identifier
    #[error("Inconsistent identifier: expected {expected}, operator {operator_id} has {found}")]
    InconsistentIdentifier {
        operator_id: OperatorId,
        expected: String,
        found: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Session aborted by the caller
    #[error("Session cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
