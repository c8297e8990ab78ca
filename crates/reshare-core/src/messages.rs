//! DKG message envelopes
//!
//! An initiation payload is built in three layers:
//! - [`ReshareParams`], encoded into the data of a [`DkgMessage`]
//! - [`SignedDkgMessage`], the DKG message plus the initiator's signature
//! - [`TransportMessage`], the outer envelope tagged for the DKG subsystem

use crate::{Error, OperatorId, Result, SessionId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Parameters of a resharing ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshareParams {
    /// New operator set
    pub operator_ids: Vec<OperatorId>,
    /// Threshold for the new set
    pub threshold: u16,
    /// Validator public key (hex)
    pub validator_pk: String,
    /// Old operator set
    pub old_operator_ids: Vec<OperatorId>,
}

/// DKG message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DkgMsgType {
    /// Fresh key generation
    Init,
    /// Resharing of an existing key
    Reshare,
}

/// Unsigned DKG message addressed by session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgMessage {
    /// Message type
    pub msg_type: DkgMsgType,
    /// Session identifier
    pub identifier: SessionId,
    /// Encoded body
    pub data: Vec<u8>,
}

impl DkgMessage {
    /// SHA-256 over the encoded message; this is what gets signed
    pub fn signing_root(&self) -> Result<[u8; 32]> {
        let encoded = encode(self)?;
        Ok(Sha256::digest(&encoded).into())
    }
}

/// DKG message with the signer's identity and signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDkgMessage {
    /// Signed message
    pub message: DkgMessage,
    /// Operator ID of the signer
    pub signer: OperatorId,
    /// Signature over the message signing root
    pub signature: Vec<u8>,
}

impl SignedDkgMessage {
    /// Verify the signature against a public key
    pub fn verify(&self, public_key: &ed25519_dalek::VerifyingKey) -> Result<()> {
        let signature = ed25519_dalek::Signature::from_slice(&self.signature)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        public_key
            .verify_strict(&self.message.signing_root()?, &signature)
            .map_err(|_| Error::InvalidSignature)
    }
}

/// Subsystem a transport message is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Consensus traffic
    Consensus,
    /// DKG traffic
    Dkg,
}

/// Outer envelope delivered to operator nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Routing tag
    pub msg_type: TransportKind,
    /// Encoded inner message
    pub data: Vec<u8>,
}

impl TransportMessage {
    /// Wrap a signed DKG message
    pub fn dkg(signed: &SignedDkgMessage) -> Result<Self> {
        Ok(Self {
            msg_type: TransportKind::Dkg,
            data: encode(signed)?,
        })
    }

    /// Unwrap the signed DKG message
    pub fn signed_dkg_message(&self) -> Result<SignedDkgMessage> {
        if self.msg_type != TransportKind::Dkg {
            return Err(Error::Deserialization(format!(
                "Expected DKG transport message, got {:?}",
                self.msg_type
            )));
        }
        decode(&self.data)
    }
}

/// Encode a message layer
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a message layer
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}
