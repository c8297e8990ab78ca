//! Operator-side messenger flows: protocol broadcast and result streaming

use crate::messages::{encode, SignedDkgMessage, TransportMessage};
use crate::messenger::{Messenger, StreamKind};
use crate::{Error, OperatorId, Result, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Keygen or reshare result of one operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputData {
    /// Session the output belongs to
    pub request_id: SessionId,
    /// Hex-encoded encrypted share
    pub encrypted_share: String,
    /// Hex-encoded public key of the share
    pub share_pub_key: String,
    /// Hex-encoded validator public key
    pub validator_pk: String,
}

/// Signature produced with the distributed key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignData {
    /// Session the signature belongs to
    pub request_id: SessionId,
    /// Hex-encoded signature
    pub validator_signature: String,
}

/// Output signed by the reporting operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOutput {
    /// Keygen output, if this is one
    pub data: Option<OutputData>,
    /// Key signature, if this is one
    pub key_sign_data: Option<KeySignData>,
    /// Reporting operator
    pub signer: OperatorId,
    /// Hex-encoded signature over the output
    pub signature: String,
}

impl SignedOutput {
    /// Session identifier carried by the output
    pub fn request_id(&self) -> Option<SessionId> {
        self.data
            .as_ref()
            .map(|d| d.request_id)
            .or_else(|| self.key_sign_data.as_ref().map(|k| k.request_id))
    }
}

/// Evidence against a misbehaving operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameOutput {
    /// Whether the blame is substantiated
    pub valid: bool,
    /// Offending message
    pub blame_message: SignedDkgMessage,
}

/// The request identifier shared by every output
///
/// Fails if the collection is empty, if an output carries no identifier, or
/// if two outputs disagree.
pub fn common_request_id(outputs: &BTreeMap<OperatorId, SignedOutput>) -> Result<SessionId> {
    let mut expected: Option<SessionId> = None;

    for (operator_id, output) in outputs {
        let found = output.request_id();
        match (expected, found) {
            (_, None) => {
                return Err(Error::InconsistentIdentifier {
                    operator_id: *operator_id,
                    expected: expected.map(|id| id.to_hex()).unwrap_or_default(),
                    found: "none".into(),
                })
            }
            (None, Some(id)) => expected = Some(id),
            (Some(exp), Some(id)) if exp != id => {
                return Err(Error::InconsistentIdentifier {
                    operator_id: *operator_id,
                    expected: exp.to_hex(),
                    found: id.to_hex(),
                })
            }
            _ => {}
        }
    }

    expected.ok_or(Error::EmptyOperatorSet)
}

/// Stream signed outputs of a session to the messenger
#[instrument(skip_all, fields(outputs = outputs.len()))]
pub async fn stream_dkg_output<M: Messenger + ?Sized>(
    messenger: &M,
    outputs: &BTreeMap<OperatorId, SignedOutput>,
) -> Result<()> {
    let request_id = common_request_id(outputs)?;
    let data = encode(outputs)?;

    messenger
        .stream(StreamKind::DkgOutput, &request_id.to_hex(), &data)
        .await?;
    debug!(request_id = %request_id, "Output streamed");
    Ok(())
}

/// Stream blame evidence to the messenger
#[instrument(skip_all)]
pub async fn stream_dkg_blame<M: Messenger + ?Sized>(messenger: &M, blame: &BlameOutput) -> Result<()> {
    let request_id = blame.blame_message.message.identifier.to_hex();
    let data = encode(blame)?;

    messenger
        .stream(StreamKind::DkgBlame, &request_id, &data)
        .await?;
    debug!(request_id = %request_id, "Blame streamed");
    Ok(())
}

/// Publish a signed DKG message on its session topic
#[instrument(skip_all, fields(session_id = %message.message.identifier))]
pub async fn broadcast_dkg_message<M: Messenger + ?Sized>(
    messenger: &M,
    message: &SignedDkgMessage,
) -> Result<()> {
    let payload = encode(&TransportMessage::dkg(message)?)?;
    messenger
        .publish(&message.message.identifier.to_hex(), &payload)
        .await
}
