//! Initiation message construction

use crate::messages::{encode, DkgMessage, DkgMsgType, ReshareParams, TransportMessage};
use crate::signer::CryptoSigner;
use crate::{Error, ResharingSession, Result, SessionId};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Signed initiation payload, identical for every recipient
#[derive(Debug, Clone)]
pub struct InitiationMessage {
    session_id: SessionId,
    payload: Arc<[u8]>,
}

impl InitiationMessage {
    /// Session the message belongs to
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Encoded payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Shared handle to the payload
    pub(crate) fn shared_payload(&self) -> Arc<[u8]> {
        Arc::clone(&self.payload)
    }
}

/// Reshare parameters derived from a session
pub fn reshare_params(session: &ResharingSession) -> ReshareParams {
    ReshareParams {
        operator_ids: session.new_operator_ids(),
        threshold: session.threshold,
        validator_pk: hex::encode(&session.validator_pk),
        old_operator_ids: session.old_operator_ids(),
    }
}

/// Build and sign the initiation message for a session
///
/// Any failure is reported as [`Error::MessageCompositionFailed`].
#[instrument(skip_all, fields(session_id = %session.session_id, signer = signer.signer_id()))]
pub fn compose_initiation<S: CryptoSigner + ?Sized>(
    session: &ResharingSession,
    signer: &S,
) -> Result<InitiationMessage> {
    let payload = build_payload(session, signer)
        .map_err(|e| Error::MessageCompositionFailed(e.to_string()))?;
    debug!(bytes = payload.len(), "Initiation message composed");

    Ok(InitiationMessage {
        session_id: session.session_id,
        payload: payload.into(),
    })
}

fn build_payload<S: CryptoSigner + ?Sized>(session: &ResharingSession, signer: &S) -> Result<Vec<u8>> {
    let message = DkgMessage {
        msg_type: DkgMsgType::Reshare,
        identifier: session.session_id,
        data: encode(&reshare_params(session))?,
    };
    let signed = signer.sign_message(message)?;
    encode(&TransportMessage::dkg(&signed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{decode, SignedDkgMessage};
    use crate::signer::Ed25519Signer;
    use crate::{OperatorId, ResharingRequest};

    struct FailingSigner;

    impl CryptoSigner for FailingSigner {
        fn signer_id(&self) -> OperatorId {
            1
        }

        fn sign_message(&self, _message: DkgMessage) -> Result<SignedDkgMessage> {
            Err(Error::InvalidSignerKey("no key loaded".into()))
        }
    }

    fn session() -> ResharingSession {
        ResharingSession::from_request(&ResharingRequest {
            operators: vec!["1=http://a".into(), "2=http://b".into()],
            old_operators: vec!["1=http://a".into(), "3=http://c".into()],
            threshold: 2,
            validator_pk: "ab12".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_compose_layers() {
        let session = session();
        let signer = Ed25519Signer::generate(1);
        let initiation = compose_initiation(&session, &signer).unwrap();

        assert_eq!(initiation.session_id(), session.session_id);

        let transport: TransportMessage = decode(initiation.payload()).unwrap();
        let signed = transport.signed_dkg_message().unwrap();
        signed.verify(&signer.verifying_key()).unwrap();

        assert_eq!(signed.signer, 1);
        assert_eq!(signed.message.msg_type, DkgMsgType::Reshare);
        assert_eq!(signed.message.identifier, session.session_id);

        let params: ReshareParams = decode(&signed.message.data).unwrap();
        assert_eq!(params.operator_ids, vec![1, 2]);
        assert_eq!(params.old_operator_ids, vec![1, 3]);
        assert_eq!(params.threshold, 2);
        assert_eq!(params.validator_pk, "ab12");
    }

    #[test]
    fn test_signer_failure_is_composition_error() {
        assert!(matches!(
            compose_initiation(&session(), &FailingSigner),
            Err(Error::MessageCompositionFailed(_))
        ));
    }
}
