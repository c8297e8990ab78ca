//! Signing capability for initiation messages

use crate::messages::{DkgMessage, SignedDkgMessage};
use crate::{Error, OperatorId, Result};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

/// Produces signed DKG envelopes
pub trait CryptoSigner: Send + Sync {
    /// Operator ID recorded as the signer
    fn signer_id(&self) -> OperatorId;

    /// Sign a DKG message
    fn sign_message(&self, message: DkgMessage) -> Result<SignedDkgMessage>;
}

/// Ed25519 signer with a configured identity
pub struct Ed25519Signer {
    id: OperatorId,
    key: SigningKey,
}

impl Ed25519Signer {
    /// Create a signer from a key
    pub fn new(id: OperatorId, key: SigningKey) -> Self {
        Self { id, key }
    }

    /// Load a signer from a hex-encoded 32-byte seed
    pub fn from_hex_seed(id: OperatorId, seed_hex: &str) -> Result<Self> {
        let seed = Zeroizing::new(
            hex::decode(seed_hex.trim()).map_err(|e| Error::InvalidSignerKey(e.to_string()))?,
        );
        let seed: &[u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidSignerKey("seed must be 32 bytes".into()))?;
        Ok(Self::new(id, SigningKey::from_bytes(seed)))
    }

    /// Generate a fresh random signer
    pub fn generate(id: OperatorId) -> Self {
        Self::new(id, SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Public half of the signing key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Hex-encoded seed, for persisting a generated key
    pub fn seed_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.key.to_bytes()))
    }
}

impl CryptoSigner for Ed25519Signer {
    fn signer_id(&self) -> OperatorId {
        self.id
    }

    fn sign_message(&self, message: DkgMessage) -> Result<SignedDkgMessage> {
        let root = message.signing_root()?;
        let signature = self.key.sign(&root);

        Ok(SignedDkgMessage {
            message,
            signer: self.id,
            signature: signature.to_bytes().to_vec(),
        })
    }
}
