//! Core types shared across the resharing flow

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Identifier of an operator within a session
pub type OperatorId = u64;

/// Length of a session identifier in bytes
pub const SESSION_ID_LEN: usize = 16;

/// Unique identifier correlating every message of one resharing ceremony
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub [u8; SESSION_ID_LEN]);

impl SessionId {
    /// Generate a fresh random identifier (UUID v4)
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; SESSION_ID_LEN] {
        &self.0
    }

    /// Hex encoding, used as the topic name on the messenger
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for SessionId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|e| crate::Error::Deserialization(e.to_string()))?;
        let array: [u8; SESSION_ID_LEN] = bytes.try_into().map_err(|_| {
            crate::Error::Deserialization(format!(
                "Session ID must be {} bytes",
                SESSION_ID_LEN
            ))
        })?;
        Ok(Self(array))
    }
}

/// What the directory knows about an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorRecord {
    /// Operator ID
    pub id: OperatorId,
    /// Base URL of the operator node
    pub address: String,
    /// Operator public key, when known
    #[serde(default, with = "hex_opt")]
    pub public_key: Option<Vec<u8>>,
}

impl OperatorRecord {
    /// Record with an address and no public key
    pub fn new(id: OperatorId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            public_key: None,
        }
    }

    /// Attach a public key
    pub fn with_public_key(mut self, public_key: Vec<u8>) -> Self {
        self.public_key = Some(public_key);
        self
    }
}

/// Result of a key generation or resharing ceremony, as kept by an operator
///
/// Byte fields are hex encoded when serialized. The share is wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyGenOutput {
    /// This operator's secret share
    #[serde(with = "hex_bytes")]
    pub share: Vec<u8>,
    /// Public share of every operator
    #[serde(with = "hex_map")]
    #[zeroize(skip)]
    pub operator_pub_keys: BTreeMap<OperatorId, Vec<u8>>,
    /// Validator public key
    #[serde(with = "hex_bytes")]
    #[zeroize(skip)]
    pub validator_pk: Vec<u8>,
    /// Signing threshold
    #[zeroize(skip)]
    pub threshold: u64,
}

impl fmt::Debug for KeyGenOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGenOutput")
            .field("share", &"<redacted>")
            .field("operator_pub_keys", &self.operator_pub_keys.keys().collect::<Vec<_>>())
            .field("validator_pk", &hex::encode(&self.validator_pk))
            .field("threshold", &self.threshold)
            .finish()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        hex::decode(value).map_err(serde::de::Error::custom)
    }
}

mod hex_map {
    use super::OperatorId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        value: &BTreeMap<OperatorId, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value
            .iter()
            .map(|(id, key)| (*id, hex::encode(key)))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<OperatorId, Vec<u8>>, D::Error> {
        BTreeMap::<OperatorId, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(id, key)| {
                hex::decode(key)
                    .map(|bytes| (id, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        value
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
