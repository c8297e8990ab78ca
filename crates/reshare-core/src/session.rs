//! Resharing request parsing and session construction

use crate::{Error, OperatorId, Result, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw resharing request as collected from the command line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResharingRequest {
    /// New operator set, each `ID=address`
    pub operators: Vec<String>,
    /// Old operator set, each `ID=address`
    pub old_operators: Vec<String>,
    /// Signing threshold for the new set
    pub threshold: usize,
    /// Hex-encoded validator public key
    pub validator_pk: String,
}

/// A parsed resharing ceremony, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResharingSession {
    /// Session identifier
    pub session_id: SessionId,
    /// New operator set
    pub operators: BTreeMap<OperatorId, String>,
    /// Old operator set
    pub old_operators: BTreeMap<OperatorId, String>,
    /// Threshold for the new set
    pub threshold: u16,
    /// Validator public key bytes
    pub validator_pk: Vec<u8>,
}

impl ResharingSession {
    /// Parse a request and assign a fresh session identifier
    pub fn from_request(request: &ResharingRequest) -> Result<Self> {
        Self::with_session_id(SessionId::random(), request)
    }

    /// Parse a request under a caller-chosen session identifier
    pub fn with_session_id(session_id: SessionId, request: &ResharingRequest) -> Result<Self> {
        let operators = parse_operator_specs(&request.operators)?;
        let old_operators = parse_operator_specs(&request.old_operators)?;

        let validator_pk = hex::decode(request.validator_pk.trim())
            .map_err(|e| Error::InvalidPublicKeyEncoding(format!("{}: {}", request.validator_pk, e)))?;
        if validator_pk.is_empty() {
            return Err(Error::InvalidPublicKeyEncoding("empty key".into()));
        }

        if operators.is_empty() {
            return Err(Error::EmptyOperatorSet);
        }
        if request.threshold == 0 || request.threshold > operators.len() {
            return Err(Error::InvalidThreshold {
                threshold: request.threshold,
                operators: operators.len(),
            });
        }
        let threshold = u16::try_from(request.threshold).map_err(|_| Error::InvalidThreshold {
            threshold: request.threshold,
            operators: operators.len(),
        })?;

        Ok(Self {
            session_id,
            operators,
            old_operators,
            threshold,
            validator_pk,
        })
    }

    /// New operator IDs in ascending order
    pub fn new_operator_ids(&self) -> Vec<OperatorId> {
        self.operators.keys().copied().collect()
    }

    /// Old operator IDs in ascending order
    pub fn old_operator_ids(&self) -> Vec<OperatorId> {
        self.old_operators.keys().copied().collect()
    }

    /// Union of new and old operator IDs, ascending, without duplicates
    pub fn all_operator_ids(&self) -> Vec<OperatorId> {
        let mut ids: Vec<OperatorId> = self
            .operators
            .keys()
            .chain(self.old_operators.keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Address of an operator; the new set wins when an ID is in both
    pub fn address_of(&self, operator_id: OperatorId) -> Option<&str> {
        self.operators
            .get(&operator_id)
            .or_else(|| self.old_operators.get(&operator_id))
            .map(String::as_str)
    }
}

/// Parse `ID=address` specifications; later duplicates overwrite earlier ones
pub fn parse_operator_specs<S: AsRef<str>>(specs: &[S]) -> Result<BTreeMap<OperatorId, String>> {
    let mut operators = BTreeMap::new();
    for spec in specs {
        let (id, address) = parse_operator_spec(spec.as_ref())?;
        operators.insert(id, address);
    }
    Ok(operators)
}

/// Parse a single `ID=address` specification
pub fn parse_operator_spec(spec: &str) -> Result<(OperatorId, String)> {
    let spec = spec.trim();
    let parts: Vec<&str> = spec.split('=').collect();
    if parts.len() != 2 || parts[1].trim().is_empty() {
        return Err(Error::MalformedOperatorSpec(spec.to_string()));
    }

    let id = parts[0]
        .trim()
        .parse::<OperatorId>()
        .map_err(|e| Error::InvalidOperatorId {
            token: spec.to_string(),
            reason: e.to_string(),
        })?;

    Ok((id, parts[1].trim().to_string()))
}
