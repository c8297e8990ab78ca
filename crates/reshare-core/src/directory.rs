//! Operator address and key resolution

use crate::storage::KeyValueStore;
use crate::{Error, OperatorId, OperatorRecord, ResharingSession, Result};
use tracing::debug;

/// Resolves operator IDs to their records
pub trait OperatorDirectory: Send + Sync {
    /// Look up an operator; unknown operators are [`Error::OperatorNotFound`]
    fn lookup(&self, operator_id: OperatorId) -> Result<OperatorRecord>;
}

impl OperatorDirectory for ResharingSession {
    fn lookup(&self, operator_id: OperatorId) -> Result<OperatorRecord> {
        self.address_of(operator_id)
            .map(|address| OperatorRecord::new(operator_id, address))
            .ok_or(Error::OperatorNotFound(operator_id))
    }
}

/// Resolve every operator, failing on the first unknown one
pub fn resolve_all<D: OperatorDirectory + ?Sized>(
    directory: &D,
    operator_ids: &[OperatorId],
) -> Result<Vec<OperatorRecord>> {
    operator_ids.iter().map(|id| directory.lookup(*id)).collect()
}

/// Storage key of an operator record
pub fn operator_key(operator_id: OperatorId) -> Vec<u8> {
    format!("operator/{}", operator_id).into_bytes()
}

/// Directory persisted in a key-value store
///
/// Misses are resolved through the fallback directory, if any, and cached.
pub struct StoreDirectory<S: KeyValueStore> {
    store: S,
    fallback: Option<Box<dyn OperatorDirectory>>,
}

impl<S: KeyValueStore> StoreDirectory<S> {
    /// Directory over a store
    pub fn new(store: S) -> Self {
        Self {
            store,
            fallback: None,
        }
    }

    /// Consult `fallback` for operators missing from the store
    pub fn with_fallback(mut self, fallback: Box<dyn OperatorDirectory>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Read a stored record
    pub fn get_operator(&self, operator_id: OperatorId) -> Result<Option<OperatorRecord>> {
        match self.store.get(&operator_key(operator_id))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Store a record, replacing any previous one
    pub fn put_operator(&self, record: &OperatorRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.store.put(&operator_key(record.id), &value)
    }
}

impl<S: KeyValueStore> OperatorDirectory for StoreDirectory<S> {
    fn lookup(&self, operator_id: OperatorId) -> Result<OperatorRecord> {
        if let Some(record) = self.get_operator(operator_id)? {
            return Ok(record);
        }

        let fallback = self
            .fallback
            .as_ref()
            .ok_or(Error::OperatorNotFound(operator_id))?;
        let record = fallback.lookup(operator_id)?;
        self.put_operator(&record)?;
        debug!(operator_id, address = %record.address, "Cached operator record");
        Ok(record)
    }
}
