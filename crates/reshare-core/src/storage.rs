//! Key-value storage for operator records and key generation outputs

use crate::{Error, KeyGenOutput, Result};
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Opaque byte-keyed storage
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value, `None` if the key is absent
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }
}

/// Volatile store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

/// Store keeping one file per key under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store, creating the directory if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("{}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &[u8]) -> PathBuf {
        self.root.join(hex::encode(key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value).map_err(|e| Error::Storage(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::Storage(e.to_string()))
    }
}

/// Storage key of the key generation output for a validator
pub fn keygen_output_key(validator_pk: &[u8]) -> Vec<u8> {
    format!("keygen/{}", hex::encode(validator_pk)).into_bytes()
}

/// Store a key generation output under its validator public key
pub fn save_keygen_output<S: KeyValueStore + ?Sized>(store: &S, output: &KeyGenOutput) -> Result<()> {
    if output.validator_pk.is_empty() {
        return Err(Error::Storage("key generation output without validator key".into()));
    }
    let value = serde_json::to_vec(output)?;
    store.put(&keygen_output_key(&output.validator_pk), &value)
}

/// Load the key generation output of a validator, `None` if absent
pub fn get_keygen_output<S: KeyValueStore + ?Sized>(
    store: &S,
    validator_pk: &[u8],
) -> Result<Option<KeyGenOutput>> {
    match store.get(&keygen_output_key(validator_pk))? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Deserialization(format!("key generation output: {}", e))),
        None => Ok(None),
    }
}
