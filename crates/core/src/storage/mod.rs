//! Storage abstraction for Mirror
//!
//! Every record lives in an ordered key-value store under a table prefix.
//! Writes that touch more than one key, or that must only happen when another
//! key is in a known state, go through a [`WriteBatch`]: the batch is applied
//! atomically, and not at all if any of its guards fails. Uniqueness
//! constraints and "resolve exactly once" transitions are expressed as guards.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod memory_storage;
pub mod sled_storage;

pub use memory_storage::MemoryStorage;
pub use sled_storage::SledStorage;

/// Storage-related errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Format a row id so that lexical key order matches numeric order.
pub fn pad_id(id: u64) -> String {
    format!("{:020}", id)
}

/// A precondition on the current value of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The key must not exist
    Absent(String),
    /// The key must currently hold exactly these bytes
    Equals(String, Vec<u8>),
}

impl Guard {
    /// The key this guard inspects
    pub fn key(&self) -> &str {
        match self {
            Guard::Absent(key) => key,
            Guard::Equals(key, _) => key,
        }
    }

    /// Check the guard against the current value of its key
    pub fn holds(&self, current: Option<&[u8]>) -> bool {
        match self {
            Guard::Absent(_) => current.is_none(),
            Guard::Equals(_, expected) => current == Some(expected.as_slice()),
        }
    }
}

/// A single mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// A set of mutations applied atomically, subject to guards
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    guards: Vec<Guard>,
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to be absent when the batch is applied
    pub fn expect_absent(mut self, key: impl Into<String>) -> Self {
        self.guards.push(Guard::Absent(key.into()));
        self
    }

    /// Require `key` to hold `value` when the batch is applied
    pub fn expect_value(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.guards.push(Guard::Equals(key.into(), value));
        self
    }

    /// Require `key` to be in the state it was read in: absent for `None`
    pub fn expect_current(self, key: impl Into<String>, current: Option<Vec<u8>>) -> Self {
        match current {
            Some(value) => self.expect_value(key, value),
            None => self.expect_absent(key),
        }
    }

    /// Store raw bytes
    pub fn put(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.ops.push(BatchOp::Put { key: key.into(), value });
        self
    }

    /// Store a value serialized as JSON
    pub fn put_json<T: Serialize>(self, key: impl Into<String>, value: &T) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.put(key, bytes))
    }

    /// Remove a key
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The core Storage trait defining the operations all storage implementations must support
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Store data at the specified key
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Retrieve data from the specified key, if present
    async fn get_opt(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Retrieve data from the specified key
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.get_opt(key)
            .await?
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    /// Delete data at the specified key
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// List all keys with a given prefix, in key order
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Read all entries with a given prefix, in key order
    async fn scan(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Allocate the next id of a named sequence (starting at 1)
    async fn next_id(&self, sequence: &str) -> StorageResult<u64>;

    /// Apply a batch atomically. Returns `false`, writing nothing, when a guard fails.
    async fn commit(&self, batch: WriteBatch) -> StorageResult<bool>;

    /// Make completed writes durable
    async fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Extension trait for JSON serialization/deserialization
#[async_trait]
pub trait JsonStorage: Storage {
    /// Store a serializable value at the specified key
    async fn put_json<T: Serialize + Send + Sync>(&self, key: &str, value: &T) -> StorageResult<()> {
        let json_data = serde_json::to_vec(value)?;
        self.put(key, &json_data).await
    }

    /// Retrieve and deserialize a value from the specified key
    async fn get_json<T: DeserializeOwned + Send>(&self, key: &str) -> StorageResult<T> {
        let data = self.get(key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Retrieve and deserialize a value, if present
    async fn get_json_opt<T: DeserializeOwned + Send>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get_opt(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Retrieve a value together with the raw bytes it was decoded from,
    /// so that a later [`WriteBatch`] can be guarded on it
    async fn get_json_versioned<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> StorageResult<Option<(T, Vec<u8>)>> {
        match self.get_opt(key).await? {
            Some(data) => {
                let value = serde_json::from_slice(&data)?;
                Ok(Some((value, data)))
            }
            None => Ok(None),
        }
    }

    /// Deserialize every value under a prefix, in key order
    async fn scan_json<T: DeserializeOwned + Send>(&self, prefix: &str) -> StorageResult<Vec<T>> {
        let entries = self.scan(prefix).await?;
        let mut values = Vec::with_capacity(entries.len());
        for (_, data) in entries {
            values.push(serde_json::from_slice(&data)?);
        }
        Ok(values)
    }
}

// Implement JsonStorage for any type that implements Storage
impl<S: Storage + ?Sized> JsonStorage for S {}
