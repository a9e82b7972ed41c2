use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{BatchOp, Storage, StorageResult, WriteBatch};

/// In-memory storage implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    /// In-memory data store, ordered so prefix scans come back sorted
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    /// Last id handed out per sequence
    sequences: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let mut store = self.data.write().await;
        store.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get_opt(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let store = self.data.read().await;
        Ok(store.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut store = self.data.write().await;
        store.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let store = self.data.read().await;
        Ok(store.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let store = self.data.read().await;
        Ok(store
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn scan(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let store = self.data.read().await;
        Ok(store
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn next_id(&self, sequence: &str) -> StorageResult<u64> {
        let mut sequences = self.sequences.lock().await;
        let counter = sequences.entry(sequence.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<bool> {
        let mut store = self.data.write().await;

        let all_hold = batch
            .guards()
            .iter()
            .all(|guard| guard.holds(store.get(guard.key()).map(Vec::as_slice)));
        if !all_hold {
            return Ok(false);
        }

        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    store.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    store.remove(key);
                }
            }
        }

        Ok(true)
    }
}
