use std::path::{Path, PathBuf};
use async_trait::async_trait;
use sled::transaction::ConflictableTransactionError;
use tracing::debug;

use super::{BatchOp, Storage, StorageError, StorageResult, WriteBatch};

const SEQUENCES_TREE: &str = "sequences";

fn backend_error(err: impl std::fmt::Debug) -> StorageError {
    StorageError::Backend(format!("{:?}", err))
}

fn decode_counter(bytes: Option<&[u8]>) -> u64 {
    bytes
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

/// Persistent storage backed by a sled database
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: sled::Db,
    sequences: sled::Tree,
    path: PathBuf,
}

impl SledStorage {
    /// Open (or create) a database in the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let db = sled::open(&path).map_err(backend_error)?;
        let sequences = db.open_tree(SEQUENCES_TREE).map_err(backend_error)?;
        debug!("Opened sled storage at {:?}", path);
        Ok(Self { db, sequences, path })
    }

    /// Directory holding the database files
    pub fn base_path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for SledStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.db.insert(key.as_bytes(), data).map_err(backend_error)?;
        Ok(())
    }

    async fn get_opt(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let value = self.db.get(key.as_bytes()).map_err(backend_error)?;
        Ok(value.map(|v| v.to_vec()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.db.remove(key.as_bytes()).map_err(backend_error)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.db.contains_key(key.as_bytes()).map_err(backend_error)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry.map_err(backend_error)?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    async fn scan(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry.map_err(backend_error)?;
            entries.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
        }
        Ok(entries)
    }

    async fn next_id(&self, sequence: &str) -> StorageResult<u64> {
        let updated = self
            .sequences
            .update_and_fetch(sequence.as_bytes(), |old| {
                let next = decode_counter(old) + 1;
                Some(next.to_be_bytes().to_vec())
            })
            .map_err(backend_error)?;
        Ok(decode_counter(updated.as_deref()))
    }

    async fn commit(&self, batch: WriteBatch) -> StorageResult<bool> {
        let applied = self
            .db
            .transaction(|tx| -> Result<bool, ConflictableTransactionError<()>> {
                for guard in batch.guards() {
                    let current = tx.get(guard.key().as_bytes())?;
                    if !guard.holds(current.as_deref()) {
                        return Ok(false);
                    }
                }
                for op in batch.ops() {
                    match op {
                        BatchOp::Put { key, value } => {
                            tx.insert(key.as_bytes(), value.as_slice())?;
                        }
                        BatchOp::Delete { key } => {
                            tx.remove(key.as_bytes())?;
                        }
                    }
                }
                Ok(true)
            })
            .map_err(backend_error)?;
        Ok(applied)
    }

    async fn flush(&self) -> StorageResult<()> {
        self.db.flush_async().await.map_err(backend_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStorage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sled_storage_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path()).unwrap();

        storage.put("houses/h1", b"one").await.unwrap();
        storage.put("houses/h2", b"two").await.unwrap();
        storage.put("other/h3", b"three").await.unwrap();

        assert_eq!(storage.get("houses/h1").await.unwrap(), b"one");
        assert_eq!(storage.list("houses/").await.unwrap().len(), 2);

        let entries = storage.scan("houses/").await.unwrap();
        assert_eq!(entries[0].0, "houses/h1");
        assert_eq!(entries[1].1, b"two");

        storage.delete("houses/h1").await.unwrap();
        assert!(!storage.exists("houses/h1").await.unwrap());
        assert!(matches!(storage.get("houses/h1").await, Err(StorageError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_sled_sequences_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let storage = SledStorage::open(dir.path()).unwrap();
            assert_eq!(storage.next_id("claims").await.unwrap(), 1);
            assert_eq!(storage.next_id("claims").await.unwrap(), 2);
            storage.put_json("rows/1", &vec![1, 2, 3]).await.unwrap();
            storage.flush().await.unwrap();
        }

        let storage = SledStorage::open(dir.path()).unwrap();
        assert_eq!(storage.next_id("claims").await.unwrap(), 3);
        assert_eq!(storage.next_id("polls").await.unwrap(), 1);
        let row: Vec<i32> = storage.get_json("rows/1").await.unwrap();
        assert_eq!(row, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_sled_guarded_commit() {
        let dir = tempdir().unwrap();
        let storage = SledStorage::open(dir.path()).unwrap();

        let batch = WriteBatch::new()
            .expect_absent("resolved/1")
            .put("resolved/1", b"yes".to_vec());
        assert!(storage.commit(batch.clone()).await.unwrap());
        assert!(!storage.commit(batch).await.unwrap());

        let batch = WriteBatch::new()
            .expect_value("resolved/1", b"no".to_vec())
            .delete("resolved/1");
        assert!(!storage.commit(batch).await.unwrap());
        assert!(storage.exists("resolved/1").await.unwrap());
    }
}
