//! Key-value persistence for gateway metadata
//!
//! Values are opaque bytes addressed by `(primary_namespace, secondary_namespace,
//! key)`. Writes go through a transaction so related keys change together.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Database error
#[derive(Debug, Error)]
pub enum Error {
    /// Backend failure
    #[error("Database backend error: {0}")]
    Backend(String),

    /// Stored value could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read access and transaction entry point for a KV store
#[async_trait]
pub trait KVStore: Send + Sync {
    /// Read a value
    async fn kv_read(
        &self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, Error>;

    /// Begin a write transaction
    async fn begin_transaction(&self) -> Result<Box<dyn KVStoreTransaction + Send + Sync>, Error>;
}

/// Buffered writes applied on commit
#[async_trait]
pub trait KVStoreTransaction: Send + Sync {
    /// Read a value, seeing this transaction's own writes
    async fn kv_read(
        &mut self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, Error>;

    /// Write a value
    async fn kv_write(
        &mut self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), Error>;

    /// Remove a value
    async fn kv_remove(
        &mut self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
    ) -> Result<(), Error>;

    /// Apply all writes at once
    async fn commit(self: Box<Self>) -> Result<(), Error>;

    /// Discard all writes
    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}

/// Shared KV store handle
pub type DynKVStore = Arc<dyn KVStore>;

fn full_key(primary_namespace: &str, secondary_namespace: &str, key: &str) -> String {
    format!("{}:{}:{}", primary_namespace, secondary_namespace, key)
}

type Data = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// In-memory KV store
#[derive(Debug, Clone, Default)]
pub struct MemoryKVStore {
    data: Data,
}

impl MemoryKVStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KVStore for MemoryKVStore {
    async fn kv_read(
        &self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        let data = self.data.lock().await;
        Ok(data
            .get(&full_key(primary_namespace, secondary_namespace, key))
            .cloned())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn KVStoreTransaction + Send + Sync>, Error> {
        Ok(Box::new(MemoryKVTransaction {
            data: self.data.clone(),
            changes: HashMap::new(),
        }))
    }
}

struct MemoryKVTransaction {
    data: Data,
    changes: HashMap<String, Option<Vec<u8>>>,
}

#[async_trait]
impl KVStoreTransaction for MemoryKVTransaction {
    async fn kv_read(
        &mut self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, Error> {
        let key = full_key(primary_namespace, secondary_namespace, key);
        if let Some(change) = self.changes.get(&key) {
            return Ok(change.clone());
        }
        let data = self.data.lock().await;
        Ok(data.get(&key).cloned())
    }

    async fn kv_write(
        &mut self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), Error> {
        self.changes.insert(
            full_key(primary_namespace, secondary_namespace, key),
            Some(value.to_vec()),
        );
        Ok(())
    }

    async fn kv_remove(
        &mut self,
        primary_namespace: &str,
        secondary_namespace: &str,
        key: &str,
    ) -> Result<(), Error> {
        self.changes
            .insert(full_key(primary_namespace, secondary_namespace, key), None);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let mut data = self.data.lock().await;
        for (key, value) in self.changes {
            match value {
                Some(v) => {
                    data.insert(key, v);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_applies_writes() {
        let store = MemoryKVStore::new();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.kv_write("p", "s", "a", b"1").await.unwrap();
        tx.kv_write("p", "s", "b", b"2").await.unwrap();
        assert_eq!(tx.kv_read("p", "s", "a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.kv_read("p", "s", "a").await.unwrap(), None);
        tx.commit().await.unwrap();

        assert_eq!(store.kv_read("p", "s", "b").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.kv_read("p", "s", "a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.kv_read("p", "other", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rollback_and_remove() {
        let store = MemoryKVStore::new();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.kv_write("p", "s", "a", b"1").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.kv_remove("p", "s", "a").await.unwrap();
        assert_eq!(tx.kv_read("p", "s", "a").await.unwrap(), None);
        tx.rollback().await.unwrap();
        assert!(store.kv_read("p", "s", "a").await.unwrap().is_some());

        let mut tx = store.begin_transaction().await.unwrap();
        tx.kv_remove("p", "s", "a").await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.kv_read("p", "s", "a").await.unwrap().is_none());
    }
}
