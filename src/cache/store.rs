//! Partition store abstraction.
//!
//! A store maps a partition name to a set of (request key → stored
//! response) entries. Partitions are created lazily and only ever removed
//! whole. [`MemoryStore`] backs tests and ephemeral deployments;
//! [`DiskStore`](crate::cache::disk_store::DiskStore) survives restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cache::compressor::CompressionError;
use crate::http::{RequestKey, StoredResponse};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid partition name: {0:?}")]
    InvalidPartitionName(String),

    #[error("Corrupt entry at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),
}

/// Key-value persistence for captured responses, grouped by partition.
///
/// Individual operations are atomic; there is no cross-operation locking.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Create the partition if it does not exist yet.
    async fn open(&self, partition: &str) -> Result<(), StoreError>;

    /// Look up an entry. A missing partition is a miss, not an error.
    async fn get(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, StoreError>;

    /// Insert or replace an entry, creating the partition if needed.
    async fn put(
        &self,
        partition: &str,
        key: &RequestKey,
        response: &StoredResponse,
    ) -> Result<(), StoreError>;

    /// Delete a whole partition. Returns whether it existed.
    async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError>;

    /// Names of all existing partitions, sorted.
    async fn partitions(&self) -> Result<Vec<String>, StoreError>;

    /// Number of entries in a partition (0 if it does not exist).
    async fn entry_count(&self, partition: &str) -> Result<usize, StoreError>;

    async fn contains(&self, partition: &str, key: &RequestKey) -> Result<bool, StoreError> {
        Ok(self.get(partition, key).await?.is_some())
    }

    /// First match for `key` across all partitions, in name order.
    async fn match_any(&self, key: &RequestKey) -> Result<Option<StoredResponse>, StoreError> {
        for partition in self.partitions().await? {
            if let Some(found) = self.get(&partition, key).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Sum of entry counts across all partitions.
    async fn total_entries(&self) -> Result<usize, StoreError> {
        let mut total = 0;
        for partition in self.partitions().await? {
            total += self.entry_count(&partition).await?;
        }
        Ok(total)
    }
}

/// Shared handle to a store.
pub type SharedStore = Arc<dyn PartitionStore>;

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<String, HashMap<RequestKey, StoredResponse>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl PartitionStore for MemoryStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        self.partitions
            .write()
            .await
            .entry(partition.to_string())
            .or_default();
        Ok(())
    }

    async fn get(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, StoreError> {
        let partitions = self.partitions.read().await;
        Ok(partitions.get(partition).and_then(|p| p.get(key)).cloned())
    }

    async fn put(
        &self,
        partition: &str,
        key: &RequestKey,
        response: &StoredResponse,
    ) -> Result<(), StoreError> {
        self.partitions
            .write()
            .await
            .entry(partition.to_string())
            .or_default()
            .insert(key.clone(), response.clone());
        Ok(())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError> {
        Ok(self.partitions.write().await.remove(partition).is_some())
    }

    async fn partitions(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.partitions.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn entry_count(&self, partition: &str) -> Result<usize, StoreError> {
        Ok(self
            .partitions
            .read()
            .await
            .get(partition)
            .map(HashMap::len)
            .unwrap_or(0))
    }
}
