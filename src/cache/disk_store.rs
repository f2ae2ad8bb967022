//! Disk-backed partition store.
//!
//! One directory per partition under the storage root, one file per entry:
//!
//! ```text
//! <root>/<partition>/<sha256(key)>.entry
//! ```
//!
//! An entry file is a single JSON metadata line followed by the (possibly
//! zstd-compressed) body. Writes land in a temp file and are renamed into
//! place, so readers never observe a half-written entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::cache::compressor::{BodyEncoding, Compressor};
use crate::cache::store::{PartitionStore, StoreError};
use crate::config::StorageConfig;
use crate::http::{RequestKey, StoredResponse};

const ENTRY_EXT: &str = "entry";

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    encoding: BodyEncoding,
}

/// Partition store persisted under a root directory.
pub struct DiskStore {
    root: PathBuf,
    compressor: Compressor,
}

impl DiskStore {
    /// Open (and create if needed) a store rooted at `config.root`.
    pub async fn new(config: &StorageConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.root).await?;
        Ok(Self {
            root: config.root.clone(),
            compressor: Compressor::new(config),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf, StoreError> {
        validate_partition_name(partition)?;
        Ok(self.root.join(partition))
    }

    fn entry_path(&self, partition: &str, key: &RequestKey) -> Result<PathBuf, StoreError> {
        let digest = Sha256::digest(key.to_string().as_bytes());
        Ok(self
            .partition_dir(partition)?
            .join(format!("{}.{ENTRY_EXT}", hex::encode(digest))))
    }

    fn encode_entry(
        &self,
        key: &RequestKey,
        response: &StoredResponse,
    ) -> Result<Vec<u8>, StoreError> {
        let (body, encoding) = self.compressor.encode(&response.body)?;
        let meta = EntryMeta {
            key: key.clone(),
            status: response.status,
            headers: response.headers.clone(),
            encoding,
        };

        let header = serde_json::to_vec(&meta).map_err(|e| StoreError::Corrupt {
            path: self.root.clone(),
            reason: e.to_string(),
        })?;
        let mut out = Vec::with_capacity(header.len() + 1 + body.len());
        out.extend_from_slice(&header);
        out.push(b'\n');
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode_entry(&self, path: &Path, data: &[u8]) -> Result<(EntryMeta, Bytes), StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let split = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("missing metadata line".to_string()))?;
        let meta: EntryMeta =
            serde_json::from_slice(&data[..split]).map_err(|e| corrupt(e.to_string()))?;
        let body = self.compressor.decode(&data[split + 1..], meta.encoding)?;
        Ok((meta, Bytes::from(body)))
    }
}

/// Partition names become directory names; refuse anything path-like.
fn validate_partition_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(StoreError::InvalidPartitionName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl PartitionStore for DiskStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.partition_dir(partition)?).await?;
        Ok(())
    }

    async fn get(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, StoreError> {
        let path = self.entry_path(partition, key)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (meta, body) = self.decode_entry(&path, &data)?;
        // Digest collision or a foreign file: treat as a miss.
        if meta.key != *key {
            return Ok(None);
        }
        Ok(Some(StoredResponse::new(meta.status, meta.headers, body)))
    }

    async fn put(
        &self,
        partition: &str,
        key: &RequestKey,
        response: &StoredResponse,
    ) -> Result<(), StoreError> {
        let path = self.entry_path(partition, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let data = self.encode_entry(key, response)?;
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            partition,
            key = %key,
            path = %path.display(),
            size = data.len(),
            "Wrote entry to disk"
        );
        Ok(())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError> {
        let dir = self.partition_dir(partition)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(partition, path = %dir.display(), "Deleted partition directory");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn partitions(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_partition_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn entry_count(&self, partition: &str) -> Result<usize, StoreError> {
        let dir = self.partition_dir(partition)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_entry = entry
                .path()
                .extension()
                .is_some_and(|ext| ext == ENTRY_EXT);
            if is_entry {
                count += 1;
            }
        }
        Ok(count)
    }
}
