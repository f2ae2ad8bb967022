//! Body compression for on-disk entries.
//!
//! Bodies are zstd-compressed when that makes them smaller; already-compressed
//! formats (PNG sprites mostly) are stored as-is.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StorageConfig;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    ZstdError(#[from] std::io::Error),
}

/// How a stored body is encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Identity,
    Zstd,
}

/// The compression engine for entry bodies.
#[derive(Debug, Clone)]
pub struct Compressor {
    enabled: bool,
    level: i32,
}

impl Compressor {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            enabled: config.zstd_compression,
            level: config.zstd_level,
        }
    }

    /// Encode a body for storage, returning the bytes and the encoding used.
    pub fn encode(&self, body: &[u8]) -> Result<(Vec<u8>, BodyEncoding), CompressionError> {
        if !self.enabled || body.is_empty() {
            return Ok((body.to_vec(), BodyEncoding::Identity));
        }

        let compressed = zstd::encode_all(body, self.level)?;
        if compressed.len() < body.len() {
            Ok((compressed, BodyEncoding::Zstd))
        } else {
            Ok((body.to_vec(), BodyEncoding::Identity))
        }
    }

    /// Reverse [`encode`](Self::encode).
    pub fn decode(&self, data: &[u8], encoding: BodyEncoding) -> Result<Vec<u8>, CompressionError> {
        match encoding {
            BodyEncoding::Identity => Ok(data.to_vec()),
            BodyEncoding::Zstd => Ok(zstd::decode_all(data)?),
        }
    }
}
