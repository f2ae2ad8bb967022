//! Runtime configuration for offline-cache.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Partition naming, warm-up set, routing rules and prefetch knobs live here.

use std::path::PathBuf;

use clap::Parser;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::cache::partition::PartitionNames;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "offline-cache", about = "Offline cache & prefetch proxy")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides `server.listen`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Activate right after install instead of waiting for the grace period.
    #[arg(long)]
    pub skip_waiting: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy server configuration.
    pub server: ServerConfig,

    /// Persistent storage settings.
    pub storage: StorageConfig,

    /// Partition names and version.
    pub partitions: PartitionConfig,

    /// Install-time warm-up.
    pub warm_up: WarmUpConfig,

    /// Request classification rules.
    pub routing: RoutingConfig,

    /// Prefetch settings.
    pub prefetch: PrefetchConfig,

    /// Install/activate lifecycle settings.
    pub lifecycle: LifecycleConfig,
}

/// HTTP proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8080").
    pub listen: String,

    /// Upstream origin every intercepted request is forwarded to.
    pub upstream: String,

    /// Largest request body the proxy will buffer.
    pub max_body_bytes: usize,

    /// Transport timeout for upstream requests in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            upstream: "http://127.0.0.1:3000".to_string(),
            max_body_bytes: 8 * 1024 * 1024, // 8 MB
            request_timeout_secs: 30,
        }
    }
}

/// On-disk partition storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per partition.
    pub root: PathBuf,

    /// Apply zstd compression to stored bodies when it shrinks them.
    pub zstd_compression: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/offline-cache"),
            zstd_compression: true,
            zstd_level: 3,
        }
    }
}

/// Partition name prefixes and the version suffix shared by all three.
///
/// Bump `version` whenever the warm-up set or partition scheme changes so
/// the next activation discards the previous generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub version: String,
    pub app_shell: String,
    pub images: String,
    pub sprites: String,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            app_shell: "tracker-shell".to_string(),
            images: "tracker-images".to_string(),
            sprites: "tracker-sprites".to_string(),
        }
    }
}

/// Resources fetched while installing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmUpConfig {
    /// App-shell URLs, absolute or relative to the upstream.
    pub urls: Vec<String>,

    /// Also run the bulk sprite prefetch over the reference manifest.
    pub bulk_sprites: bool,
}

impl Default for WarmUpConfig {
    fn default() -> Self {
        Self {
            urls: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
            ],
            bulk_sprites: false,
        }
    }
}

/// Request classification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Path of the variant-discovery API.
    pub variant_discovery_path: String,

    /// Image paths containing this marker go to the sprite partition.
    pub sprite_path_marker: String,

    /// Hosts whose images may be cached opportunistically.
    pub allowed_image_hosts: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            variant_discovery_path: "/api/sprite-variants".to_string(),
            sprite_path_marker: "/sprites/".to_string(),
            allowed_image_hosts: vec![
                "raw.githubusercontent.com".to_string(),
                "img.pokemondb.net".to_string(),
            ],
        }
    }
}

/// Prefetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Base URL sprite variant URLs are derived from.
    pub sprite_base: String,

    /// Reference manifest listing every id for the bulk warm-up.
    pub manifest_url: String,

    /// Concurrent fetches per bulk batch.
    pub batch_size: usize,

    /// Log cumulative progress every this many items.
    pub progress_interval: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            sprite_base: "/sprites".to_string(),
            manifest_url: "/data/reference.json".to_string(),
            batch_size: 10,
            progress_interval: 50,
        }
    }
}

/// Install/activate lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a freshly installed version waits for the previous one to
    /// be released before activating on its own.
    pub activation_grace_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            activation_grace_secs: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot resolve {0:?} against the upstream: {1}")]
    InvalidUrl(String, String),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the layer misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream()?;
        if self.partitions.version.trim().is_empty() {
            return Err(ConfigError::Invalid("partitions.version must not be empty"));
        }
        if self.prefetch.batch_size == 0 {
            return Err(ConfigError::Invalid("prefetch.batch_size must be at least 1"));
        }
        if self.prefetch.progress_interval == 0 {
            return Err(ConfigError::Invalid(
                "prefetch.progress_interval must be at least 1",
            ));
        }
        Ok(())
    }

    /// The upstream origin as a URL.
    pub fn upstream(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.server.upstream).map_err(|e| {
            ConfigError::InvalidUrl(self.server.upstream.clone(), e.to_string())
        })
    }

    /// Resolve an absolute or upstream-relative URL.
    pub fn resolve(&self, url: &str) -> Result<Url, ConfigError> {
        self.upstream()?
            .join(url)
            .map_err(|e| ConfigError::InvalidUrl(url.to_string(), e.to_string()))
    }

    /// Current-generation partition names.
    pub fn partition_names(&self) -> PartitionNames {
        PartitionNames::from_config(&self.partitions)
    }

    /// Warm-up URLs resolved against the upstream.
    pub fn warm_up_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.warm_up.urls.iter().map(|u| self.resolve(u)).collect()
    }
}
