//! Prefetching: fetches sprite variants before the page asks for them.
//!
//! Two entry points:
//! 1. Reactive: a discovery response names a cache key and its variants;
//!    every variant not yet cached is fetched concurrently.
//! 2. Bulk: at install time, every id in the reference manifest is fetched
//!    in fixed-size batches with periodic progress logging.
//!
//! Neither path aborts on individual failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::key::{sprite_url, CacheKey, KeyError};
use crate::cache::partition::{PartitionKind, PartitionNames};
use crate::cache::store::SharedStore;
use crate::config::PrefetchConfig;
use crate::http::{is_storable, Destination, InterceptedRequest, RequestKey};
use crate::metrics::SharedMetrics;
use crate::net::{FetchError, SharedFetcher};

#[derive(Error, Debug)]
pub enum PrefetchError {
    #[error("Manifest fetch failed: {0}")]
    ManifestUnreachable(#[from] FetchError),

    #[error("Manifest returned status {0}")]
    ManifestStatus(u16),

    #[error("Manifest is not a JSON list of ids: {0}")]
    ManifestFormat(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Counts for one prefetch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    /// Fetched and stored.
    pub fetched: usize,
    /// Already present in the sprite partition.
    pub skipped: usize,
    /// Network failure, non-200 status or store error.
    pub failed: usize,
}

impl PrefetchReport {
    pub fn processed(&self) -> usize {
        self.fetched + self.skipped + self.failed
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Fetched => self.fetched += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

/// Answer to a prefetch-completion query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchStatus {
    pub total: usize,
    pub cached: usize,
    pub percentage: u32,
}

impl PrefetchStatus {
    pub fn new(total: usize, cached: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((cached.saturating_mul(100) / total).min(100)) as u32
        };
        Self {
            total,
            cached,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Fetched,
    Skipped,
    Failed,
}

/// One manifest entry: a bare id or an object carrying one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestItem {
    Number(u64),
    Text(String),
    Object { id: ManifestId },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestId {
    Number(u64),
    Text(String),
}

impl ManifestItem {
    fn into_id(self) -> String {
        match self {
            ManifestItem::Number(n) | ManifestItem::Object { id: ManifestId::Number(n) } => {
                n.to_string()
            }
            ManifestItem::Text(s) | ManifestItem::Object { id: ManifestId::Text(s) } => s,
        }
    }
}

/// Parse a manifest body into its list of ids.
pub fn parse_manifest(body: &[u8]) -> Result<Vec<String>, PrefetchError> {
    let items: Vec<ManifestItem> =
        serde_json::from_slice(body).map_err(|e| PrefetchError::ManifestFormat(e.to_string()))?;
    Ok(items
        .into_iter()
        .map(ManifestItem::into_id)
        .filter(|id| !id.is_empty())
        .collect())
}

/// Fetches sprite variants into the sprite partition.
pub struct PrefetchOrchestrator {
    store: SharedStore,
    fetcher: SharedFetcher,
    metrics: SharedMetrics,
    sprite_partition: String,
    sprite_base: Url,
    manifest_url: Url,
    batch_size: usize,
    progress_interval: usize,
    /// Size of the last manifest seen; 0 until one has been fetched.
    manifest_total: AtomicUsize,
}

impl PrefetchOrchestrator {
    pub fn new(
        store: SharedStore,
        fetcher: SharedFetcher,
        metrics: SharedMetrics,
        names: &PartitionNames,
        sprite_base: Url,
        manifest_url: Url,
        config: &PrefetchConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            metrics,
            sprite_partition: names.name(PartitionKind::Sprite).to_string(),
            sprite_base,
            manifest_url,
            batch_size: config.batch_size.max(1),
            progress_interval: config.progress_interval.max(1),
            manifest_total: AtomicUsize::new(0),
        }
    }

    pub fn sprite_partition(&self) -> &str {
        &self.sprite_partition
    }

    /// Derive one URL per distinct, valid variant, preserving order.
    pub fn variant_urls(&self, key: &CacheKey, variants: &[String]) -> Vec<Url> {
        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(variants.len());
        for variant in variants {
            if !seen.insert(variant.as_str()) {
                continue;
            }
            match key.variant_url(&self.sprite_base, variant) {
                Ok(url) => urls.push(url),
                Err(e) => warn!(cache_key = %key, variant, error = %e, "Skipping variant"),
            }
        }
        urls
    }

    /// Reactive entry point: fetch every variant of `cache_key` that is not
    /// cached yet, all concurrently.
    pub async fn prefetch_variants(&self, cache_key: &str, variants: &[String]) -> PrefetchReport {
        let key = match CacheKey::parse(cache_key) {
            Ok(key) => key,
            Err(e) => {
                warn!(cache_key, error = %e, "Ignoring variant prefetch");
                return PrefetchReport::default();
            }
        };

        let urls = self.variant_urls(&key, variants);
        let outcomes = join_all(urls.into_iter().map(|url| self.fetch_one(url, "variant"))).await;

        let mut report = PrefetchReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }

        debug!(
            cache_key = %key,
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed,
            "Variant prefetch complete"
        );
        report
    }

    /// Fetch the reference manifest and remember its size.
    pub async fn fetch_manifest(&self) -> Result<Vec<String>, PrefetchError> {
        let request = InterceptedRequest::get(self.manifest_url.clone(), Destination::Other);
        let response = self.fetcher.fetch(&request).await?;
        if !response.is_ok() {
            return Err(PrefetchError::ManifestStatus(response.status));
        }

        let ids = parse_manifest(&response.body)?;
        self.manifest_total.store(ids.len(), Ordering::Relaxed);
        Ok(ids)
    }

    /// Bulk entry point: fetch one sprite per manifest id in batches of
    /// `batch_size`, always running the whole list.
    pub async fn bulk_warm_up(&self) -> Result<PrefetchReport, PrefetchError> {
        let ids = self.fetch_manifest().await?;
        let total = ids.len();
        info!(total, batch_size = self.batch_size, "Starting bulk sprite prefetch");

        let mut urls = Vec::with_capacity(total);
        for id in &ids {
            match sprite_url(&self.sprite_base, id) {
                Ok(url) => urls.push(url),
                Err(e) => warn!(id, error = %e, "Skipping manifest id"),
            }
        }

        let mut report = PrefetchReport::default();
        report.failed += total - urls.len();
        let mut next_progress = self.progress_interval;

        for batch in urls.chunks(self.batch_size) {
            let outcomes =
                join_all(batch.iter().cloned().map(|url| self.fetch_one(url, "bulk"))).await;
            for outcome in outcomes {
                report.record(outcome);
            }

            if report.processed() >= next_progress {
                info!(
                    processed = report.processed(),
                    total,
                    success = report.fetched + report.skipped,
                    errors = report.failed,
                    "Bulk prefetch progress"
                );
                while next_progress <= report.processed() {
                    next_progress += self.progress_interval;
                }
            }
        }

        info!(
            total,
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed,
            "Bulk sprite prefetch complete"
        );
        Ok(report)
    }

    /// Prefetch completion against the reference manifest.
    pub async fn status(&self) -> PrefetchStatus {
        let mut total = self.manifest_total.load(Ordering::Relaxed);
        if total == 0 {
            total = match self.fetch_manifest().await {
                Ok(ids) => ids.len(),
                Err(e) => {
                    debug!(error = %e, "Manifest unavailable for status query");
                    0
                }
            };
        }

        let cached = match self.store.entry_count(&self.sprite_partition).await {
            Ok(count) => count,
            Err(e) => {
                warn!(partition = %self.sprite_partition, error = %e, "Failed to count sprites");
                0
            }
        };
        PrefetchStatus::new(total, cached)
    }

    /// Fetch and store one sprite unless it is already cached.
    async fn fetch_one(&self, url: Url, kind: &'static str) -> ItemOutcome {
        let key = RequestKey::get(&url);
        match self.store.contains(&self.sprite_partition, &key).await {
            Ok(true) => {
                self.metrics.prefetch(kind, "skipped");
                return ItemOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => debug!(url = %url, error = %e, "Cache lookup failed, fetching anyway"),
        }

        let request = InterceptedRequest::get(url.clone(), Destination::Image);
        let outcome = match self.fetcher.fetch(&request).await {
            Ok(response) if is_storable(&key, &response) => {
                match self.store.put(&self.sprite_partition, &key, &response).await {
                    Ok(()) => ItemOutcome::Fetched,
                    Err(e) => {
                        warn!(url = %url, error = %e, "Failed to store prefetched sprite");
                        ItemOutcome::Failed
                    }
                }
            }
            Ok(response) => {
                debug!(url = %url, status = response.status, "Prefetch got non-200");
                ItemOutcome::Failed
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Prefetch failed");
                ItemOutcome::Failed
            }
        };

        let label = match outcome {
            ItemOutcome::Fetched => "fetched",
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::Failed => "failed",
        };
        self.metrics.prefetch(kind, label);
        outcome
    }
}
