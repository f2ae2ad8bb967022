//! The interception layer.
//!
//! - [`lifecycle`]: install (warm-up) → activate (sweep) state machine
//! - [`router`]: per-class caching strategies for intercepted requests
//! - [`prefetcher`]: reactive variant prefetch and bulk warm-up
//! - [`control`]: request/reply control channel for the host page
//!
//! [`Layer`] wires them together over one store, fetcher and task tracker.

pub mod control;
pub mod lifecycle;
pub mod prefetcher;
pub mod router;

use std::sync::Arc;

use tokio_util::task::TaskTracker;

use crate::cache::store::SharedStore;
use crate::config::{Config, ConfigError};
use crate::metrics::SharedMetrics;
use crate::net::SharedFetcher;

use control::ControlService;
use lifecycle::LifecycleController;
use prefetcher::PrefetchOrchestrator;
use router::{RequestRouter, RouteRules};

/// All layer components for one version.
pub struct Layer {
    pub lifecycle: Arc<LifecycleController>,
    pub router: Arc<RequestRouter>,
    pub prefetcher: Arc<PrefetchOrchestrator>,
    pub control: Arc<ControlService>,
    pub store: SharedStore,
    pub metrics: SharedMetrics,
    /// Background prefetch tasks.
    pub tasks: TaskTracker,
}

impl Layer {
    pub fn new(
        config: &Config,
        store: SharedStore,
        fetcher: SharedFetcher,
        metrics: SharedMetrics,
    ) -> Result<Self, ConfigError> {
        let names = config.partition_names();
        let tasks = TaskTracker::new();

        let prefetcher = Arc::new(PrefetchOrchestrator::new(
            store.clone(),
            fetcher.clone(),
            metrics.clone(),
            &names,
            config.resolve(&config.prefetch.sprite_base)?,
            config.resolve(&config.prefetch.manifest_url)?,
            &config.prefetch,
        ));

        let lifecycle = Arc::new(LifecycleController::new(
            store.clone(),
            fetcher.clone(),
            prefetcher.clone(),
            names.clone(),
            config.warm_up_urls()?,
            config.warm_up.bulk_sprites,
            tasks.clone(),
        ));

        let router = Arc::new(RequestRouter::new(
            store.clone(),
            fetcher,
            prefetcher.clone(),
            names,
            RouteRules::new(config.upstream()?, &config.routing),
            tasks.clone(),
            metrics.clone(),
        ));

        let control = Arc::new(ControlService::new(
            lifecycle.clone(),
            store.clone(),
            prefetcher.clone(),
        ));

        Ok(Self {
            lifecycle,
            router,
            prefetcher,
            control,
            store,
            metrics,
            tasks,
        })
    }
}
