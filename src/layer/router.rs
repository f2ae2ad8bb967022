//! Request routing: one caching strategy per resource class.
//!
//! Classification, in priority order:
//! 1. Variant discovery API → network, then fire-and-forget prefetch
//! 2. Image → cache-first (sprite or generic image partition)
//! 3. Navigation → network-first, cache fallback
//! 4. Everything else → network-first, opportunistic caching
//!
//! No route surfaces an error: every failure degrades to a fallback response
//! or to "no response" (`None`).

use std::sync::Arc;

use reqwest::Url;
use serde::Deserialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::cache::partition::{PartitionKind, PartitionNames};
use crate::cache::store::SharedStore;
use crate::config::RoutingConfig;
use crate::http::{has_image_extension, is_storable, Destination, InterceptedRequest, StoredResponse};
use crate::layer::prefetcher::PrefetchOrchestrator;
use crate::metrics::SharedMetrics;
use crate::net::SharedFetcher;

/// Where a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    VariantDiscovery,
    Image(PartitionKind),
    Navigation,
    Passthrough,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::VariantDiscovery => "discovery",
            Route::Image(PartitionKind::Sprite) => "sprite",
            Route::Image(_) => "image",
            Route::Navigation => "navigation",
            Route::Passthrough => "passthrough",
        }
    }
}

/// Success payload of the variant-discovery API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VariantDiscovery {
    #[serde(rename = "cacheKey")]
    pub cache_key: String,
    pub variants: Vec<String>,
}

impl VariantDiscovery {
    /// `None` for a non-JSON body or any other shape.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

/// Classification rules, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RouteRules {
    pub origin: Url,
    pub discovery_path: String,
    pub sprite_marker: String,
    pub allowed_image_hosts: Vec<String>,
}

impl RouteRules {
    pub fn new(origin: Url, config: &RoutingConfig) -> Self {
        Self {
            origin,
            discovery_path: config.variant_discovery_path.clone(),
            sprite_marker: config.sprite_path_marker.clone(),
            allowed_image_hosts: config.allowed_image_hosts.clone(),
        }
    }

    pub fn classify(&self, request: &InterceptedRequest) -> Route {
        if request.url.path() == self.discovery_path {
            Route::VariantDiscovery
        } else if request.destination == Destination::Image {
            if request.url.path().contains(&self.sprite_marker) {
                Route::Image(PartitionKind::Sprite)
            } else {
                Route::Image(PartitionKind::Image)
            }
        } else if request.is_navigation() {
            Route::Navigation
        } else {
            Route::Passthrough
        }
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Same-origin, or an image from an allow-listed host.
    pub fn is_cacheable(&self, request: &InterceptedRequest) -> bool {
        if self.is_same_origin(&request.url) {
            return true;
        }
        let is_image =
            request.destination == Destination::Image || has_image_extension(&request.url);
        let allowed = request
            .url
            .host_str()
            .is_some_and(|host| self.allowed_image_hosts.iter().any(|h| h == host));
        is_image && allowed
    }
}

/// Dispatches intercepted requests to their caching strategy.
pub struct RequestRouter {
    store: SharedStore,
    fetcher: SharedFetcher,
    prefetcher: Arc<PrefetchOrchestrator>,
    names: PartitionNames,
    rules: RouteRules,
    tasks: TaskTracker,
    metrics: SharedMetrics,
}

impl RequestRouter {
    pub fn new(
        store: SharedStore,
        fetcher: SharedFetcher,
        prefetcher: Arc<PrefetchOrchestrator>,
        names: PartitionNames,
        rules: RouteRules,
        tasks: TaskTracker,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            store,
            fetcher,
            prefetcher,
            names,
            rules,
            tasks,
            metrics,
        }
    }

    pub fn classify(&self, request: &InterceptedRequest) -> Route {
        self.rules.classify(request)
    }

    /// Route one request. `None` means "no response": the host renders its
    /// own offline state.
    pub async fn handle(&self, request: InterceptedRequest) -> Option<StoredResponse> {
        let route = self.classify(&request);
        debug!(method = %request.method, url = %request.url, route = route.label(), "Routing request");

        match route {
            Route::VariantDiscovery => self.variant_discovery(request).await,
            Route::Image(kind) => Some(self.cache_first(request, kind, route).await),
            Route::Navigation => self.network_first(request).await,
            Route::Passthrough => self.network_with_caching(request).await,
        }
    }

    async fn variant_discovery(&self, request: InterceptedRequest) -> Option<StoredResponse> {
        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Variant discovery request failed");
                self.metrics.request("discovery", "network_error");
                return None;
            }
        };

        if response.is_ok() {
            match VariantDiscovery::parse(&response.body) {
                Some(discovery) => {
                    debug!(
                        cache_key = %discovery.cache_key,
                        variants = discovery.variants.len(),
                        "Scheduling variant prefetch"
                    );
                    let prefetcher = self.prefetcher.clone();
                    self.tasks.spawn(async move {
                        prefetcher
                            .prefetch_variants(&discovery.cache_key, &discovery.variants)
                            .await;
                    });
                    self.metrics.request("discovery", "prefetch_scheduled");
                }
                None => self.metrics.request("discovery", "no_prefetch"),
            }
        } else {
            self.metrics.request("discovery", "passthrough");
        }

        Some(response)
    }

    async fn cache_first(
        &self,
        request: InterceptedRequest,
        kind: PartitionKind,
        route: Route,
    ) -> StoredResponse {
        let partition = self.names.name(kind);
        let key = request.key();

        match self.store.get(partition, &key).await {
            Ok(Some(hit)) => {
                self.metrics.request(route.label(), "hit");
                return hit;
            }
            Ok(None) => {}
            Err(e) => warn!(partition, key = %key, error = %e, "Cache read failed, treating as miss"),
        }

        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if is_storable(&key, &response) {
                    if let Err(e) = self.store.put(partition, &key, &response).await {
                        warn!(partition, key = %key, error = %e, "Cache write failed");
                    }
                    self.metrics.request(route.label(), "miss_stored");
                } else {
                    self.metrics.request(route.label(), "miss_uncached");
                }
                response
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Image fetch failed, answering 404");
                self.metrics.request(route.label(), "network_error");
                StoredResponse::empty(404)
            }
        }
    }

    async fn network_first(&self, request: InterceptedRequest) -> Option<StoredResponse> {
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                self.metrics.request("navigation", "network");
                Some(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation failed, trying cache");
                self.fallback("navigation", &request).await
            }
        }
    }

    async fn network_with_caching(&self, request: InterceptedRequest) -> Option<StoredResponse> {
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                let key = request.key();
                if is_storable(&key, &response) && self.rules.is_cacheable(&request) {
                    let partition = self.names.name(PartitionKind::Image);
                    if let Err(e) = self.store.put(partition, &key, &response).await {
                        warn!(partition, key = %key, error = %e, "Cache write failed");
                    }
                    self.metrics.request("passthrough", "network_stored");
                } else {
                    self.metrics.request("passthrough", "network");
                }
                Some(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Request failed, trying cache");
                self.fallback("passthrough", &request).await
            }
        }
    }

    /// Any cached match across partitions, else no response.
    async fn fallback(&self, route: &str, request: &InterceptedRequest) -> Option<StoredResponse> {
        match self.store.match_any(&request.key()).await {
            Ok(Some(cached)) => {
                self.metrics.request(route, "cache_fallback");
                Some(cached)
            }
            Ok(None) => {
                self.metrics.request(route, "no_response");
                None
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache fallback failed");
                self.metrics.request(route, "no_response");
                None
            }
        }
    }
}
