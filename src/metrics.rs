//! Prometheus counters for routing outcomes and prefetch results.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters shared by the router, prefetcher and HTTP surface.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    prefetch: IntCounterVec,
}

pub type SharedMetrics = Arc<Metrics>;

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new(
                "offline_cache_requests_total",
                "Intercepted requests by route and outcome",
            ),
            &["route", "outcome"],
        )?;
        let prefetch = IntCounterVec::new(
            Opts::new(
                "offline_cache_prefetch_total",
                "Prefetch fetches by kind and result",
            ),
            &["kind", "result"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(prefetch.clone()))?;

        Ok(Self {
            registry,
            requests,
            prefetch,
        })
    }

    /// Record one routed request, e.g. `("image", "hit")`.
    pub fn request(&self, route: &str, outcome: &str) {
        self.requests.with_label_values(&[route, outcome]).inc();
    }

    /// Record one prefetch item, e.g. `("variant", "fetched")`.
    pub fn prefetch(&self, kind: &str, result: &str) {
        self.prefetch.with_label_values(&[kind, result]).inc();
    }

    pub fn request_count(&self, route: &str, outcome: &str) -> u64 {
        self.requests.with_label_values(&[route, outcome]).get()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
