//! Shared test doubles: a scripted fetcher and a layer wired over a memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use offline_cache::cache::store::{MemoryStore, SharedStore};
use offline_cache::config::Config;
use offline_cache::http::{InterceptedRequest, StoredResponse};
use offline_cache::layer::Layer;
use offline_cache::metrics::Metrics;
use offline_cache::net::{FetchError, Fetcher};

pub const ORIGIN: &str = "https://tracker.example";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Debug, Clone)]
enum Script {
    Respond(u16, Vec<u8>),
    Fail,
}

/// Answers from a fixed table; unknown URLs fail like an unreachable host.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    delay: Option<Duration>,
    slow: HashMap<String, Duration>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay answers for one URL only; overrides `with_delay` for it.
    pub fn slow(mut self, url: &Url, delay: Duration) -> Self {
        self.slow.insert(url.to_string(), delay);
        self
    }

    pub fn respond(self, url: &Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Script::Respond(status, body.into()));
        self
    }

    pub fn fail(self, url: &Url) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Script::Fail);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &Url) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == url.as_str())
            .count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<StoredResponse, FetchError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        let delay = self
            .slow
            .get(request.url.as_str())
            .copied()
            .or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable("offline".to_string()));
        }

        let script = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned();
        match script {
            Some(Script::Respond(status, body)) => Ok(StoredResponse::new(
                status,
                vec![("content-type".to_string(), "application/octet-stream".to_string())],
                body,
            )),
            Some(Script::Fail) | None => Err(FetchError::Unreachable(request.url.to_string())),
        }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.upstream = ORIGIN.to_string();
    config.warm_up.urls = vec!["/".to_string()];
    config
}

pub struct Harness {
    pub layer: Arc<Layer>,
    pub store: SharedStore,
    pub fetcher: Arc<ScriptedFetcher>,
    pub config: Config,
}

impl Harness {
    pub fn new(fetcher: ScriptedFetcher) -> Self {
        Self::with_config(test_config(), MemoryStore::shared(), fetcher)
    }

    pub fn with_config(config: Config, store: SharedStore, fetcher: ScriptedFetcher) -> Self {
        let fetcher = Arc::new(fetcher);
        let metrics = Arc::new(Metrics::new().unwrap());
        let layer = Arc::new(Layer::new(&config, store.clone(), fetcher.clone(), metrics).unwrap());
        Self {
            layer,
            store,
            fetcher,
            config,
        }
    }

    pub fn partition(&self, kind: offline_cache::cache::partition::PartitionKind) -> String {
        self.config.partition_names().name(kind).to_string()
    }

    /// Wait for every spawned prefetch to finish.
    pub async fn settle(&self) {
        self.layer.tasks.close();
        self.layer.tasks.wait().await;
    }
}
