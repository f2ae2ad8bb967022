//! Network transport.
//!
//! The layer talks to the network only through [`Fetcher`], so tests can
//! script responses and failures. [`HttpFetcher`] is the reqwest-backed
//! implementation used by the proxy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONNECTION, HOST, TRANSFER_ENCODING};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::http::{InterceptedRequest, StoredResponse};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Unreachable(String),
}

impl FetchError {
    /// Connection failures carry just the target; other transport errors keep the source.
    fn from_send(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let target = e.url().map(|u| u.to_string()).unwrap_or_default();
            FetchError::Unreachable(target)
        } else {
            FetchError::Network(e)
        }
    }
}

/// Sends a request to the network and buffers the full response.
///
/// Any HTTP status is a successful fetch; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<StoredResponse, FetchError>;
}

/// Shared handle to a fetcher.
pub type SharedFetcher = Arc<dyn Fetcher>;

/// Hop-by-hop headers that must not be forwarded.
fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in [HOST, CONNECTION, TRANSFER_ENCODING] {
        out.remove(name);
    }
    out
}

/// reqwest-backed fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<StoredResponse, FetchError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(forwardable(&request.headers))
            .body(request.body.clone())
            .send()
            .await
            .map_err(FetchError::from_send)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| **name != TRANSFER_ENCODING && **name != CONNECTION)
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!(
            method = %request.method,
            url = %request.url,
            status,
            size = body.len(),
            "Fetched from network"
        );

        Ok(StoredResponse::new(status, headers, body))
    }
}
