//! Request and response types flowing through the layer.
//!
//! An [`InterceptedRequest`] is what the host page asked for; a
//! [`StoredResponse`] is a fully buffered response that can be replayed
//! without touching the network.

use std::fmt;

use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A top-level or nested document.
    Document,
    /// An `<img>` or other image load.
    Image,
    /// Scripts, styles, fetch/XHR and anything else.
    Other,
}

/// Request mode as reported by the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".avif", ".ico"];

/// Whether the URL path ends in a well-known image extension.
pub fn has_image_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

impl Destination {
    /// Infer the destination from fetch metadata headers, falling back to
    /// the `Accept` header and finally the URL extension.
    pub fn from_headers(headers: &HeaderMap, url: &Url) -> Self {
        if let Some(dest) = headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok()) {
            match dest {
                "document" | "iframe" | "frame" => return Destination::Document,
                "image" => return Destination::Image,
                "" | "empty" => {}
                _ => return Destination::Other,
            }
        }

        let accept = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if accept.starts_with("image/") || has_image_extension(url) {
            Destination::Image
        } else {
            Destination::Other
        }
    }
}

impl RequestMode {
    /// Infer the mode from `Sec-Fetch-Mode`; a bare `Accept: text/html` GET
    /// is treated as a navigation.
    pub fn from_headers(headers: &HeaderMap, method: &Method) -> Self {
        match headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
            Some("navigate") => RequestMode::Navigate,
            Some("same-origin") => RequestMode::SameOrigin,
            Some("no-cors") => RequestMode::NoCors,
            Some(_) => RequestMode::Cors,
            None => {
                let accept = headers
                    .get(ACCEPT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if *method == Method::GET && accept.contains("text/html") {
                    RequestMode::Navigate
                } else {
                    RequestMode::Cors
                }
            }
        }
    }
}

/// A request captured on its way to the network.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub mode: RequestMode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedRequest {
    /// A plain GET with the given destination.
    pub fn get(url: Url, destination: Destination) -> Self {
        let mode = if destination == Destination::Document {
            RequestMode::Navigate
        } else {
            RequestMode::NoCors
        };
        Self {
            method: Method::GET,
            url,
            destination,
            mode,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Build a request from raw parts, inferring destination and mode.
    pub fn from_parts(method: Method, url: Url, headers: HeaderMap, body: Bytes) -> Self {
        let destination = Destination::from_headers(&headers, &url);
        let mode = RequestMode::from_headers(&headers, &method);
        Self {
            method,
            url,
            destination,
            mode,
            headers,
            body,
        }
    }

    /// The identity this request is cached under.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == Destination::Document
    }
}

/// Normalized request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A buffered response: enough to replay it without the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StoredResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A synthetic response with no headers and an empty body.
    pub fn empty(status: u16) -> Self {
        Self::new(status, Vec::new(), Bytes::new())
    }

    /// 2xx.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Only GET requests answered with exactly 200 may be written to a partition.
pub fn is_storable(key: &RequestKey, response: &StoredResponse) -> bool {
    key.is_get() && response.status == 200
}
