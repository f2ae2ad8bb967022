//! Network transport used by the router, warm-up and prefetcher.

pub mod fetcher;

pub use fetcher::{FetchError, Fetcher, HttpFetcher, SharedFetcher};
