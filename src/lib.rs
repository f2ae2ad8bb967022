//! offline-cache: offline cache & prefetch layer for a playthrough tracker.
//!
//! Sits between the host page and the network, keeping versioned
//! partitions of captured HTTP responses:
//!   app-shell (warm-up set) · images (generic) · sprites (variant renders)
//!
//! Every intercepted request is routed to one caching strategy, sprite
//! variants announced by the discovery API are prefetched in the background,
//! and a control channel answers status queries and forced upgrades.

pub mod cache;
pub mod config;
pub mod http;
pub mod layer;
pub mod metrics;
pub mod net;
pub mod server;
