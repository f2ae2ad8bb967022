//! HTTP surface for the host page.
//!
//! - [`proxy`]: control/health/metrics routes and the intercepting fallback

pub mod proxy;
