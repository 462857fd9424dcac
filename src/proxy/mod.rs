//! Caching forward proxy
//!
//! This module implements the proxy logic: request fingerprinting, the
//! on-disk cache coordinator, origin forwarding and the content-type tally.

pub mod cache;
pub mod fingerprint;
pub mod tally;
pub mod upstream;

pub use cache::{CacheCoordinator, CacheError, CacheSettings};
pub use fingerprint::Fingerprint;
pub use upstream::{Origin, ProxyHandler};
