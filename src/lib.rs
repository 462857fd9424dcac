//! Hoard - Caching HTTP Forward Proxy
//!
//! Core library for the HTTP message engine and the cache coordinator.

pub mod config;
pub mod http;
pub mod proxy;
pub mod server;
