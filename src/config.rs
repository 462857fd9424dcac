//! Runtime configuration.
//!
//! Settings come from an optional YAML file named by `HOARD_CONFIG`; any
//! section or field left out takes its default. The environment variables
//! `LISTEN`, `CACHE_DIR` and `UPSTREAM` override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub origin: OriginConfig,
    pub extras: ExtrasConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:1234".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub read_from_cache: bool,
    pub save_to_cache: bool,
    /// Age after which an unfinished placeholder is considered abandoned.
    pub stale_after_secs: u64,
    /// How long a request waiting on another fetch sleeps between checks.
    pub poll_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache"),
            read_from_cache: true,
            save_to_cache: true,
            stale_after_secs: 60,
            poll_interval_ms: 100,
        }
    }
}

impl CacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Fixed `host:port` of a fetch service. When unset, requests go straight
    /// to the host they name.
    pub upstream: Option<String>,
    pub connect_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            upstream: None,
            connect_timeout_secs: 5,
            fetch_timeout_secs: 30,
        }
    }
}

impl OriginConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtrasConfig {
    /// File whose contents are injected into the `<head>` of HTML responses.
    pub inject_snippet_path: Option<PathBuf>,
    pub content_type_tally: bool,
    pub tally_path: PathBuf,
    pub error_log_path: PathBuf,
}

impl Default for ExtrasConfig {
    fn default() -> Self {
        Self {
            inject_snippet_path: None,
            content_type_tally: true,
            tally_path: PathBuf::from("content-type.csv"),
            error_log_path: PathBuf::from("error.log"),
        }
    }
}

impl Config {
    /// Loads the file named by `HOARD_CONFIG` (if set) and applies
    /// environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("HOARD_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {}", path))?;
                Self::from_yaml(&text).with_context(|| format!("parsing config file {}", path))?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(listen_addr) = std::env::var("LISTEN") {
            self.server.listen_addr = listen_addr;
        }
        if let Ok(dir) = std::env::var("CACHE_DIR") {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Ok(upstream) = std::env::var("UPSTREAM") {
            self.origin.upstream = Some(upstream).filter(|addr| !addr.is_empty());
        }
    }
}
