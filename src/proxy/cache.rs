//! On-disk response cache with one origin fetch per fingerprint.
//!
//! Each fingerprint maps to one file in the cache directory and moves
//! through three states:
//!
//! ```text
//!   MISSING ──claim──▶ PENDING ──fetch ok──▶ READY
//!      ▲                  │
//!      └──stale / failed──┘
//! ```
//!
//! A PENDING entry is a placeholder file whose first line is
//! [`PLACEHOLDER_MARKER`] and whose second line is the HTTP-date it was
//! written. Requests that find a fresh placeholder poll until it turns into a
//! real response; a placeholder older than the staleness threshold is treated
//! as abandoned, deleted, and claimed again.
//!
//! The check-then-claim step runs under one lock that also guards the
//! redirect map. The lock is never held across the origin fetch.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

use crate::config::{CacheConfig, OriginConfig};
use crate::proxy::fingerprint::Fingerprint;

/// First line of a placeholder file.
pub const PLACEHOLDER_MARKER: &str = "~empty~";

#[derive(Debug, Error)]
pub enum CacheError {
    /// The fetch for a claimed fingerprint failed or timed out. The
    /// placeholder has already been removed.
    #[error("cache claim for {key} failed: {source}")]
    ClaimFailure {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid cache settings: {0}")]
    InvalidSettings(String),

    #[error("cache I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// What an origin fetch hands back to the coordinator.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    /// The full serialized response.
    pub bytes: Vec<u8>,
    /// Raw Location header, if the response redirects.
    pub location: Option<String>,
    /// Media type of the response, without parameters.
    pub content_type: Option<String>,
}

/// How a request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Served from a READY cache file.
    Hit,
    /// Fetched from the origin; `saved` tells whether the response was
    /// written to the cache.
    Fetched {
        saved: bool,
        content_type: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Served {
    pub bytes: Vec<u8>,
    pub outcome: Outcome,
}

/// Tunables, usually taken from [`CacheConfig`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub read_from_cache: bool,
    pub save_to_cache: bool,
    pub stale_after: Duration,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::new(&CacheConfig::default(), &OriginConfig::default())
    }
}

impl CacheSettings {
    pub fn new(cache: &CacheConfig, origin: &OriginConfig) -> Self {
        Self {
            read_from_cache: cache.read_from_cache,
            save_to_cache: cache.save_to_cache,
            stale_after: cache.stale_after(),
            poll_interval: cache.poll_interval(),
            fetch_timeout: origin.fetch_timeout(),
        }
    }

    /// A fetch must end before its placeholder can be judged stale, or a
    /// second claim could start while the first is still running.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout >= self.stale_after {
            return Err(CacheError::InvalidSettings(format!(
                "fetch timeout {:?} must be shorter than the staleness threshold {:?}",
                self.fetch_timeout, self.stale_after
            )));
        }
        Ok(())
    }
}

/// Identifies one claim on a cache path.
type ClaimId = u64;

#[derive(Debug, Default)]
struct CacheState {
    /// Placeholder paths this process has written and not yet resolved, with
    /// the claim that currently owns each one.
    in_flight: HashMap<PathBuf, ClaimId>,
    next_claim: ClaimId,
    /// Fingerprint key -> normalized target of the last redirect it returned.
    redirects: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Missing,
    Pending { stale: bool },
    Ready,
}

#[derive(Debug)]
pub struct CacheCoordinator {
    dir: PathBuf,
    settings: CacheSettings,
    state: Mutex<CacheState>,
}

impl CacheCoordinator {
    /// Creates the cache directory if needed.
    pub async fn open(dir: impl Into<PathBuf>, settings: CacheSettings) -> Result<Self> {
        settings.validate()?;
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;
        tracing::info!(dir = %dir.display(), "cache directory ready");

        Ok(Self {
            dir,
            settings,
            state: Mutex::new(CacheState::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        fingerprint.path_in(&self.dir)
    }

    /// Serves `fingerprint` from the cache, or claims it and runs `fetch`.
    ///
    /// At most one fetch per fingerprint is in flight at a time; concurrent
    /// callers wait for it and then read the cached result. The fetch is
    /// cancelled once the configured fetch timeout passes.
    pub async fn serve<F, Fut>(&self, fingerprint: &Fingerprint, fetch: F) -> Result<Served>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Fetched>>,
    {
        let path = self.path_for(fingerprint);

        let claim = loop {
            let mut state = self.state.lock().await;
            match self.inspect(&path).await? {
                Entry::Ready if self.settings.read_from_cache => {
                    drop(state);
                    match tokio::fs::read(&path).await {
                        Ok(bytes) => {
                            tracing::debug!(key = %fingerprint, "cache hit");
                            return Ok(Served {
                                bytes,
                                outcome: Outcome::Hit,
                            });
                        }
                        // removed between the check and the read; look again
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => return Err(CacheError::io(&path, e)),
                    }
                }
                Entry::Pending { stale: false } => {
                    drop(state);
                    tracing::trace!(key = %fingerprint, "fetch pending elsewhere, waiting");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
                Entry::Pending { stale: true } => {
                    tracing::warn!(key = %fingerprint, "stale placeholder, reclaiming");
                    remove_if_exists(&path).await?;
                    state.in_flight.remove(&path);
                }
                Entry::Missing | Entry::Ready => {
                    write_placeholder(&path).await?;
                    state.next_claim += 1;
                    let claim = state.next_claim;
                    state.in_flight.insert(path.clone(), claim);
                    tracing::debug!(key = %fingerprint, claim, "cache miss, placeholder written");
                    break claim;
                }
            }
        };

        let result = match tokio::time::timeout(self.settings.fetch_timeout, fetch()).await {
            Ok(Ok(fetched)) => self.complete(fingerprint, &path, claim, fetched).await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!(
                "origin fetch timed out after {:?}",
                self.settings.fetch_timeout
            )),
        };

        match result {
            Ok(served) => Ok(served),
            Err(e) => {
                tracing::warn!(key = %fingerprint, error = %e, "fetch failed, removing placeholder");
                self.abandon(&path, claim).await;
                Err(CacheError::ClaimFailure {
                    key: fingerprint.key().to_string(),
                    source: e.into(),
                })
            }
        }
    }

    /// Records the fetched response: redirect bookkeeping first, then the
    /// cache file replaces the placeholder. A claim that was reclaimed as
    /// stale in the meantime leaves the path to its new owner.
    async fn complete(
        &self,
        fingerprint: &Fingerprint,
        path: &Path,
        claim: ClaimId,
        fetched: Fetched,
    ) -> anyhow::Result<Served> {
        let mut state = self.state.lock().await;
        let key = fingerprint.key();

        let redirect = fetched.location.as_deref().map(redirect_key);
        if let Some(target) = &redirect {
            state.redirects.insert(key.to_string(), target.clone());
            tracing::debug!(%key, %target, "redirect recorded");

            if state.redirects.get(target).map(String::as_str) == Some(key) {
                state.redirects.remove(target);
                let target_path = self.path_for(&Fingerprint::from_key(target.clone()));
                remove_if_exists(&target_path).await?;
                tracing::info!(%key, %target, "two-hop redirect cycle broken");
            }
        }

        let self_redirect = redirect.as_deref() == Some(key);
        let saved = if state.in_flight.get(path) != Some(&claim) {
            tracing::warn!(%key, claim, "claim was superseded, response not cached");
            false
        } else {
            let save = self.settings.save_to_cache && !self_redirect;
            if save {
                write_atomic(path, &fetched.bytes).await?;
                tracing::debug!(%key, bytes = fetched.bytes.len(), "response cached");
            } else {
                remove_if_exists(path).await?;
            }
            state.in_flight.remove(path);
            save
        };

        Ok(Served {
            bytes: fetched.bytes,
            outcome: Outcome::Fetched {
                saved,
                content_type: fetched.content_type,
            },
        })
    }

    /// Drops a failed claim. The placeholder is only removed while this
    /// claim still owns the path.
    async fn abandon(&self, path: &Path, claim: ClaimId) {
        let mut state = self.state.lock().await;
        if state.in_flight.get(path) != Some(&claim) {
            tracing::debug!(claim, "claim was superseded, leaving path alone");
            return;
        }
        state.in_flight.remove(path);
        if let Err(e) = remove_if_exists(path).await {
            tracing::error!(error = %e, "could not remove placeholder");
        }
    }

    /// Looks at the first two lines of a cache file.
    async fn inspect(&self, path: &Path) -> Result<Entry> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Entry::Missing),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        let mut reader = BufReader::new(file);
        let mut firstline = String::new();
        reader
            .read_line(&mut firstline)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        if firstline.trim_end() != PLACEHOLDER_MARKER {
            return Ok(Entry::Ready);
        }

        let mut created = String::new();
        reader
            .read_line(&mut created)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        let stale = match httpdate::parse_http_date(created.trim()) {
            Ok(created) => SystemTime::now()
                .duration_since(created)
                .is_ok_and(|age| age > self.settings.stale_after),
            // a placeholder without a readable timestamp cannot be waited on
            Err(_) => true,
        };
        Ok(Entry::Pending { stale })
    }

    /// Number of placeholders this process is currently fetching for.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// The normalized redirect target last seen for `key`.
    pub async fn redirect_for(&self, key: &str) -> Option<String> {
        self.state.lock().await.redirects.get(key).cloned()
    }

    /// Deletes every placeholder still in flight.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (path, _) in state.in_flight.drain() {
            match remove_if_exists(&path).await {
                Ok(()) => tracing::info!(path = %path.display(), "removed in-flight placeholder"),
                Err(e) => tracing::error!(error = %e, "could not remove placeholder"),
            }
        }
    }
}

/// Normalizes a Location value into fingerprint form: a `continue=` query
/// parameter names the real destination, the `http://` scheme is dropped and
/// `%3D` is decoded.
pub fn redirect_key(location: &str) -> String {
    let mut target = location;
    for part in location.split('&') {
        if let Some(rest) = part.strip_prefix("continue=") {
            target = rest;
            break;
        }
    }
    let target = target.strip_prefix("http://").unwrap_or(target);
    target.replace("%3D", "=")
}

/// Placeholder contents: the marker and the creation time.
pub fn placeholder_contents(created: SystemTime) -> String {
    format!("{}\n{}\n", PLACEHOLDER_MARKER, httpdate::fmt_http_date(created))
}

async fn write_placeholder(path: &Path) -> Result<()> {
    tokio::fs::write(path, placeholder_contents(SystemTime::now()))
        .await
        .map_err(|e| CacheError::io(path, e))
}

/// Writes next to `path` and renames into place, so readers never see a
/// partial response.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, bytes)
        .await
        .map_err(|e| CacheError::io(&partial, e))?;
    tokio::fs::rename(&partial, path)
        .await
        .map_err(|e| CacheError::io(path, e))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_key_prefers_continue_parameter() {
        assert_eq!(
            redirect_key("http://login.example.com/?a=1&continue=http://example.com/x%3D1"),
            "example.com/x=1"
        );
    }

    #[test]
    fn redirect_key_strips_scheme() {
        assert_eq!(redirect_key("http://example.com/b"), "example.com/b");
        assert_eq!(redirect_key("https://example.com/b"), "https://example.com/b");
    }
}
