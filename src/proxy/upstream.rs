//! Request forwarding
//!
//! This module handles connecting to the origin (or a fixed upstream fetch
//! service), forwarding the client's request and preparing the response for
//! the cache and the client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::Config;
use crate::http::connection::Handler;
use crate::http::field;
use crate::http::headers::Headers;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::cache::{CacheCoordinator, Fetched, Outcome};
use crate::proxy::fingerprint::Fingerprint;
use crate::proxy::tally::{ContentTypeTally, media_type};

/// Headers that only make sense on one hop and are never forwarded.
const HOP_BY_HOP: [&str; 4] = ["Connection", "Keep-Alive", "Proxy-Connection", "Upgrade"];

/// Where origin fetches are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Connect to the host named by each request.
    Direct,
    /// Send every request to this fixed `host:port`.
    Upstream(String),
}

/// Handles proxying client requests through the cache
pub struct ProxyHandler {
    coordinator: Arc<CacheCoordinator>,

    origin: Origin,

    /// Connection timeout duration
    connection_timeout: Duration,

    /// Markup inserted into the `<head>` of HTML responses
    snippet: Option<String>,

    tally: Option<Arc<ContentTypeTally>>,
}

impl ProxyHandler {
    pub fn new(coordinator: Arc<CacheCoordinator>, origin: Origin, connection_timeout: Duration) -> Self {
        Self {
            coordinator,
            origin,
            connection_timeout,
            snippet: None,
            tally: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_tally(mut self, tally: Arc<ContentTypeTally>) -> Self {
        self.tally = Some(tally);
        self
    }

    /// Builds a handler from the origin and extras sections of `cfg`,
    /// reading the injection snippet from disk if one is configured.
    pub async fn from_config(cfg: &Config, coordinator: Arc<CacheCoordinator>) -> Result<Self> {
        let origin = match &cfg.origin.upstream {
            Some(addr) => Origin::Upstream(addr.clone()),
            None => Origin::Direct,
        };
        let mut handler = Self::new(coordinator, origin, cfg.origin.connect_timeout());

        if let Some(path) = &cfg.extras.inject_snippet_path {
            let snippet = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading injection snippet {}", path.display()))?;
            handler = handler.with_snippet(snippet);
        }
        if cfg.extras.content_type_tally {
            handler = handler.with_tally(Arc::new(ContentTypeTally::new(&cfg.extras.tally_path)));
        }

        Ok(handler)
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// Serves a client request from the cache, fetching it from the origin
    /// when it is not cached yet. Returns the bytes to send to the client.
    pub async fn forward_request(&self, mut request: Request) -> Result<Vec<u8>> {
        request.resolve_origin()?;
        let fingerprint = Fingerprint::from_request(&mut request)?;

        tracing::info!(
            method = %request.method,
            key = %fingerprint,
            "Proxying request"
        );

        let served = self
            .coordinator
            .serve(&fingerprint, move || self.fetch(request))
            .await?;

        if let (Outcome::Fetched { saved: true, content_type: Some(content_type) }, Some(tally)) =
            (&served.outcome, &self.tally)
        {
            if let Err(e) = tally.record(content_type).await {
                tracing::warn!(error = %e, "could not update content-type tally");
            }
        }

        Ok(served.bytes)
    }

    /// Sends the request to the origin and serializes its response.
    async fn fetch(&self, mut request: Request) -> Result<Fetched> {
        prepare_forward_headers(&mut request.headers);

        let stream = self.connect(&mut request).await?;
        let mut response = request
            .fetch_response(Some(stream))
            .await
            .context("Failed to fetch response from origin")?;

        tracing::info!(
            status = response.status.as_u16(),
            method = %request.method,
            target = %request.target,
            "Response received from origin"
        );

        response.headers.set(field::CONNECTION.name(), "close");
        if let Some(snippet) = &self.snippet {
            inject_into_response(&mut response, snippet).await?;
        }

        let location = response.location().map(str::to_string);
        let content_type = response
            .header(field::CONTENT_TYPE.name())
            .map(|value| media_type(value).to_string());
        let bytes = response.to_bytes().await?;

        Ok(Fetched {
            bytes,
            location,
            content_type,
        })
    }

    /// Connect to the origin with timeout
    async fn connect(&self, request: &mut Request) -> Result<TcpStream> {
        let (host, port) = request.resolve_origin()?;
        let addr = match &self.origin {
            Origin::Direct => format!("{}:{}", host, port),
            Origin::Upstream(addr) => addr.clone(),
        };

        let stream = timeout(self.connection_timeout, TcpStream::connect(&addr))
            .await
            .context("Connection timeout")?
            .with_context(|| format!("Failed to connect to {}", addr))?;

        tracing::trace!(%addr, "Connected to origin");
        Ok(stream)
    }
}

impl Handler for ProxyHandler {
    async fn handle(&self, request: Request) -> Result<Vec<u8>> {
        self.forward_request(request).await
    }
}

/// Removes hop-by-hop headers and asks the origin to close the connection
/// after responding.
pub fn prepare_forward_headers(headers: &mut Headers) {
    for name in HOP_BY_HOP {
        headers.delete(name);
    }
    headers.set(field::CONNECTION.name(), "close");
}

async fn inject_into_response(response: &mut Response, snippet: &str) -> Result<()> {
    let is_html = response
        .header(field::CONTENT_TYPE.name())
        .is_some_and(|value| media_type(value).to_ascii_lowercase().contains("html"));
    if !is_html {
        return Ok(());
    }

    let body = response.body.contents().await?;
    if let Some(injected) = inject_snippet(&body, snippet) {
        tracing::debug!(bytes = snippet.len(), "snippet injected");
        response.set_body(injected);
    }
    Ok(())
}

/// Inserts `snippet` right after the first `<head ...>` tag, or wrapped in
/// `<head>...</head>` right after the first `<html ...>` tag. Returns `None`
/// when the document has neither.
pub fn inject_snippet(body: &[u8], snippet: &str) -> Option<Vec<u8>> {
    let (at, insert) = match find_tag_end(body, b"head") {
        Some(at) => (at, snippet.to_string()),
        None => (find_tag_end(body, b"html")?, format!("<head>{}</head>", snippet)),
    };

    let mut out = Vec::with_capacity(body.len() + insert.len());
    out.extend_from_slice(&body[..at]);
    out.extend_from_slice(insert.as_bytes());
    out.extend_from_slice(&body[at..]);
    Some(out)
}

/// Offset just past the `>` of the first opening tag called `name`
/// (case-insensitive, spaces allowed after `<`).
fn find_tag_end(body: &[u8], name: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = body[from..].iter().position(|&b| b == b'<') {
        let open = from + offset;
        let mut i = open + 1;
        while body.get(i) == Some(&b' ') {
            i += 1;
        }

        let end = i + name.len();
        let name_matches = body
            .get(i..end)
            .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name));
        let boundary = body
            .get(end)
            .is_some_and(|&b| b == b'>' || b.is_ascii_whitespace() || b == b'/');
        if name_matches && boundary {
            let close = body[end..].iter().position(|&b| b == b'>')?;
            return Some(end + close + 1);
        }
        from = open + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_tag_is_not_head() {
        assert_eq!(find_tag_end(b"<header><head lang=en>", b"head"), Some(22));
    }
}
