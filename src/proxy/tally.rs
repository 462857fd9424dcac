use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::sync::Mutex;

/// Counts the media types of cached responses and keeps a
/// `content-type,count` CSV on disk up to date.
#[derive(Debug)]
pub struct ContentTypeTally {
    path: PathBuf,
    counts: Mutex<BTreeMap<String, u64>>,
}

impl ContentTypeTally {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counts one response and rewrites the CSV. Parameters after `;` are
    /// ignored, so `text/html; charset=utf-8` counts as `text/html`.
    pub async fn record(&self, content_type: &str) -> anyhow::Result<()> {
        let media_type = media_type(content_type);
        if media_type.is_empty() {
            return Ok(());
        }

        let mut counts = self.counts.lock().await;
        *counts.entry(media_type.to_string()).or_insert(0) += 1;

        let mut csv = String::new();
        for (media_type, count) in counts.iter() {
            csv.push_str(&format!("{},{}\n", media_type, count));
        }
        tokio::fs::write(&self.path, csv)
            .await
            .with_context(|| format!("writing {}", self.path.display()))
    }

    pub async fn count(&self, media_type: &str) -> u64 {
        self.counts.lock().await.get(media_type).copied().unwrap_or(0)
    }
}

/// The media type part of a Content-Type value.
pub fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}
