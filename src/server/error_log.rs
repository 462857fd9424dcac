use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::http::error::HttpError;
use crate::proxy::cache::CacheError;

/// Append-only log of connection failures. Each record is the error kind and
/// message on one line followed by the full cause chain.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ErrorLog {
    /// Opens the log, discarding records from earlier runs.
    pub async fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        tokio::fs::write(&path, b"")
            .await
            .with_context(|| format!("truncating error log {}", path.display()))?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, error: &anyhow::Error) -> anyhow::Result<()> {
        let entry = format!("{}, {}\n{:?}\n", error_kind(error), error, error);

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening error log {}", self.path.display()))?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Name of the first error in the chain this crate knows the type of.
pub fn error_kind(error: &anyhow::Error) -> &'static str {
    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<HttpError>() {
            return match e {
                HttpError::MalformedFirstline(_) => "MalformedFirstline",
                HttpError::MalformedHeaders(_) => "MalformedHeaders",
                HttpError::EntityRead { .. } => "EntityReadError",
                HttpError::BufferingAbort { .. } => "BufferingAbort",
                HttpError::ReentrantDispatch(_) => "ReentrantDispatch",
                HttpError::NotImplemented(_) => "NotImplemented",
                HttpError::Field(_) => "FieldError",
                HttpError::NoHost => "NoHost",
                HttpError::UnexpectedMessage(_) => "UnexpectedMessage",
                HttpError::Io(_) => "IoError",
            };
        }
        if let Some(e) = cause.downcast_ref::<CacheError>() {
            return match e {
                CacheError::ClaimFailure { .. } => "CacheClaimFailure",
                CacheError::InvalidSettings(_) => "InvalidSettings",
                CacheError::Io { .. } => "IoError",
            };
        }
        if cause.is::<std::io::Error>() {
            return "IoError";
        }
    }
    "Error"
}
