//! Error types for the HTTP message engine.

use thiserror::Error;

/// Errors raised while parsing, buffering or fetching HTTP messages.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request-line or status-line could not be split into its parts.
    #[error("malformed firstline: {0:?}")]
    MalformedFirstline(String),

    /// A header line had no colon, or an empty key.
    #[error("malformed headers: {0}")]
    MalformedHeaders(String),

    /// The entity body did not match its declared framing.
    #[error("entity read error: {message}")]
    EntityRead {
        message: String,
        /// Raw bytes consumed by the failing read.
        raw: Vec<u8>,
    },

    /// A bus receiver vetoed buffering with an `Abort` reply.
    #[error("received abort while buffering ({replies} replies)")]
    BufferingAbort { replies: usize },

    /// A buffer operation was invoked from a receiver of that buffer's own
    /// notifications.
    #[error("reentrant call to {0} during dispatch")]
    ReentrantDispatch(&'static str),

    /// The framing is recognised but not supported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// A typed header field failed to decode.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// `fetch_response` could not work out where to connect.
    #[error("Host header field not set; cannot fetch")]
    NoHost,

    /// A message of the wrong kind arrived (e.g. a request where a response
    /// was expected).
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HttpError {
    pub(crate) fn entity_read(message: impl Into<String>, raw: impl Into<Vec<u8>>) -> Self {
        HttpError::EntityRead {
            message: message.into(),
            raw: raw.into(),
        }
    }
}

/// Errors raised by typed header field codecs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("invalid integer in {header}: {value:?}")]
    InvalidInteger { header: &'static str, value: String },

    #[error("invalid http-date in {header}: {value:?}")]
    InvalidDate { header: &'static str, value: String },

    #[error("{header} does not hold a {expected} value")]
    WrongKind {
        header: &'static str,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, HttpError>;
