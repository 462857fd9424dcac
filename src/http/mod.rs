//! HTTP/1.1 message engine.
//!
//! Messages are parsed from any buffered byte source and keep their entity
//! body on the wire until something asks for it.
//!
//! # Architecture
//!
//! - **`headers`** / **`field`**: case-insensitive multimap and typed header codecs
//! - **`entity`**: framing decoder (fixed length, chunked, until-close)
//! - **`dispatch`**: `(signal, sender)` publish/subscribe registry
//! - **`body`**: lazily buffered entity that announces raw bytes on the bus
//! - **`parser`**: firstline and header block parsing
//! - **`request`** / **`response`** / **`message`**: the message model
//! - **`writer`**: writes serialized messages to a socket
//! - **`connection`**: per-client state machine
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Parse the client's request head
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Serve from cache or fetch from origin
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               └─ Close → Closed
//! ```

pub mod body;
pub mod connection;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod field;
pub mod headers;
pub mod message;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use error::{FieldError, HttpError};
pub use message::Message;
