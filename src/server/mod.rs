//! TCP front end: the accept loop and the error log it writes to.

pub mod error_log;
pub mod listener;

pub use error_log::ErrorLog;
