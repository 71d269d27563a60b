//! Error types for the ingestion service.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable error case shared by the ledger, the writer and
//! the server. Per-connection failures never surface here as fatal: they end
//! the affected connection only.
//!
//! ## Error Cases
//! - `InvalidRecord`: A line was not exactly nine ASCII digits.
//! - `ChannelError`: An internal communication failure between tasks.
//! - `Timeout`: A bounded shutdown phase did not finish in time.
//! - `ServiceShutdown`: Work arrived after the service stopped accepting it.
//! - `Io`: File or socket I/O failed (log file creation, bind).
//! - `Config`: A configuration value was rejected.

use std::sync::Arc;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the ingestion service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The line is not a nine digit record.
    #[error("Invalid record: {line:?}")]
    InvalidRecord { line: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A bounded wait expired.
    #[error("Timed out: {context}")]
    Timeout { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A configuration value was rejected.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
