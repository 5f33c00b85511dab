//! Server error types.

use thiserror::Error;

/// Errors raised while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested `host:port`.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The bound socket did not report a local address.
    #[error("failed to read local address: {0}")]
    LocalAddr(std::io::Error),
}
