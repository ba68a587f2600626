//! Frontend error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised by the listeners.
#[derive(Debug, Error)]
pub enum FrontendError {
    /// Failed to bind a listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for frontend operations.
pub type FrontendResult<T> = Result<T, FrontendError>;
