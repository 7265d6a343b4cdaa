//! Transport-specific error types

use thiserror::Error;
use std::io;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed or unsupported endpoint URI
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// The endpoint requires a capability this connector does not provide
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line exceeded the permitted length
    #[error("Line exceeds {max} bytes")]
    LineTooLong {
        /// Maximum line length in bytes
        max: usize,
    },

    /// The stream ended before the expected data arrived
    #[error("Transport closed")]
    Closed,
}
