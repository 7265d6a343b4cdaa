//! Error types for protocol operations

use thiserror::Error;
use std::io;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer violated the protocol (bad opcode, RSV bits, masking, close payload)
    #[error("Protocol violation: {0}")]
    Violation(String),

    /// Malformed frame (oversized or fragmented control frame)
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Payload exceeds the configured maximum
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Announced or accumulated payload size
        size: u64,
        /// Maximum allowed size
        max: usize,
    },

    /// Close status code outside the permitted set
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// The stream ended in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Shorthand for a protocol violation
    pub fn violation(reason: impl Into<String>) -> Self {
        Self::Violation(reason.into())
    }

    /// Shorthand for a frame error
    pub fn frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame(reason.into())
    }
}
