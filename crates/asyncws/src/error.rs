//! Error types for the asyncws client

use asyncws_proto::{close, ProtocolError};
use asyncws_transport::TransportError;
use thiserror::Error;
use std::time::Duration;

/// Main error type for asyncws operations
#[derive(Debug, Error)]
pub enum WsError {
    /// The URI could not be resolved to an endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The transport could not be established
    #[error("Connection error: {0}")]
    Connect(String),

    /// Timeout errors
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// The opening handshake was refused or malformed
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        /// HTTP status code, when a status line was parsed
        status: Option<u16>,
        /// What went wrong
        reason: String,
    },

    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Oversized or fragmented control frame
    #[error("Frame error: {0}")]
    Frame(String),

    /// Payload exceeds the configured maximum message size
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge {
        /// Announced or accumulated size
        size: u64,
        /// Maximum allowed size
        max: usize,
    },

    /// Ping data collides with a ping still awaiting its pong
    #[error("Ping with the same data is already outstanding")]
    DuplicatePingData,

    /// Close code outside the permitted set
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// The connection is closing or closed
    #[error("Connection closed: {}", explain(.code, .reason))]
    ConnectionClosed {
        /// Recorded close code
        code: u16,
        /// Recorded close reason
        reason: String,
    },

    /// `close` was called on a closed connection
    #[error("Connection already closed")]
    AlreadyClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Build a `ConnectionClosed` error
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Build a `HandshakeFailed` error
    pub fn handshake(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            status,
            reason: reason.into(),
        }
    }

    /// Close code carried by a `ConnectionClosed` error
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn explain(code: &u16, reason: &str) -> String {
    let class = close::describe(*code);
    if reason.is_empty() {
        format!("code = {} ({})", code, class)
    } else {
        format!("code = {} ({}), reason = {}", code, class, reason)
    }
}

impl From<ProtocolError> for WsError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Violation(msg) => Self::Protocol(msg),
            ProtocolError::InvalidFrame(msg) => Self::Frame(msg),
            ProtocolError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            ProtocolError::InvalidCloseCode(code) => Self::InvalidCloseCode(code),
            ProtocolError::UnexpectedEof => Self::Protocol("stream ended mid-frame".to_string()),
            ProtocolError::Io(e) => Self::Io(e),
        }
    }
}

impl From<TransportError> for WsError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidEndpoint(msg) => Self::InvalidEndpoint(msg),
            TransportError::Connection(msg) => Self::Connect(msg),
            TransportError::Unsupported(msg) => Self::Connect(msg),
            TransportError::Io(e) => Self::Io(e),
            TransportError::LineTooLong { max } => {
                Self::handshake(None, format!("response line exceeds {} bytes", max))
            }
            TransportError::Closed => Self::closed(close::ABNORMAL, ""),
        }
    }
}
