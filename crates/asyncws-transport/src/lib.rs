//! # asyncws Transport
//!
//! Endpoint resolution and the byte-stream transport the asyncws client runs over.

#![warn(missing_docs)]

/// Remote endpoint descriptor and URI resolution
pub mod endpoint;

/// Buffered read and write halves of a transport
pub mod stream;

/// Transport abstraction and connectors
pub mod transport;

/// Transport-specific error types
pub mod error;

pub use endpoint::{Credentials, RemoteEndpoint};
pub use stream::{TransportReader, TransportWriter};
pub use transport::{ConnectionInfo, Connector, TcpConnector, Transport};
pub use error::TransportError;
