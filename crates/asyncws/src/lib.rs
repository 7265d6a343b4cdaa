//! # asyncws
//!
//! An async client for the WebSocket protocol.
//!
//! A [`Connection`] owns one background read loop that decodes frames, answers
//! pings, follows the close handshake and pushes complete messages onto a
//! bounded queue drained by [`Connection::receive`]. An optional keepalive
//! task pings the peer and fails the connection when no pong comes back.
//!
//! ```no_run
//! # async fn run() -> asyncws::Result<()> {
//! let conn = asyncws::connect("ws://127.0.0.1:9001/echo", Default::default()).await?;
//! conn.send("hello").await?;
//! let reply = conn.receive().await?;
//! println!("{:?}", reply);
//! conn.close(1000, "done").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use asyncws_proto as proto;
pub use asyncws_transport as transport;

/// Error types for the asyncws client
pub mod error;

/// Connection options
pub mod config;

/// Opening handshake
pub mod handshake;

/// Connection state machine and public connection handle
pub mod connection;

/// Connecting to endpoints
pub mod client;

mod keepalive;
mod queue;
mod reader;

pub use error::WsError;
pub use config::ConnectOptions;
pub use connection::{Connection, PongWaiter, State};
pub use client::{connect, connect_with_transport, ClientBuilder};
pub use asyncws_proto::{close, Extension, Message, MessageKind};
pub use asyncws_transport::{ConnectionInfo, Connector, RemoteEndpoint, TcpConnector, Transport};

/// Result type alias for asyncws operations
pub type Result<T> = std::result::Result<T, WsError>;
