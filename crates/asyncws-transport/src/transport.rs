//! Transport abstraction and connectors

use async_trait::async_trait;
use crate::{RemoteEndpoint, TransportError, TransportReader, TransportWriter};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Addressing details of an established transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Local socket address, when the transport is a socket
    pub local_addr: Option<SocketAddr>,
    /// Remote socket address, when the transport is a socket
    pub peer_addr: Option<SocketAddr>,
    /// Whether the stream is already secured
    pub secure: bool,
}

/// An established byte stream, split into independently owned halves
pub struct Transport {
    reader: TransportReader,
    writer: TransportWriter,
    info: ConnectionInfo,
}

impl Transport {
    /// Assemble a transport from separate halves
    pub fn new(reader: TransportReader, writer: TransportWriter, info: ConnectionInfo) -> Self {
        Self { reader, writer, info }
    }

    /// Split a bidirectional stream (TCP, TLS, in-memory pipe) into a transport
    pub fn from_stream<S>(stream: S, info: ConnectionInfo) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(TransportReader::new(reader), TransportWriter::new(writer), info)
    }

    /// Get connection information
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Receive half
    pub fn reader_mut(&mut self) -> &mut TransportReader {
        &mut self.reader
    }

    /// Send half
    pub fn writer_mut(&mut self) -> &mut TransportWriter {
        &mut self.writer
    }

    /// Take the halves apart
    pub fn into_parts(self) -> (TransportReader, TransportWriter, ConnectionInfo) {
        (self.reader, self.writer, self.info)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").field("info", &self.info).finish_non_exhaustive()
    }
}

/// Opens transports to remote endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the endpoint, securing the stream if `endpoint.secure` is set
    async fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Transport, TransportError>;
}

/// Plain TCP connector.
///
/// Secure endpoints are refused: wrap the stream yourself and hand it to the
/// client as an established transport.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Disable Nagle's algorithm on new sockets
    pub nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Transport, TransportError> {
        if endpoint.secure {
            return Err(TransportError::Unsupported(format!(
                "{} requires TLS; supply a secured transport",
                endpoint
            )));
        }

        debug!("Opening TCP connection to {}:{}", endpoint.host, endpoint.port);

        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| {
                TransportError::Connection(format!(
                    "Failed to connect to {}:{}: {}",
                    endpoint.host, endpoint.port, e
                ))
            })?;
        stream.set_nodelay(self.nodelay)?;

        let info = ConnectionInfo {
            local_addr: stream.local_addr().ok(),
            peer_addr: stream.peer_addr().ok(),
            secure: false,
        };

        info!("Connected to {}:{}", endpoint.host, endpoint.port);
        Ok(Transport::from_stream(stream, info))
    }
}
