//! Connecting to endpoints

use crate::{handshake, ConnectOptions, Connection, Extension, Result, WsError};
use asyncws_transport::{Connector, RemoteEndpoint, TcpConnector, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Connect to `uri` over TCP and complete the handshake.
///
/// `connect_timeout` bounds the transport connect and the handshake together.
pub async fn connect(uri: &str, options: ConnectOptions) -> Result<Connection> {
    ClientBuilder::new(uri).with_options(options).connect().await
}

/// Run the handshake over an already established transport.
///
/// Use this for secure endpoints: open and secure the stream yourself, then
/// hand it over.
pub async fn connect_with_transport(
    uri: &str,
    transport: Transport,
    options: ConnectOptions,
) -> Result<Connection> {
    let endpoint = RemoteEndpoint::parse(uri)?;
    let id = Uuid::new_v4();
    debug!("Connection {} handshaking with {} over a supplied transport", id, endpoint);

    let connect_timeout = options.connect_timeout;
    let handshake = async move {
        let mut transport = transport;
        let outcome = handshake::perform(&mut transport, &endpoint, &options).await?;
        Ok::<_, WsError>(Connection::open(id, endpoint, transport, outcome.subprotocol, options).await)
    };

    tokio::time::timeout(connect_timeout, handshake)
        .await
        .map_err(|_| WsError::Timeout {
            duration: connect_timeout,
        })?
}

/// Builder for configuring connections
pub struct ClientBuilder {
    uri: String,
    options: ConnectOptions,
    connector: Arc<dyn Connector>,
}

impl ClientBuilder {
    /// Create a builder for `uri` with default options and the TCP connector
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            options: ConnectOptions::default(),
            connector: Arc::new(TcpConnector::default()),
        }
    }

    /// Replace all options
    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom connector, e.g. one that sets up TLS
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Set close handshake timeout
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.options.close_timeout = timeout;
        self
    }

    /// Set keepalive ping interval; `None` disables keepalive
    pub fn with_ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.options.ping_interval = interval;
        self
    }

    /// Set keepalive pong timeout; `None` waits indefinitely
    pub fn with_ping_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.ping_timeout = timeout;
        self
    }

    /// Replace the generated handshake headers with `headers`
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.options.headers = Some(headers);
        self
    }

    /// Set received message queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.options.queue_capacity = capacity;
        self
    }

    /// Set maximum message size; `None` for unbounded
    pub fn with_max_message_size(mut self, max: Option<usize>) -> Self {
        self.options.max_message_size = max;
        self
    }

    /// Set handshake response limits
    pub fn with_handshake_limits(mut self, max_lines: usize, max_line_len: usize) -> Self {
        self.options.max_handshake_lines = max_lines;
        self.options.max_handshake_line_len = max_line_len;
        self
    }

    /// Offer a subprotocol
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.options.subprotocols.push(protocol.into());
        self
    }

    /// Set `User-Agent`; `None` omits the header
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.options.user_agent = user_agent;
        self
    }

    /// Set `Origin`
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.options.origin = Some(origin.into());
        self
    }

    /// Install a frame extension
    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.options.extensions.push(extension);
        self
    }

    /// Get the options built so far
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Connect and complete the handshake
    pub async fn connect(self) -> Result<Connection> {
        let endpoint = RemoteEndpoint::parse(&self.uri)?;
        let id = Uuid::new_v4();
        info!("Connection {} connecting to {}", id, endpoint);

        let Self {
            options, connector, ..
        } = self;
        let connect_timeout = options.connect_timeout;

        let establish = async move {
            let mut transport = connector.connect(&endpoint).await?;
            let outcome = handshake::perform(&mut transport, &endpoint, &options).await?;
            Ok::<_, WsError>(Connection::open(id, endpoint, transport, outcome.subprotocol, options).await)
        };

        tokio::time::timeout(connect_timeout, establish)
            .await
            .map_err(|_| WsError::Timeout {
                duration: connect_timeout,
            })?
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("uri", &self.uri)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
