//! Connection options

use asyncws_proto::codec::DEFAULT_MAX_PAYLOAD_SIZE;
use asyncws_proto::Extension;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on transport connect plus handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on each close handshake wait
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default delay between keepalive pings
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Default wait for a keepalive pong
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(20);

/// Default number of complete messages buffered ahead of `receive`
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default limit on handshake response lines
pub const DEFAULT_MAX_HANDSHAKE_LINES: usize = 256;

/// Default limit on a single handshake response line
pub const DEFAULT_MAX_HANDSHAKE_LINE_LEN: usize = 8192;

/// Options for opening a connection
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bound on opening the transport and completing the handshake
    pub connect_timeout: Duration,
    /// Bound on each wait of the close handshake before the transport is aborted
    pub close_timeout: Duration,
    /// Keepalive ping interval; `None` disables keepalive
    pub ping_interval: Option<Duration>,
    /// Wait for a keepalive pong; `None` waits indefinitely
    pub ping_timeout: Option<Duration>,
    /// Handshake headers. When set, they replace the generated headers entirely
    pub headers: Option<Vec<(String, String)>>,
    /// Capacity of the received message queue (at least 1)
    pub queue_capacity: usize,
    /// Maximum frame payload and reassembled message size; `None` for unbounded
    pub max_message_size: Option<usize>,
    /// Maximum number of handshake response lines
    pub max_handshake_lines: usize,
    /// Maximum length of one handshake response line
    pub max_handshake_line_len: usize,
    /// Subprotocols offered to the server, in preference order
    pub subprotocols: Vec<String>,
    /// `User-Agent` header value
    pub user_agent: Option<String>,
    /// `Origin` header value
    pub origin: Option<String>,
    /// Frame extensions, applied in order to outgoing frames
    pub extensions: Vec<Arc<dyn Extension>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            ping_timeout: Some(DEFAULT_PING_TIMEOUT),
            headers: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_size: Some(DEFAULT_MAX_PAYLOAD_SIZE),
            max_handshake_lines: DEFAULT_MAX_HANDSHAKE_LINES,
            max_handshake_line_len: DEFAULT_MAX_HANDSHAKE_LINE_LEN,
            subprotocols: Vec::new(),
            user_agent: Some(format!("asyncws/{}", env!("CARGO_PKG_VERSION"))),
            origin: None,
            extensions: Vec::new(),
        }
    }
}
