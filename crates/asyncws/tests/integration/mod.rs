//! In-process peer speaking the server side of the protocol
//!
//! The client side runs the real `Connection`; the server side is driven
//! step by step from the test body.

use asyncws::handshake::accept_key;
use asyncws::proto::{close, Frame, FrameCodec, Opcode};
use asyncws::{connect_with_transport, ConnectOptions, Connection, Transport};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};

/// Upper bound for any single wait in a test
pub const STEP: Duration = Duration::from_secs(5);

/// Options with keepalive off and short timeouts
pub fn test_options() -> ConnectOptions {
    ConnectOptions {
        ping_interval: None,
        close_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Server end of a connection
pub struct MockServer<S = DuplexStream> {
    stream: BufReader<S>,
    codec: FrameCodec,
}

impl<S> MockServer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the upgrade request and answer it with `101`
    pub async fn accept(stream: S, extra_headers: &str) -> Self {
        let mut stream = BufReader::new(stream);
        let mut key = None;
        loop {
            let mut line = String::new();
            stream.read_line(&mut line).await.expect("request line");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Sec-WebSocket-Key: ") {
                key = Some(value.to_string());
            }
        }

        let key = key.expect("Sec-WebSocket-Key header");
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n{}\r\n",
            accept_key(&key),
            extra_headers
        );
        stream.get_mut().write_all(response.as_bytes()).await.expect("write response");

        Self {
            stream,
            codec: FrameCodec::server().with_max_payload_size(None),
        }
    }

    /// Next frame from the client; `None` once the client closed the stream
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(STEP, self.codec.read_frame(&mut self.stream))
            .await
            .expect("timed out waiting for a client frame")
            .expect("client sent a malformed frame")
    }

    /// Next frame that is not a ping
    pub async fn recv_data_frame(&mut self) -> Option<Frame> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.opcode != Opcode::Ping {
                return Some(frame);
            }
        }
    }

    /// Send a frame to the client
    pub async fn send_frame(&mut self, frame: Frame) {
        let encoded = self.codec.encode_frame(frame).expect("encodable frame");
        self.send_raw(&encoded).await;
    }

    /// Send raw bytes to the client
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.get_mut().write_all(bytes).await.expect("write to client");
    }

    /// Send a close frame
    pub async fn send_close(&mut self, code: u16, reason: &str) {
        let payload = close::encode_close_payload(code, reason).expect("valid close payload");
        self.send_frame(Frame::close(payload)).await;
    }

    /// Read frames until the client's close frame arrives and return its payload
    pub async fn expect_close(&mut self) -> Bytes {
        loop {
            let frame = self.recv_frame().await.expect("close frame before end of stream");
            if frame.opcode == Opcode::Close {
                return frame.payload;
            }
        }
    }
}

/// A connected client and its mock server over an in-memory pipe
pub async fn pair(options: ConnectOptions) -> (Connection, MockServer) {
    pair_with_headers(options, "").await
}

/// Like [`pair`], adding `extra_headers` to the handshake response
pub async fn pair_with_headers(
    options: ConnectOptions,
    extra_headers: &str,
) -> (Connection, MockServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let transport = Transport::from_stream(client, Default::default());

    let (conn, server) = tokio::join!(
        connect_with_transport("ws://localhost/test", transport, options),
        MockServer::accept(server, extra_headers),
    );
    (conn.expect("handshake succeeds"), server)
}
