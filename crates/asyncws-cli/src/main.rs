//! asyncws command-line client
//!
//! Connects to an endpoint, prints every received message to stdout and sends
//! each line read from stdin as a text message. End of input closes the
//! connection with code 1000.
//!
//! ```text
//! asyncws-cli ws://127.0.0.1:9001/echo --ping-interval 10 --header "X-Token: abc"
//! ```

use anyhow::{bail, Context, Result};
use asyncws::{ClientBuilder, Connection, ConnectOptions, Message, WsError};
use clap::Parser;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Interactive client for WebSocket endpoints
#[derive(Debug, Parser)]
#[command(name = "asyncws-cli", version)]
struct Cli {
    /// Endpoint to connect to, e.g. ws://host:port/path
    #[arg(env = "ASYNCWS_URI")]
    uri: String,

    /// Connect and handshake timeout in seconds
    #[arg(long, default_value_t = 15, env = "ASYNCWS_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Close handshake timeout in seconds
    #[arg(long, default_value_t = 15, env = "ASYNCWS_CLOSE_TIMEOUT")]
    close_timeout: u64,

    /// Keepalive ping interval in seconds; 0 disables keepalive
    #[arg(long, default_value_t = 20, env = "ASYNCWS_PING_INTERVAL")]
    ping_interval: u64,

    /// Seconds to wait for a keepalive pong; 0 waits indefinitely
    #[arg(long, default_value_t = 20, env = "ASYNCWS_PING_TIMEOUT")]
    ping_timeout: u64,

    /// Replace the generated handshake headers, as "Name: value" (repeatable)
    #[arg(long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,

    /// Offer a subprotocol (repeatable)
    #[arg(long = "subprotocol")]
    subprotocols: Vec<String>,

    /// Origin header
    #[arg(long, env = "ASYNCWS_ORIGIN")]
    origin: Option<String>,

    /// Received message queue capacity
    #[arg(long, default_value_t = 32)]
    queue_capacity: usize,

    /// Largest accepted message in bytes; 0 for unbounded
    #[arg(long, default_value_t = 1024 * 1024)]
    max_message_size: usize,
}

impl Cli {
    fn options(&self) -> Result<ConnectOptions> {
        let headers = if self.headers.is_empty() {
            None
        } else {
            Some(
                self.headers
                    .iter()
                    .map(|h| parse_header(h))
                    .collect::<Result<Vec<_>>>()?,
            )
        };

        Ok(ConnectOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            close_timeout: Duration::from_secs(self.close_timeout),
            ping_interval: seconds(self.ping_interval),
            ping_timeout: seconds(self.ping_timeout),
            headers,
            queue_capacity: self.queue_capacity,
            max_message_size: (self.max_message_size > 0).then_some(self.max_message_size),
            subprotocols: self.subprotocols.clone(),
            origin: self.origin.clone(),
            ..Default::default()
        })
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// Split "Name: value" into its parts
fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header {:?} is missing ':'", raw);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header {:?} has an empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn print_message(message: &Message) {
    match message {
        Message::Text(text) => println!("< {}", text),
        Message::Binary(data) => println!("< [{} bytes] {:02x?}", data.len(), &data[..data.len().min(32)]),
    }
}

async fn print_incoming(conn: Connection) {
    loop {
        match conn.receive().await {
            Ok(message) => print_message(&message),
            Err(WsError::ConnectionClosed { code, reason }) => {
                info!("Connection closed by peer: {} {}", code, reason);
                return;
            }
            Err(e) => {
                error!("Receive failed: {}", e);
                return;
            }
        }
    }
}

/// Wait for the printing task; returns whether it ended on its own
async fn join_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            error!("Receive task failed: {}", e);
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let options = cli.options()?;
    debug!("Options: {:?}", options);

    let conn = ClientBuilder::new(&cli.uri)
        .with_options(options)
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", cli.uri))?;
    info!("Connected to {} as {}", conn.endpoint(), conn.id());
    if let Some(protocol) = conn.subprotocol() {
        info!("Subprotocol: {}", protocol);
    }

    let printer = tokio::spawn(print_incoming(conn.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if let Err(e) = conn.send(line).await {
            error!("Send failed: {}", e);
            break;
        }
    }

    if !conn.is_closed() {
        match conn.close(asyncws::close::NORMAL, "").await {
            Ok(()) | Err(WsError::AlreadyClosed) => {}
            Err(e) => error!("Close failed: {}", e),
        }
    }
    join_printer(printer).await;

    info!(
        "Connection finished with code {}",
        conn.close_code().await.unwrap_or(asyncws::close::ABNORMAL)
    );
    Ok(())
}
