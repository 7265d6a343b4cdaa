//! Opening handshake
//!
//! The client sends an HTTP/1.1 upgrade request and reads the response head
//! line by line. Anything other than a well formed `101` response fails the
//! handshake.

use crate::{ConnectOptions, Result, WsError};
use asyncws_transport::{RemoteEndpoint, Transport, TransportError, TransportReader};
use base64::Engine;
use sha1::{Digest, Sha1};
use tracing::debug;

/// GUID appended to the client key when computing the accept key
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version sent in `Sec-WebSocket-Version`
pub const VERSION: &str = "13";

/// An ordered list of header name/value pairs.
///
/// Lookups are case-insensitive; insertion order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value of the named header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the named header lists `token` among its comma separated values
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Iterate over the headers in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<(String, String)>> for HeaderList {
    fn from(headers: Vec<(String, String)>) -> Self {
        Self(headers)
    }
}

/// Upgrade request sent to the server
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// Request target
    pub resource_path: String,
    /// Header set on the wire
    pub headers: HeaderList,
    /// `Sec-WebSocket-Key` in use, if any; enables accept key verification
    pub key: Option<String>,
}

impl HandshakeRequest {
    /// Build the request for `endpoint`.
    ///
    /// Caller-supplied headers in `options.headers` replace the generated
    /// set entirely.
    pub fn new(endpoint: &RemoteEndpoint, options: &ConnectOptions) -> Self {
        let headers = match &options.headers {
            Some(custom) => HeaderList::from(custom.clone()),
            None => default_headers(endpoint, options, &generate_key()),
        };
        let key = headers.get("Sec-WebSocket-Key").map(str::to_string);

        Self {
            resource_path: endpoint.resource_path.clone(),
            headers,
            key,
        }
    }

    /// Serialize the request head
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut request = format!("GET {} HTTP/1.1\r\n", self.resource_path);
        for (name, value) in self.headers.iter() {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        request.into_bytes()
    }
}

/// Parsed response head
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Response headers
    pub headers: HeaderList,
}

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// The response head
    pub response: HandshakeResponse,
    /// Subprotocol selected by the server
    pub subprotocol: Option<String>,
}

/// Generated header set, in wire order
fn default_headers(endpoint: &RemoteEndpoint, options: &ConnectOptions, key: &str) -> HeaderList {
    let mut headers = HeaderList::new();
    headers.push("Host", endpoint.host_header());
    headers.push("Upgrade", "websocket");
    headers.push("Connection", "Upgrade");
    headers.push("Sec-WebSocket-Key", key);
    headers.push("Sec-WebSocket-Version", VERSION);

    if !options.subprotocols.is_empty() {
        headers.push("Sec-WebSocket-Protocol", options.subprotocols.join(", "));
    }
    if let Some(user_agent) = &options.user_agent {
        headers.push("User-Agent", user_agent.as_str());
    }
    if let Some(origin) = &options.origin {
        headers.push("Origin", origin.as_str());
    }
    if let Some(credentials) = &endpoint.credentials {
        let token = format!("{}:{}", credentials.username, credentials.password);
        headers.push(
            "Authorization",
            format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(token)),
        );
    }

    headers
}

/// Fresh base64 encoded 16-byte key
pub fn generate_key() -> String {
    let key: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// `Sec-WebSocket-Accept` value the server must return for `key`
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Parse `HTTP/1.1 <code> <reason>`.
///
/// The version must be exactly `HTTP/1.1` and the code must lie in `[100, 1000)`.
pub fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if version != "HTTP/1.1" {
        return Err(WsError::handshake(
            None,
            format!("unsupported protocol version in {:?}", line),
        ));
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| WsError::handshake(None, format!("malformed status line {:?}", line)))?;

    let reason = parts.next().unwrap_or_default().trim().to_string();
    Ok((status, reason))
}

/// Parse `Name: value`
pub fn parse_header_line(line: &str) -> Result<(String, String)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| WsError::handshake(None, format!("malformed header line {:?}", line)))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(WsError::handshake(None, format!("malformed header line {:?}", line)));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Read the response head up to the empty line
pub async fn read_response(
    reader: &mut TransportReader,
    options: &ConnectOptions,
) -> Result<HandshakeResponse> {
    let mut lines = Vec::new();
    loop {
        if lines.len() >= options.max_handshake_lines {
            return Err(WsError::handshake(
                None,
                format!("response exceeds {} lines", options.max_handshake_lines),
            ));
        }

        match reader.read_line(options.max_handshake_line_len).await {
            Ok(Some(line)) if line.is_empty() => break,
            Ok(Some(line)) => lines.push(line),
            Ok(None) | Err(TransportError::Closed) => {
                return Err(WsError::handshake(None, "connection closed during handshake"));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut lines = lines.into_iter();
    let status_line = lines
        .next()
        .ok_or_else(|| WsError::handshake(None, "empty response"))?;
    let (status, reason) = parse_status_line(&status_line)?;

    let mut headers = HeaderList::new();
    for line in lines {
        let (name, value) = parse_header_line(&line)?;
        headers.push(name, value);
    }

    Ok(HandshakeResponse {
        status,
        reason,
        headers,
    })
}

/// Check a response against the request that produced it
pub fn validate(
    request: &HandshakeRequest,
    response: &HandshakeResponse,
    options: &ConnectOptions,
) -> Result<HandshakeOutcome> {
    if response.status != 101 {
        return Err(WsError::handshake(
            Some(response.status),
            format!("server returned {} {}", response.status, response.reason),
        ));
    }

    let upgrade = response.headers.get("Upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(WsError::handshake(
            Some(101),
            format!("unexpected Upgrade header {:?}", upgrade),
        ));
    }
    if !response.headers.has_token("Connection", "upgrade") {
        return Err(WsError::handshake(Some(101), "missing Connection: upgrade"));
    }

    if let Some(key) = &request.key {
        let expected = accept_key(key);
        match response.headers.get("Sec-WebSocket-Accept") {
            Some(accept) if accept == expected => {}
            other => {
                return Err(WsError::handshake(
                    Some(101),
                    format!("invalid Sec-WebSocket-Accept {:?}", other),
                ));
            }
        }
    }

    let subprotocol = match response.headers.get("Sec-WebSocket-Protocol") {
        Some(selected) if options.subprotocols.iter().any(|p| p == selected) => {
            Some(selected.to_string())
        }
        Some(selected) => {
            return Err(WsError::handshake(
                Some(101),
                format!("server selected unoffered subprotocol {:?}", selected),
            ));
        }
        None => None,
    };

    Ok(HandshakeOutcome {
        response: response.clone(),
        subprotocol,
    })
}

/// Run the opening handshake over an established transport
pub async fn perform(
    transport: &mut Transport,
    endpoint: &RemoteEndpoint,
    options: &ConnectOptions,
) -> Result<HandshakeOutcome> {
    let request = HandshakeRequest::new(endpoint, options);
    debug!("Sending upgrade request for {}", endpoint);

    transport.writer_mut().write(&request.to_bytes()).await?;
    let response = read_response(transport.reader_mut(), options).await?;
    debug!("Handshake response: {} {}", response.status, response.reason);

    validate(&request, &response, options)
}

#[cfg(test)]
mod tests;
