//! Unit tests for the opening handshake

use super::*;
use asyncws_transport::ConnectionInfo;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

fn endpoint(uri: &str) -> RemoteEndpoint {
    RemoteEndpoint::parse(uri).unwrap()
}

/// Read the request head and return its header lines
async fn read_request(server: &mut BufReader<DuplexStream>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        let line = line.trim_end().to_string();
        if line.is_empty() {
            return lines;
        }
        lines.push(line);
    }
}

fn request_key(lines: &[String]) -> String {
    lines
        .iter()
        .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
        .unwrap()
        .to_string()
}

async fn run_handshake(
    options: ConnectOptions,
    respond: impl FnOnce(Vec<String>) -> String + Send + 'static,
) -> Result<HandshakeOutcome> {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let server_task = tokio::spawn(async move {
        let mut server = BufReader::new(server);
        let lines = read_request(&mut server).await;
        let response = respond(lines);
        server.get_mut().write_all(response.as_bytes()).await.unwrap();
        server
    });

    let mut transport = Transport::from_stream(client, ConnectionInfo::default());
    let result = perform(&mut transport, &endpoint("ws://example.com/chat"), &options).await;
    let _server = server_task.await.unwrap();
    result
}

fn switching_protocols(key: &str, extra: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n{}\r\n",
        accept_key(key),
        extra
    )
}

#[test]
fn test_accept_key() {
    // RFC 6455 section 1.3
    assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
}

#[test]
fn test_generated_key() {
    let key = generate_key();
    let decoded = base64::engine::general_purpose::STANDARD.decode(&key).unwrap();
    assert_eq!(decoded.len(), 16);
    assert_ne!(key, generate_key());
}

#[test]
fn test_default_request() {
    let options = ConnectOptions {
        subprotocols: vec!["chat".to_string(), "superchat".to_string()],
        origin: Some("http://example.com".to_string()),
        ..Default::default()
    };
    let request = HandshakeRequest::new(&endpoint("ws://example.com:8080/chat?x=1"), &options);

    let names: Vec<&str> = request.headers.iter().map(|(n, _)| n).collect();
    assert_eq!(
        names,
        vec![
            "Host",
            "Upgrade",
            "Connection",
            "Sec-WebSocket-Key",
            "Sec-WebSocket-Version",
            "Sec-WebSocket-Protocol",
            "User-Agent",
            "Origin",
        ]
    );
    assert_eq!(request.headers.get("host"), Some("example.com:8080"));
    assert_eq!(request.headers.get("Sec-WebSocket-Version"), Some("13"));
    assert_eq!(request.headers.get("Sec-WebSocket-Protocol"), Some("chat, superchat"));
    assert!(request.key.is_some());

    let text = String::from_utf8(request.to_bytes()).unwrap();
    assert!(text.starts_with("GET /chat?x=1 HTTP/1.1\r\nHost: example.com:8080\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn test_credentials_header() {
    let options = ConnectOptions::default();
    let request = HandshakeRequest::new(&endpoint("ws://Aladdin:open%20sesame@example.com/"), &options);
    // base64("Aladdin:open%20sesame")
    assert_eq!(
        request.headers.get("Authorization"),
        Some("Basic QWxhZGRpbjpvcGVuJTIwc2VzYW1l")
    );
}

#[test]
fn test_custom_headers_replace_defaults() {
    let options = ConnectOptions {
        headers: Some(vec![
            ("Host".to_string(), "override.example".to_string()),
            ("X-Token".to_string(), "abc".to_string()),
        ]),
        ..Default::default()
    };
    let request = HandshakeRequest::new(&endpoint("ws://example.com/"), &options);

    assert_eq!(request.headers.len(), 2);
    assert_eq!(request.headers.get("Host"), Some("override.example"));
    assert_eq!(request.headers.get("Upgrade"), None);
    assert!(request.key.is_none());
}

#[test]
fn test_parse_status_line() {
    assert_eq!(
        parse_status_line("HTTP/1.1 101 Switching Protocols").unwrap(),
        (101, "Switching Protocols".to_string())
    );
    assert_eq!(parse_status_line("HTTP/1.1 404 Not Found").unwrap().0, 404);
    assert_eq!(parse_status_line("HTTP/1.1 200").unwrap(), (200, String::new()));

    for line in ["HTTP/1.0 101 Switching", "HTTP/1.1 99 Low", "HTTP/1.1 1000 High", "HTTP/1.1 abc", "garbage"] {
        assert!(
            matches!(parse_status_line(line), Err(WsError::HandshakeFailed { status: None, .. })),
            "{}",
            line
        );
    }
}

#[test]
fn test_parse_header_line() {
    assert_eq!(
        parse_header_line("Upgrade:  websocket ").unwrap(),
        ("Upgrade".to_string(), "websocket".to_string())
    );
    assert!(parse_header_line("no colon here").is_err());
    assert!(parse_header_line(": value").is_err());
}

#[test]
fn test_header_tokens() {
    let mut headers = HeaderList::new();
    headers.push("Connection", "keep-alive, Upgrade");
    assert!(headers.has_token("connection", "upgrade"));
    assert!(!headers.has_token("connection", "close"));
}

#[tokio::test]
async fn test_perform_success() {
    let options = ConnectOptions {
        subprotocols: vec!["chat".to_string()],
        ..Default::default()
    };
    let outcome = run_handshake(options, |lines| {
        assert_eq!(lines[0], "GET /chat HTTP/1.1");
        switching_protocols(&request_key(&lines), "Sec-WebSocket-Protocol: chat\r\n")
    })
    .await
    .unwrap();

    assert_eq!(outcome.response.status, 101);
    assert_eq!(outcome.subprotocol.as_deref(), Some("chat"));
}

#[tokio::test]
async fn test_perform_rejects_non_101() {
    let result = run_handshake(ConnectOptions::default(), |_| {
        "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n".to_string()
    })
    .await;

    assert!(matches!(result, Err(WsError::HandshakeFailed { status: Some(403), .. })));
}

#[tokio::test]
async fn test_perform_rejects_bad_accept() {
    let result = run_handshake(ConnectOptions::default(), |_| {
        switching_protocols("not-the-key", "")
    })
    .await;

    assert!(matches!(result, Err(WsError::HandshakeFailed { status: Some(101), .. })));
}

#[tokio::test]
async fn test_perform_rejects_unoffered_subprotocol() {
    let result = run_handshake(ConnectOptions::default(), |lines| {
        switching_protocols(&request_key(&lines), "Sec-WebSocket-Protocol: chat\r\n")
    })
    .await;

    assert!(matches!(result, Err(WsError::HandshakeFailed { status: Some(101), .. })));
}

#[tokio::test]
async fn test_perform_line_limit() {
    let options = ConnectOptions {
        max_handshake_lines: 4,
        ..Default::default()
    };
    let result = run_handshake(options, |lines| {
        let mut response = "HTTP/1.1 101 Switching Protocols\r\n".to_string();
        for i in 0..10 {
            response.push_str(&format!("X-Filler-{}: {}\r\n", i, request_key(&lines)));
        }
        response.push_str("\r\n");
        response
    })
    .await;

    assert!(matches!(result, Err(WsError::HandshakeFailed { status: None, .. })));
}

#[tokio::test]
async fn test_perform_custom_headers_skip_accept_check() {
    let options = ConnectOptions {
        headers: Some(vec![
            ("Host".to_string(), "example.com".to_string()),
            ("Upgrade".to_string(), "websocket".to_string()),
            ("Connection".to_string(), "Upgrade".to_string()),
            ("Sec-WebSocket-Version".to_string(), "13".to_string()),
        ]),
        ..Default::default()
    };
    let outcome = run_handshake(options, |lines| {
        assert_eq!(lines.len(), 5);
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n".to_string()
    })
    .await
    .unwrap();

    assert!(outcome.subprotocol.is_none());
}

#[tokio::test]
async fn test_perform_connection_closed() {
    let (client, server) = tokio::io::duplex(1024);
    drop(server);

    let mut transport = Transport::from_stream(client, ConnectionInfo::default());
    let result = perform(&mut transport, &endpoint("ws://example.com/"), &ConnectOptions::default()).await;
    assert!(result.is_err());
}
