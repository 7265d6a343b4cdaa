//! Unit tests for the connection state machine

use super::*;
use proptest::prelude::*;
use std::time::Duration;
use tokio::io::DuplexStream;

const ALL_STATES: [State; 4] = [State::Connecting, State::Open, State::Closing, State::Closed];

fn state_strategy() -> impl Strategy<Value = State> {
    prop::sample::select(ALL_STATES.to_vec())
}

/// Open a connection over an in-memory pipe, skipping the handshake
async fn open_raw(options: ConnectOptions) -> (Connection, DuplexStream) {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let transport = Transport::from_stream(client, Default::default());
    let endpoint = RemoteEndpoint::parse("ws://localhost/").unwrap();
    let conn = Connection::open(Uuid::new_v4(), endpoint, transport, None, options).await;
    (conn, server)
}

fn quiet_options() -> ConnectOptions {
    ConnectOptions {
        ping_interval: None,
        close_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

#[test]
fn test_state_order() {
    assert!(State::Connecting < State::Open);
    assert!(State::Open < State::Closing);
    assert!(State::Closing < State::Closed);
}

#[test]
fn test_state_display() {
    let names: Vec<String> = ALL_STATES.iter().map(|s| s.to_string()).collect();
    assert_eq!(names, vec!["CONNECTING", "OPEN", "CLOSING", "CLOSED"]);
}

#[test]
fn test_state_advance() {
    let mut state = State::Connecting;
    assert!(state.advance(State::Open));
    assert!(!state.advance(State::Open));
    assert!(state.advance(State::Closed));
    assert!(!state.advance(State::Closing));
    assert_eq!(state, State::Closed);
}

proptest! {
    #[test]
    fn test_state_never_moves_backwards(steps in prop::collection::vec(state_strategy(), 0..32)) {
        let mut state = State::Connecting;
        for next in steps {
            let before = state;
            let changed = state.advance(next);
            prop_assert!(state >= before);
            prop_assert_eq!(changed, next > before);
            prop_assert_eq!(state, std::cmp::max(before, next));
        }
    }
}

#[tokio::test]
async fn test_open_starts_in_open_state() {
    let (conn, _server) = open_raw(quiet_options()).await;
    assert_eq!(conn.state(), State::Open);
    assert!(conn.subprotocol().is_none());
    assert_eq!(conn.close_code().await, None);
    assert_eq!(conn.endpoint().host, "localhost");
}

#[tokio::test]
async fn test_begin_closing_has_one_winner() {
    let (conn, _server) = open_raw(quiet_options()).await;
    let shared = &conn.shared;

    assert!(shared.begin_closing());
    assert!(!shared.begin_closing());
    assert_eq!(shared.state(), State::Closing);

    // advancing never goes back
    assert!(!shared.advance(State::Open));
    assert_eq!(shared.state(), State::Closing);
}

#[tokio::test]
async fn test_first_close_record_wins() {
    let (conn, _server) = open_raw(quiet_options()).await;
    let shared = &conn.shared;

    shared.record_close(1001, "going away").await;
    shared.record_close(1000, "later").await;
    assert_eq!(conn.close_code().await, Some(1001));
    assert_eq!(conn.close_reason().await.as_deref(), Some("going away"));
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let (conn, _server) = open_raw(quiet_options()).await;
    let shared = conn.shared.clone();

    let waiter = conn.ping(None).await.unwrap();
    shared.finalize().await;
    shared.finalize().await;

    assert_eq!(conn.state(), State::Closed);
    assert_eq!(conn.close_code().await, Some(close::ABNORMAL));
    assert!(matches!(waiter.await, Err(WsError::ConnectionClosed { code: 1006, .. })));

    // nothing can be registered once finalized
    assert!(matches!(
        shared.ping(None).await,
        Err(WsError::ConnectionClosed { code: 1006, .. })
    ));
    assert!(shared.inner.lock().await.pings.is_empty());
}

#[tokio::test]
async fn test_finalize_keeps_recorded_code() {
    let (conn, _server) = open_raw(quiet_options()).await;

    conn.shared.record_close(1000, "done").await;
    conn.shared.finalize().await;
    assert_eq!(conn.close_code().await, Some(1000));
    assert!(matches!(
        conn.send("x").await,
        Err(WsError::ConnectionClosed { code: 1000, .. })
    ));
}

#[tokio::test]
async fn test_unsolicited_pong_is_ignored() {
    let (conn, _server) = open_raw(quiet_options()).await;
    let mut waiter = conn.ping(Some(Bytes::from_static(b"a"))).await.unwrap();

    conn.shared.resolve_pong(&Bytes::from_static(b"b")).await;
    assert!(timeout(Duration::from_millis(50), &mut waiter).await.is_err());

    conn.shared.resolve_pong(&Bytes::from_static(b"a")).await;
    assert!(waiter.await.is_ok());
    assert!(conn.shared.inner.lock().await.pings.is_empty());
}

#[tokio::test]
async fn test_fail_sends_close_frame() {
    let (conn, mut server) = open_raw(quiet_options()).await;

    conn.shared
        .fail(close::INTERNAL_ERROR, "boom", Some((close::INTERNAL_ERROR, "boom".to_string())))
        .await;
    assert_eq!(conn.state(), State::Closing);

    let frame = FrameCodec::server().read_frame(&mut server).await.unwrap().unwrap();
    assert_eq!(frame.opcode, Opcode::Close);
    assert_eq!(
        close::parse_close_payload(&frame.payload).unwrap(),
        (close::INTERNAL_ERROR, "boom".to_string())
    );

    // a second failure does not send another frame
    conn.shared.fail(close::PROTOCOL_ERROR, "again", None).await;
    conn.shared.finalize().await;
    assert_eq!(conn.close_code().await, Some(close::INTERNAL_ERROR));
    assert!(FrameCodec::server().read_frame(&mut server).await.unwrap().is_none());
}

#[tokio::test]
async fn test_last_clone_dropped_cancels_tasks() {
    let (conn, _server) = open_raw(quiet_options()).await;
    let shared = conn.shared.clone();
    let other = conn.clone();

    drop(conn);
    assert!(!shared.cancel.is_cancelled());

    drop(other);
    assert!(shared.cancel.is_cancelled());
    timeout(Duration::from_secs(5), shared.wait_closed()).await.unwrap();
}

#[tokio::test]
async fn test_abandoned_pings_are_pruned() {
    let (conn, _server) = open_raw(quiet_options()).await;

    for _ in 0..8 {
        drop(conn.ping(None).await.unwrap());
    }
    let kept = conn.ping(None).await.unwrap();

    let inner = conn.shared.inner.lock().await;
    assert_eq!(inner.pings.len(), 1);
    assert!(inner.pings.contains_key(kept.data()));
}
