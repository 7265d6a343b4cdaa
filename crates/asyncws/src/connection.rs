//! Connection state machine and public connection handle

use crate::queue::{self, MessageQueue};
use crate::reader::ReadLoop;
use crate::{keepalive, ConnectOptions, Result, WsError};
use asyncws_proto::{close, Frame, FrameCodec, Message, MessageKind, Opcode};
use asyncws_transport::{ConnectionInfo, RemoteEndpoint, Transport, TransportWriter};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection lifecycle. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Handshake in progress
    Connecting,
    /// Messages may be sent and received
    Open,
    /// A close frame was sent or received, or the connection is being aborted
    Closing,
    /// Terminal
    Closed,
}

impl State {
    /// Move to `next` if it comes later; returns whether the state changed
    pub(crate) fn advance(&mut self, next: State) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

type PingSender = oneshot::Sender<Result<()>>;

/// State guarded by a single lock: close outcome and the outstanding pings
#[derive(Default)]
struct Inner {
    close_code: Option<u16>,
    close_reason: String,
    pings: HashMap<Bytes, PingSender>,
    /// Set once the ping registry has been drained for good
    finalized: bool,
}

/// Send side. Holding this lock is what serializes frames on the wire.
struct FrameWriter {
    transport: Option<TransportWriter>,
    codec: FrameCodec,
    /// Kind of the outgoing fragmented message in progress
    fragment: Option<MessageKind>,
}

impl FrameWriter {
    async fn write(&mut self, frame: Frame, cancel: &CancellationToken) -> Result<()> {
        let encoded = self.codec.encode_frame(frame)?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| WsError::closed(close::ABNORMAL, ""))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(WsError::closed(close::ABNORMAL, "")),
            written = transport.write(&encoded) => written.map_err(WsError::from),
        }
    }
}

/// Everything the caller handle, the read loop and the keepalive task share
pub(crate) struct Shared {
    pub(crate) id: Uuid,
    endpoint: RemoteEndpoint,
    info: ConnectionInfo,
    subprotocol: Option<String>,
    pub(crate) options: ConnectOptions,
    state: watch::Sender<State>,
    /// Set by the read loop once the peer's close frame has arrived
    pub(crate) peer_closed: watch::Sender<bool>,
    inner: Mutex<Inner>,
    writer: Mutex<FrameWriter>,
    queue: MessageQueue,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) cancel: CancellationToken,
    finalizing: AtomicBool,
}

impl Shared {
    pub(crate) fn state(&self) -> State {
        *self.state.borrow()
    }

    pub(crate) fn advance(&self, next: State) -> bool {
        self.state.send_if_modified(|state| state.advance(next))
    }

    /// Open -> Closing. Only the caller that wins this transition sends a close frame.
    pub(crate) fn begin_closing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == State::Open {
                *state = State::Closing;
                true
            } else {
                false
            }
        })
    }

    async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == State::Closed).await;
    }

    async fn recorded_close(&self) -> Option<(u16, String)> {
        let inner = self.inner.lock().await;
        inner.close_code.map(|code| (code, inner.close_reason.clone()))
    }

    /// Record the close outcome unless one is already set
    pub(crate) async fn record_close(&self, code: u16, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        if inner.close_code.is_none() {
            inner.close_code = Some(code);
            inner.close_reason = reason.into();
        }
    }

    /// `ConnectionClosed` with the recorded outcome, waiting for it when not yet known
    async fn closed_error(&self) -> WsError {
        if let Some((code, reason)) = self.recorded_close().await {
            return WsError::closed(code, reason);
        }
        self.wait_closed().await;
        let (code, reason) = self
            .recorded_close()
            .await
            .unwrap_or((close::ABNORMAL, String::new()));
        WsError::closed(code, reason)
    }

    async fn ensure_open(&self) -> Result<()> {
        match self.state() {
            State::Open => Ok(()),
            State::Connecting => Err(WsError::Protocol("connection is not open yet".to_string())),
            State::Closing | State::Closed => Err(self.closed_error().await),
        }
    }

    /// Prefer the close outcome over the raw error once the connection is going down
    async fn write_failed(&self, err: WsError) -> WsError {
        if self.state() >= State::Closing {
            self.closed_error().await
        } else {
            err
        }
    }

    /// Write one frame under the connection-wide write lock
    pub(crate) async fn write_frame(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write(frame, &self.cancel).await
    }

    async fn send_data(&self, message: Message, fin: bool) -> Result<()> {
        let kind = message.kind();
        let mut writer = self.writer.lock().await;

        let opcode = match writer.fragment {
            Some(current) if current != kind => {
                return Err(WsError::Protocol(format!(
                    "cannot send {:?} data while a fragmented {:?} message is in progress",
                    kind, current
                )));
            }
            Some(_) => Opcode::Continuation,
            None => kind.opcode(),
        };

        writer
            .write(Frame::new(fin, opcode, message.into_payload()), &self.cancel)
            .await?;
        writer.fragment = if fin { None } else { Some(kind) };
        Ok(())
    }

    /// Send a ping and register its waiter.
    ///
    /// The waiter is registered before the frame is written so a fast pong is
    /// never missed.
    pub(crate) async fn ping(&self, data: Option<Bytes>) -> Result<PongWaiter> {
        let (tx, rx) = oneshot::channel();
        let data = {
            let mut inner = self.inner.lock().await;
            if inner.finalized {
                drop(inner);
                return Err(self.closed_error().await);
            }

            // waiters dropped by their callers no longer hold on to their data
            inner.pings.retain(|_, waiter| !waiter.is_closed());

            let data = match data {
                Some(data) if inner.pings.contains_key(&data) => {
                    return Err(WsError::DuplicatePingData);
                }
                Some(data) => data,
                None => loop {
                    let nonce = Bytes::copy_from_slice(&rand::random::<[u8; 4]>());
                    if !inner.pings.contains_key(&nonce) {
                        break nonce;
                    }
                },
            };
            inner.pings.insert(data.clone(), tx);
            data
        };

        debug!("Connection {} sending ping {:?}", self.id, data);
        if let Err(e) = self.write_frame(Frame::ping(data.clone())).await {
            self.inner.lock().await.pings.remove(&data);
            return Err(self.write_failed(e).await);
        }

        Ok(PongWaiter { data, rx })
    }

    /// Resolve the waiter registered for `payload`; unsolicited pongs are ignored
    pub(crate) async fn resolve_pong(&self, payload: &Bytes) {
        let waiter = self.inner.lock().await.pings.remove(payload);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(Ok(()));
            }
            None => debug!("Connection {} ignoring unsolicited pong", self.id),
        }
    }

    /// Abort path: best-effort close frame with `code` if still open, then Closing.
    ///
    /// `record` sets the close outcome first; otherwise `finalize` records 1006.
    pub(crate) async fn fail(&self, code: u16, reason: &str, record: Option<(u16, String)>) {
        if let Some((recorded_code, recorded_reason)) = record {
            self.record_close(recorded_code, recorded_reason).await;
        }

        if self.begin_closing() {
            match close::encode_close_payload(code, reason) {
                Ok(payload) => {
                    match timeout(self.options.close_timeout, self.write_frame(Frame::close(payload))).await {
                        Ok(Ok(())) => debug!("Connection {} sent close {}", self.id, code),
                        Ok(Err(e)) => debug!("Connection {} could not send close frame: {}", self.id, e),
                        Err(_) => debug!("Connection {} timed out sending close frame", self.id),
                    }
                }
                Err(e) => warn!("Connection {} cannot encode close frame: {}", self.id, e),
            }
        }
    }

    /// Tear the connection down. Idempotent.
    ///
    /// Stops the background tasks, shuts the transport down, records 1006 if
    /// no close outcome is known, fails every outstanding ping and enters Closed.
    pub(crate) async fn finalize(&self) {
        if self.finalizing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let transport = self.writer.lock().await.transport.take();
        if let Some(mut transport) = transport {
            match timeout(self.options.close_timeout, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Connection {} transport shutdown failed: {}", self.id, e),
                Err(_) => warn!("Connection {} transport shutdown timed out, dropping it", self.id),
            }
        }

        let (code, reason, pings) = {
            let mut inner = self.inner.lock().await;
            let code = *inner.close_code.get_or_insert(close::ABNORMAL);
            inner.finalized = true;
            (code, inner.close_reason.clone(), std::mem::take(&mut inner.pings))
        };
        if !pings.is_empty() {
            debug!("Connection {} failing {} outstanding pings", self.id, pings.len());
        }
        for (_, waiter) in pings {
            let _ = waiter.send(Err(WsError::closed(code, reason.clone())));
        }

        self.advance(State::Closed);
        info!(
            "Connection {} closed with code {} ({})",
            self.id,
            code,
            close::describe(code)
        );
    }
}

/// Resolves when the pong matching a ping arrives.
///
/// Fails with `ConnectionClosed` if the connection goes down first.
#[must_use = "a PongWaiter does nothing unless awaited"]
pub struct PongWaiter {
    data: Bytes,
    rx: oneshot::Receiver<Result<()>>,
}

impl PongWaiter {
    /// Payload of the ping this waiter belongs to
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl fmt::Debug for PongWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PongWaiter").field("data", &self.data).finish()
    }
}

impl Future for PongWaiter {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(WsError::closed(close::ABNORMAL, ""))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// An open client connection.
///
/// Cloning is cheap and every clone drives the same connection. When the
/// last clone is dropped the background tasks stop and the transport is
/// closed without a close handshake.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl Connection {
    /// Take over a transport on which the handshake has completed.
    ///
    /// Starts the read loop and, if configured, the keepalive task.
    pub(crate) async fn open(
        id: Uuid,
        endpoint: RemoteEndpoint,
        transport: Transport,
        subprotocol: Option<String>,
        options: ConnectOptions,
    ) -> Self {
        let (reader, writer, info) = transport.into_parts();
        let codec = FrameCodec::client()
            .with_max_payload_size(options.max_message_size)
            .with_extensions(options.extensions.clone());
        let (queue_tx, queue) = queue::bounded(options.queue_capacity);
        let (state, _) = watch::channel(State::Connecting);
        let (peer_closed, _) = watch::channel(false);
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            id,
            endpoint,
            info,
            subprotocol,
            options,
            state,
            peer_closed,
            inner: Mutex::new(Inner::default()),
            writer: Mutex::new(FrameWriter {
                transport: Some(writer),
                codec: codec.clone(),
                fragment: None,
            }),
            queue,
            reader_task: Mutex::new(None),
            cancel: cancel.clone(),
            finalizing: AtomicBool::new(false),
        });

        shared.advance(State::Open);

        let read_loop = ReadLoop::new(shared.clone(), reader, codec, queue_tx);
        *shared.reader_task.lock().await = Some(tokio::spawn(read_loop.run()));

        if let Some(interval) = shared.options.ping_interval {
            tokio::spawn(keepalive::run(shared.clone(), interval, shared.options.ping_timeout));
        }

        info!("Connection {} open to {}", shared.id, shared.endpoint);
        Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        }
    }

    /// Unique connection ID, used in log lines
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Current state
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<State> {
        self.shared.state.subscribe()
    }

    /// Whether messages can currently be sent
    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    /// Whether the connection has reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// The endpoint this connection was opened to
    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.shared.endpoint
    }

    /// Transport addressing details
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.shared.info
    }

    /// Subprotocol selected during the handshake
    pub fn subprotocol(&self) -> Option<&str> {
        self.shared.subprotocol.as_deref()
    }

    /// Number of received messages waiting to be taken by `receive`
    pub fn queued_messages(&self) -> usize {
        self.shared.queue.len()
    }

    /// Recorded close code, once known
    pub async fn close_code(&self) -> Option<u16> {
        self.shared.recorded_close().await.map(|(code, _)| code)
    }

    /// Recorded close reason, once known
    pub async fn close_reason(&self) -> Option<String> {
        self.shared.recorded_close().await.map(|(_, reason)| reason)
    }

    /// Wait until the connection is closed
    pub async fn wait_closed(&self) {
        self.shared.wait_closed().await
    }

    /// Send a complete message
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.send_with_fin(message, true).await
    }

    /// Send one fragment of a message.
    ///
    /// With `fin == false` the message stays open and following calls are
    /// sent as continuation frames until one passes `fin == true`. The kind
    /// of the first fragment must be kept for the whole message.
    pub async fn send_with_fin(&self, message: impl Into<Message>, fin: bool) -> Result<()> {
        self.shared.ensure_open().await?;
        match self.shared.send_data(message.into(), fin).await {
            Ok(()) => Ok(()),
            Err(e @ WsError::Protocol(_)) => Err(e),
            Err(e) => Err(self.shared.write_failed(e).await),
        }
    }

    /// Receive the next message.
    ///
    /// Messages already queued are still delivered after the peer closed;
    /// after that every call fails with `ConnectionClosed`.
    pub async fn receive(&self) -> Result<Message> {
        match self.shared.queue.recv().await {
            Some(message) => Ok(message),
            None => {
                self.shared.wait_closed().await;
                Err(self.shared.closed_error().await)
            }
        }
    }

    /// Send a ping. `None` picks a fresh 4-byte nonce.
    ///
    /// Fails with `DuplicatePingData` when `data` matches a ping that is still
    /// waiting for its pong.
    pub async fn ping(&self, data: Option<Bytes>) -> Result<PongWaiter> {
        self.shared.ensure_open().await?;
        self.shared.ping(data).await
    }

    /// Send an unsolicited pong
    pub async fn pong(&self, data: Option<Bytes>) -> Result<()> {
        self.shared.ensure_open().await?;
        let frame = Frame::pong(data.unwrap_or_default());
        match self.shared.write_frame(frame).await {
            Ok(()) => Ok(()),
            Err(e @ WsError::Frame(_)) => Err(e),
            Err(e) => Err(self.shared.write_failed(e).await),
        }
    }

    /// Start the close handshake and wait for the connection to close.
    ///
    /// Each wait is bounded by the close timeout, after which the transport
    /// is aborted.
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let shared = &self.shared;
        if shared.state() == State::Closed {
            return Err(WsError::AlreadyClosed);
        }
        let payload = close::encode_close_payload(code, reason)?;

        if !shared.begin_closing() {
            if shared.state() == State::Closed {
                return Err(WsError::AlreadyClosed);
            }
            warn!("Connection {} is already closing", shared.id);
            return Ok(());
        }

        info!("Closing connection {} with code {} ({})", shared.id, code, close::describe(code));
        let close_timeout = shared.options.close_timeout;
        match timeout(close_timeout, shared.write_frame(Frame::close(payload))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Connection {} failed to send close frame: {}", shared.id, e),
            Err(_) => warn!("Connection {} timed out sending close frame", shared.id),
        }

        // first the peer's close frame, then the end of the stream
        let reader = shared.reader_task.lock().await.take();
        if let Some(mut reader) = reader {
            let mut peer_closed = shared.peer_closed.subscribe();
            let handshake = async {
                tokio::select! {
                    _ = peer_closed.wait_for(|closed| *closed) => false,
                    _ = &mut reader => true,
                }
            };

            let outcome = timeout(close_timeout, handshake).await;
            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    if timeout(close_timeout, &mut reader).await.is_err() {
                        debug!(
                            "Connection {} peer kept the stream open after the close handshake",
                            shared.id
                        );
                    }
                }
                Err(_) => warn!(
                    "Connection {} close handshake timed out after {:?}, aborting transport",
                    shared.id, close_timeout
                ),
            }
        }

        shared.finalize().await;
        shared.wait_closed().await;
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests;
