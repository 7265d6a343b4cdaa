//! Read loop: the only code that decodes frames from the transport

use crate::connection::{Shared, State};
use crate::queue::MessageSender;
use crate::{Result, WsError};
use asyncws_proto::{close, Frame, FrameCodec, Message, MessageKind, Opcode};
use asyncws_transport::TransportReader;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of one read step
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A complete data message
    Message(Message),
    /// The stream ended, cleanly or after a close frame
    EndOfStream,
    /// Decoding failed; the connection must be aborted
    Error(WsError),
}

/// Joins data frames into messages
#[derive(Debug)]
pub(crate) struct Reassembler {
    kind: Option<MessageKind>,
    buffer: BytesMut,
    max_size: Option<usize>,
}

impl Reassembler {
    pub(crate) fn new(max_size: Option<usize>) -> Self {
        Self {
            kind: None,
            buffer: BytesMut::new(),
            max_size,
        }
    }

    /// Feed a Text, Binary or Continuation frame.
    ///
    /// Returns the message once its final fragment arrives.
    pub(crate) fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        let kind = match (frame.opcode, self.kind) {
            (Opcode::Continuation, Some(kind)) => kind,
            (Opcode::Continuation, None) => {
                return Err(WsError::Protocol(
                    "continuation frame without a message in progress".to_string(),
                ));
            }
            (Opcode::Text | Opcode::Binary, Some(_)) => {
                return Err(WsError::Protocol(
                    "new data frame while a fragmented message is in progress".to_string(),
                ));
            }
            (opcode, None) => MessageKind::from_opcode(opcode).ok_or_else(|| {
                WsError::Protocol(format!("{:?} frame is not a data frame", opcode))
            })?,
            (opcode, Some(_)) => {
                return Err(WsError::Protocol(format!("{:?} frame is not a data frame", opcode)));
            }
        };

        let size = self.buffer.len() + frame.payload.len();
        if let Some(max) = self.max_size {
            if size > max {
                return Err(WsError::PayloadTooLarge {
                    size: size as u64,
                    max,
                });
            }
        }

        if !frame.fin {
            self.buffer.extend_from_slice(&frame.payload);
            self.kind = Some(kind);
            return Ok(None);
        }

        let data = if self.buffer.is_empty() {
            frame.payload
        } else {
            self.buffer.extend_from_slice(&frame.payload);
            self.buffer.split().freeze()
        };
        self.kind = None;

        let message = match kind {
            MessageKind::Binary => Message::Binary(data),
            MessageKind::Text => {
                let text = String::from_utf8(data.to_vec())
                    .map_err(|_| WsError::Protocol("text message is not valid UTF-8".to_string()))?;
                Message::Text(text)
            }
        };
        Ok(Some(message))
    }
}

/// Owns the receive half for the lifetime of the connection
pub(crate) struct ReadLoop {
    shared: Arc<Shared>,
    reader: TransportReader,
    codec: FrameCodec,
    queue: MessageSender,
    reassembler: Reassembler,
    close_received: bool,
}

impl ReadLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        reader: TransportReader,
        codec: FrameCodec,
        queue: MessageSender,
    ) -> Self {
        let reassembler = Reassembler::new(shared.options.max_message_size);
        Self {
            shared,
            reader,
            codec,
            queue,
            reassembler,
            close_received: false,
        }
    }

    pub(crate) async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        debug!("Connection {} read loop started", self.shared.id);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.read_message() => outcome,
            };

            match outcome {
                ReadOutcome::Message(message) => {
                    // blocks while the queue is full
                    let pushed = tokio::select! {
                        _ = cancel.cancelled() => break,
                        pushed = self.queue.send(message) => pushed,
                    };
                    if pushed.is_err() {
                        break;
                    }
                }
                ReadOutcome::EndOfStream => break,
                ReadOutcome::Error(e) => {
                    warn!("Connection {} failed: {}", self.shared.id, e);
                    self.shared.fail(close::INTERNAL_ERROR, "unexpected error", None).await;
                    break;
                }
            }
        }

        let Self {
            shared,
            mut reader,
            queue,
            close_received,
            ..
        } = self;
        drop(queue);

        // after a close frame, give the peer a chance to drop the stream first
        if close_received && !cancel.is_cancelled() {
            let close_timeout = shared.options.close_timeout;
            tokio::select! {
                _ = cancel.cancelled() => {}
                drained = timeout(close_timeout, reader.drain()) => match drained {
                    Ok(Ok(bytes)) => debug!("Connection {} peer closed the stream ({} trailing bytes)", shared.id, bytes),
                    Ok(Err(e)) => debug!("Connection {} error while draining: {}", shared.id, e),
                    Err(_) => debug!("Connection {} peer kept the stream open after close", shared.id),
                },
            }
        }
        drop(reader);

        shared.finalize().await;
        debug!("Connection {} read loop stopped", shared.id);
    }

    /// Read frames until a message completes, handling control frames inline
    async fn read_message(&mut self) -> ReadOutcome {
        loop {
            let frame = match self.codec.read_frame(&mut self.reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Connection {} stream ended", self.shared.id);
                    return ReadOutcome::EndOfStream;
                }
                Err(e) => return ReadOutcome::Error(e.into()),
            };

            match frame.opcode {
                Opcode::Ping => {
                    if self.shared.state() == State::Open {
                        if let Err(e) = self.shared.write_frame(Frame::pong(frame.payload)).await {
                            return ReadOutcome::Error(e);
                        }
                    }
                }
                Opcode::Pong => self.shared.resolve_pong(&frame.payload).await,
                Opcode::Close => return self.handle_close(frame.payload).await,
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    match self.reassembler.push(frame) {
                        Ok(Some(message)) => return ReadOutcome::Message(message),
                        Ok(None) => {}
                        Err(e) => return ReadOutcome::Error(e),
                    }
                }
            }
        }
    }

    async fn handle_close(&mut self, payload: Bytes) -> ReadOutcome {
        let (code, reason) = match close::parse_close_payload(&payload) {
            Ok(parsed) => parsed,
            Err(e) => return ReadOutcome::Error(e.into()),
        };
        debug!(
            "Connection {} received close {} ({}) {:?}",
            self.shared.id,
            code,
            close::describe(code),
            reason
        );

        self.close_received = true;
        self.shared.record_close(code, reason).await;
        self.shared.peer_closed.send_replace(true);

        if self.shared.begin_closing() {
            if let Err(e) = self.shared.write_frame(Frame::close(payload)).await {
                debug!("Connection {} could not echo close frame: {}", self.shared.id, e);
            }
        }
        ReadOutcome::EndOfStream
    }
}
