//! Buffered read and write halves of a transport

use crate::TransportError;
use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};

/// Boxed read side of a byte stream
pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write side of a byte stream
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffered receive side of a transport.
///
/// Bytes buffered while reading handshake lines stay available to the frame
/// reader that takes over afterwards.
pub struct TransportReader {
    inner: BufReader<BoxedRead>,
}

impl TransportReader {
    /// Wrap any async reader
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            inner: BufReader::new(Box::new(reader)),
        }
    }

    /// Read exactly `n` bytes
    pub async fn read_exactly(&mut self, n: usize) -> Result<Bytes, TransportError> {
        let mut buf = vec![0u8; n];
        match self.inner.read_exact(&mut buf).await {
            Ok(_) => Ok(Bytes::from(buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    /// Read one line terminated by `\n`, without the `\r\n` / `\n` terminator.
    ///
    /// Returns `Ok(None)` on end of stream before any byte of the line.
    pub async fn read_line(&mut self, max_len: usize) -> Result<Option<String>, TransportError> {
        let mut buf = Vec::new();
        let limit = max_len as u64 + 2;
        let n = (&mut self.inner).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') {
            if buf.len() as u64 >= limit {
                return Err(TransportError::LineTooLong { max: max_len });
            }
            return Err(TransportError::Closed);
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if buf.len() > max_len {
            return Err(TransportError::LineTooLong { max: max_len });
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Discard everything until the peer closes its side, returning the byte count
    pub async fn drain(&mut self) -> Result<u64, TransportError> {
        let discarded = tokio::io::copy(&mut self.inner, &mut tokio::io::sink()).await?;
        Ok(discarded)
    }
}

impl AsyncRead for TransportReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Send side of a transport
pub struct TransportWriter {
    inner: BoxedWrite,
}

impl TransportWriter {
    /// Wrap any async writer
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Write all bytes and flush, so a buffer goes out as one unit
    pub async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write side, signalling end of stream to the peer
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
