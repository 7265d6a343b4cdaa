//! Frame codec for async streams

use crate::{Extension, Frame, Opcode, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum payload size (1MB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Which end of the connection the codec serves.
///
/// Clients mask every frame they write and expect unmasked frames from the
/// server; servers do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client side
    Client,
    /// Server side
    Server,
}

impl Role {
    fn masks_outgoing(self) -> bool {
        self == Role::Client
    }

    fn expects_masked(self) -> bool {
        self == Role::Server
    }
}

/// Frame codec for encoding/decoding frames over async streams
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Masking direction
    role: Role,
    /// Maximum payload size allowed, `None` for unbounded
    max_payload_size: Option<usize>,
    /// Installed extensions
    extensions: Vec<Arc<dyn Extension>>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::client()
    }
}

impl FrameCodec {
    /// Create a new frame codec for the given role
    pub fn new(role: Role) -> Self {
        Self {
            role,
            max_payload_size: Some(DEFAULT_MAX_PAYLOAD_SIZE),
            extensions: Vec::new(),
        }
    }

    /// Client codec: masks outgoing frames, rejects masked incoming frames
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Server codec: used to play the remote end in tests and tooling
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Set the maximum payload size
    pub fn with_max_payload_size(mut self, max_payload_size: Option<usize>) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Install extensions
    pub fn with_extensions(mut self, extensions: Vec<Arc<dyn Extension>>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Get the codec role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the maximum payload size
    pub fn max_payload_size(&self) -> Option<usize> {
        self.max_payload_size
    }

    fn allow_reserved_bits(&self) -> bool {
        !self.extensions.is_empty()
    }

    /// Encode a frame, masking it with a fresh key when acting as a client
    pub fn encode_frame(&self, frame: Frame) -> Result<Bytes, ProtocolError> {
        let mask = if self.role.masks_outgoing() {
            Some(generate_mask_key())
        } else {
            None
        };
        self.encode_frame_with_mask(frame, mask)
    }

    /// Encode a frame with an explicit masking key
    pub fn encode_frame_with_mask(
        &self,
        frame: Frame,
        mask: Option<[u8; 4]>,
    ) -> Result<Bytes, ProtocolError> {
        let mut frame = frame;
        for extension in &self.extensions {
            frame = extension.encode(frame)?;
        }
        frame.check(self.allow_reserved_bits())?;

        let len = frame.payload.len();
        let mut buf = BytesMut::with_capacity(14 + len);
        buf.put_u8(frame.first_byte());

        let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };
        if len < 126 {
            buf.put_u8(mask_bit | len as u8);
        } else if len < 65536 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(len as u64);
        }

        match mask {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(&frame.payload);
                apply_mask(&mut buf[start..], key);
            }
            None => buf.put_slice(&frame.payload),
        }

        Ok(buf.freeze())
    }

    /// Write a frame to an async writer in a single write
    pub async fn write_frame<W>(&self, writer: &mut W, frame: Frame) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(frame)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a frame from an async reader.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Frame>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 2];
        if reader.read(&mut header[..1]).await? == 0 {
            return Ok(None);
        }
        read_exact(reader, &mut header[1..]).await?;

        let fin = header[0] & 0b1000_0000 != 0;
        let rsv1 = header[0] & 0b0100_0000 != 0;
        let rsv2 = header[0] & 0b0010_0000 != 0;
        let rsv3 = header[0] & 0b0001_0000 != 0;
        let opcode_bits = header[0] & 0b0000_1111;

        let masked = header[1] & 0b1000_0000 != 0;
        if masked != self.role.expects_masked() {
            return Err(ProtocolError::violation("incorrect masking"));
        }

        let length = match header[1] & 0b0111_1111 {
            126 => {
                let mut ext = [0u8; 2];
                read_exact(reader, &mut ext).await?;
                let length = u16::from_be_bytes(ext) as u64;
                if length < 126 {
                    return Err(ProtocolError::violation("non-minimal 16-bit length"));
                }
                length
            }
            127 => {
                let mut ext = [0u8; 8];
                read_exact(reader, &mut ext).await?;
                let length = u64::from_be_bytes(ext);
                if length >> 63 != 0 {
                    return Err(ProtocolError::violation("64-bit length has the high bit set"));
                }
                if length < 65536 {
                    return Err(ProtocolError::violation("non-minimal 64-bit length"));
                }
                length
            }
            short => short as u64,
        };

        if let Some(max) = self.max_payload_size {
            if length > max as u64 {
                return Err(ProtocolError::PayloadTooLarge { size: length, max });
            }
        }
        let length = usize::try_from(length).map_err(|_| ProtocolError::PayloadTooLarge {
            size: length,
            max: usize::MAX,
        })?;

        let mask_key = if masked {
            let mut key = [0u8; 4];
            read_exact(reader, &mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; length];
        read_exact(reader, &mut payload).await?;
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        let mut frame = Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode: Opcode::from_u8(opcode_bits)?,
            payload: Bytes::from(payload),
        };
        for extension in self.extensions.iter().rev() {
            frame = extension.decode(frame)?;
        }
        frame.check(self.allow_reserved_bits())?;

        Ok(Some(frame))
    }
}

/// XOR `payload` in place with the 4-byte masking key, cycling through the key.
///
/// Masking is an involution: applying the same key twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

fn generate_mask_key() -> [u8; 4] {
    rand::random()
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::UnexpectedEof),
        Err(e) => Err(ProtocolError::Io(e)),
    }
}
