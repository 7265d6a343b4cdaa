//! Frame structure and opcodes
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |  Masking-key, if MASK set     |          Payload Data         |
//! +-------------------------------+-------------------------------+
//! ```

use bytes::Bytes;
use crate::ProtocolError;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcode (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation = 0x0,
    /// Text data frame
    Text = 0x1,
    /// Binary data frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl Opcode {
    /// Parse the low 4 bits of the first header byte
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(ProtocolError::violation(format!("unknown opcode 0x{:X}", other))),
        }
    }

    /// Wire value of this opcode
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Close, Ping and Pong
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Continuation, Text and Binary
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

/// Protocol frame structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Reserved bit 1
    pub rsv1: bool,
    /// Reserved bit 2
    pub rsv2: bool,
    /// Reserved bit 3
    pub rsv3: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Unmasked payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with all reserved bits cleared
    pub fn new(fin: bool, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a final text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Text, payload)
    }

    /// Create a final binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Binary, payload)
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Pong, payload)
    }

    /// Create a close frame from an already encoded close payload
    pub fn close(payload: impl Into<Bytes>) -> Self {
        Self::new(true, Opcode::Close, payload)
    }

    /// Get the payload size
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Check if any reserved bit is set
    pub fn has_reserved_bits(&self) -> bool {
        self.rsv1 || self.rsv2 || self.rsv3
    }

    /// Validate header invariants.
    ///
    /// Reserved bits must be clear unless an extension is active, and control
    /// frames must be final and carry at most 125 bytes.
    pub fn check(&self, allow_reserved_bits: bool) -> Result<(), ProtocolError> {
        if !allow_reserved_bits && self.has_reserved_bits() {
            return Err(ProtocolError::violation("reserved bits must be 0"));
        }

        if self.opcode.is_control() {
            if self.payload.len() > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::frame(format!(
                    "control frame too long: {} bytes",
                    self.payload.len()
                )));
            }
            if !self.fin {
                return Err(ProtocolError::frame("fragmented control frame"));
            }
        }

        Ok(())
    }

    /// First header byte: FIN, RSV1-3 and the opcode
    pub(crate) fn first_byte(&self) -> u8 {
        (if self.fin { 0b1000_0000 } else { 0 })
            | (if self.rsv1 { 0b0100_0000 } else { 0 })
            | (if self.rsv2 { 0b0010_0000 } else { 0 })
            | (if self.rsv3 { 0b0001_0000 } else { 0 })
            | self.opcode.as_u8()
    }
}
