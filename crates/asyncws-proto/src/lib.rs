//! # asyncws Protocol
//!
//! Wire format, frame codec, close codes and message types for the asyncws client.

#![warn(missing_docs)]

/// Frame structure and opcodes
pub mod frame;

/// Reassembled application messages
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Close status codes and close frame payloads
pub mod close;

/// Extension hook applied to every frame
pub mod extension;

/// Error types for protocol operations
pub mod error;

pub use frame::{Frame, Opcode};
pub use message::{Message, MessageKind};
pub use codec::{apply_mask, FrameCodec, Role};
pub use extension::Extension;
pub use error::ProtocolError;
