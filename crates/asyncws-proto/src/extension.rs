//! Extension hook applied to every frame

use std::fmt;
use crate::{Frame, ProtocolError};

/// A frame transformation installed on a connection.
///
/// Extensions are applied in configuration order on the way out and in
/// reverse order on the way in. While any extension is installed the codec
/// accepts nonzero reserved bits. No negotiation is performed: the caller is
/// responsible for agreeing on the extension with the peer.
pub trait Extension: Send + Sync + fmt::Debug {
    /// Extension name, for logging
    fn name(&self) -> &str;

    /// Transform an outgoing frame before it is written
    fn encode(&self, frame: Frame) -> Result<Frame, ProtocolError>;

    /// Transform an incoming frame after it is read
    fn decode(&self, frame: Frame) -> Result<Frame, ProtocolError>;
}
