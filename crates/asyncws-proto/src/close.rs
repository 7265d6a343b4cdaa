//! Close status codes and close frame payloads

use bytes::{BufMut, Bytes, BytesMut};
use crate::frame::MAX_CONTROL_PAYLOAD;
use crate::ProtocolError;

/// Normal closure
pub const NORMAL: u16 = 1000;
/// Endpoint going away
pub const GOING_AWAY: u16 = 1001;
/// Protocol error
pub const PROTOCOL_ERROR: u16 = 1002;
/// Unsupported data
pub const UNSUPPORTED_DATA: u16 = 1003;
/// Close frame carried no status code (never sent on the wire)
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame (never sent on the wire)
pub const ABNORMAL: u16 = 1006;
/// Invalid frame payload data
pub const INVALID_PAYLOAD: u16 = 1007;
/// Policy violation
pub const POLICY_VIOLATION: u16 = 1008;
/// Message too big
pub const MESSAGE_TOO_BIG: u16 = 1009;
/// Mandatory extension missing
pub const MANDATORY_EXTENSION: u16 = 1010;
/// Internal error
pub const INTERNAL_ERROR: u16 = 1011;

/// Whether `code` may be placed in a close frame.
///
/// Allowed: the registered codes 1000-1003 and 1007-1011, plus the
/// library/application range 3000-4999.
pub fn is_sendable(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// Human readable explanation of a close code
pub fn describe(code: u16) -> &'static str {
    match code {
        NORMAL => "normal closure",
        GOING_AWAY => "endpoint going away",
        PROTOCOL_ERROR => "protocol error",
        UNSUPPORTED_DATA => "unsupported data",
        NO_STATUS => "no status code",
        ABNORMAL => "connection closed abnormally",
        INVALID_PAYLOAD => "invalid frame payload data",
        POLICY_VIOLATION => "policy violation",
        MESSAGE_TOO_BIG => "message too big",
        MANDATORY_EXTENSION => "mandatory extension",
        INTERNAL_ERROR => "internal error",
        3000..=3999 => "registered",
        4000..=4999 => "private use",
        _ => "unknown",
    }
}

/// Parse a close frame payload into `(code, reason)`.
///
/// An empty payload means no status was given and yields 1005 with an empty
/// reason. A one-byte payload, an unsendable code or a reason that is not
/// UTF-8 is a protocol violation.
pub fn parse_close_payload(payload: &[u8]) -> Result<(u16, String), ProtocolError> {
    match payload.len() {
        0 => Ok((NO_STATUS, String::new())),
        1 => Err(ProtocolError::violation("close payload of one byte")),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !is_sendable(code) {
                return Err(ProtocolError::violation(format!("close code {} not allowed", code)));
            }
            let reason = std::str::from_utf8(&payload[2..])
                .map_err(|_| ProtocolError::violation("close reason is not valid UTF-8"))?;
            Ok((code, reason.to_owned()))
        }
    }
}

/// Build a close frame payload: 2-byte big-endian code followed by the reason.
pub fn encode_close_payload(code: u16, reason: &str) -> Result<Bytes, ProtocolError> {
    if !is_sendable(code) {
        return Err(ProtocolError::InvalidCloseCode(code));
    }
    if 2 + reason.len() > MAX_CONTROL_PAYLOAD {
        return Err(ProtocolError::frame(format!(
            "close reason too long: {} bytes",
            reason.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code);
    buf.put_slice(reason.as_bytes());
    Ok(buf.freeze())
}
