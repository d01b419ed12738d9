//! Protocol error types.

use thiserror::Error;

/// Malformed or oversized frame.
///
/// Every decoder in this crate returns this error instead of recovering
/// mid-stream. The control plane answers it with `SERVER_ERROR`; the relay
/// drops the datagram silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum number of bytes required.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Declared lengths exceed the bytes present.
    #[error("frame truncated: header declares {declared} bytes, {available} available")]
    Truncated {
        /// Bytes declared by the header.
        declared: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// Bytes present beyond the declared frame length.
    #[error("{extra} trailing bytes after frame")]
    TrailingBytes {
        /// Number of unexpected bytes.
        extra: usize,
    },

    /// Room name longer than the protocol bound.
    #[error("room name too long: {size} > {max}")]
    RoomNameTooLong {
        /// Declared or actual size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Token longer than the protocol bound.
    #[error("token too long: {size} > {max}")]
    TokenTooLong {
        /// Declared or actual size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Control payload longer than the protocol bound.
    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge {
        /// Declared or actual size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Datagram larger than the channel maximum.
    #[error("datagram too large: {size} > {max}")]
    DatagramTooLarge {
        /// Datagram size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Unknown operation code in a control header.
    #[error("invalid operation code: {0}")]
    InvalidOperation(u8),

    /// Unknown transaction state in a control header.
    #[error("invalid transaction state: {0}")]
    InvalidState(u8),

    /// Room name is not valid UTF-8.
    #[error("room name is not valid UTF-8")]
    InvalidUtf8,

    /// CBOR payload failed to encode or decode.
    #[error("payload codec error: {0}")]
    Payload(String),

    /// Frame is well-formed but not the one expected at this point.
    #[error("unexpected frame: expected {expected}, got {actual}")]
    Unexpected {
        /// What the receiver expected.
        expected: &'static str,
        /// What arrived.
        actual: String,
    },
}
