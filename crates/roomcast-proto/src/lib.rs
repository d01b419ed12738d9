//! Roomcast wire protocol.
//!
//! Two independent binary formats:
//!
//! - **Control frames** (TCRP): a fixed 32-byte header followed by the room
//!   name and a CBOR payload. Carried over the connection-oriented control
//!   channel for the create/join handshake.
//! - **Relay frames**: a 2-byte sub-header followed by the room name, the
//!   capability token and the opaque message. Carried over the datagram
//!   channel.
//!
//! ```text
//! Control header (32 bytes)
//! ┌──────────┬───────────┬───────┬──────────────────────────────┐
//! │ room_len │ operation │ state │ payload_len (29 bytes, BE)   │
//! └──────────┴───────────┴───────┴──────────────────────────────┘
//!
//! Relay frame (client -> server, <= 4096 bytes)
//! ┌──────────┬───────────┬──────┬───────┬─────────┐
//! │ room_len │ token_len │ room │ token │ message │
//! └──────────┴───────────┴──────┴───────┴─────────┘
//! ```
//!
//! Server-to-client datagrams are the raw message bytes (<= 4094 bytes).
//!
//! All decoders reject rather than clamp: a declared length that exceeds its
//! bound or the bytes actually present is a [`ProtocolError`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod errors;
pub mod payloads;
pub mod relay;
pub mod validate;

pub use control::{
    CONTROL_HEADER_SIZE, ControlFrame, ControlHeader, MAX_CONTROL_PAYLOAD_SIZE, Operation,
    TransactionState,
};
pub use errors::ProtocolError;
pub use payloads::{Grant, Role, RoomRequest, StatusCode, StatusReply};
pub use relay::{
    MAX_INBOUND_DATAGRAM, MAX_OUTBOUND_DATAGRAM, RELAY_HEADER_SIZE, RelayFrame, encode_outbound,
};
pub use validate::{validate_room_name, validate_username};

/// Maximum room name size in bytes (UTF-8 encoded).
///
/// Applied identically by the control codec, the relay codec and the room
/// registry.
pub const MAX_ROOM_NAME_SIZE: usize = 28;

/// Size of an issued capability token in bytes.
///
/// Relay frames declaring a longer token are malformed.
pub const TOKEN_SIZE: usize = 32;

/// Maximum username size in bytes.
pub const MAX_USERNAME_SIZE: usize = 255;

/// Maximum room password size in bytes.
pub const MAX_PASSWORD_SIZE: usize = 255;
