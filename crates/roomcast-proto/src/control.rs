//! Control-channel framing (TCRP).
//!
//! A control frame is a fixed 32-byte [`ControlHeader`] followed by a body of
//! `room_name_len + payload_len` bytes. The payload is CBOR; its schema
//! depends on the operation and transaction state (see [`crate::payloads`]).
//!
//! Stream readers use [`ControlHeader::from_bytes`] to learn the body length
//! before reading it, then [`ControlFrame::from_parts`] to assemble the frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    MAX_ROOM_NAME_SIZE,
    errors::ProtocolError,
    payloads::{self, Grant, RoomRequest, StatusReply},
};

/// Size of the fixed control header in bytes.
pub const CONTROL_HEADER_SIZE: usize = 32;

/// Largest payload length expressible by the header (2^29 - 1).
pub const MAX_CONTROL_PAYLOAD_SIZE: usize = (1 << 29) - 1;

/// Width of the big-endian payload length field.
const PAYLOAD_LEN_FIELD: usize = 29;

/// Control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// Create a new room and become its host.
    Create = 1,
    /// Join an existing room as a participant.
    Join = 2,
}

impl TryFrom<u8> for Operation {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Create),
            2 => Ok(Self::Join),
            other => Err(ProtocolError::InvalidOperation(other)),
        }
    }
}

/// Position of a frame within the request/response/completion transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionState {
    /// Client asks to create or join.
    Request = 0,
    /// Server answers with a status code.
    Response = 1,
    /// Server delivers the issued token.
    Completion = 2,
}

impl TryFrom<u8> for TransactionState {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::Completion),
            other => Err(ProtocolError::InvalidState(other)),
        }
    }
}

/// Fixed 32-byte control header.
///
/// Layout is byte-for-byte the wire layout, so it can be read straight out of
/// a receive buffer. All multi-byte fields are big-endian.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ControlHeader {
    room_name_len: u8,
    operation: u8,
    state: u8,
    payload_len: [u8; PAYLOAD_LEN_FIELD],
}

impl ControlHeader {
    /// Header size in bytes.
    pub const SIZE: usize = CONTROL_HEADER_SIZE;

    /// Build a header, rejecting out-of-range lengths.
    pub fn new(
        room_name_len: usize,
        operation: Operation,
        state: TransactionState,
        payload_len: usize,
    ) -> Result<Self, ProtocolError> {
        let room_too_long =
            || ProtocolError::RoomNameTooLong { size: room_name_len, max: MAX_ROOM_NAME_SIZE };
        if room_name_len > MAX_ROOM_NAME_SIZE {
            return Err(room_too_long());
        }
        let room_len = u8::try_from(room_name_len).map_err(|_| room_too_long())?;
        if payload_len > MAX_CONTROL_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_CONTROL_PAYLOAD_SIZE,
            });
        }

        let mut field = [0u8; PAYLOAD_LEN_FIELD];
        // Bounded by MAX_CONTROL_PAYLOAD_SIZE above, so it fits in 4 bytes.
        let len = u32::try_from(payload_len).map_err(|_| ProtocolError::PayloadTooLarge {
            size: payload_len,
            max: MAX_CONTROL_PAYLOAD_SIZE,
        })?;
        field[PAYLOAD_LEN_FIELD - 4..].copy_from_slice(&len.to_be_bytes());

        Ok(Self {
            room_name_len: room_len,
            operation: operation as u8,
            state: state as u8,
            payload_len: field,
        })
    }

    /// Parse and validate a header from the first 32 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// - `TooShort` if fewer than 32 bytes are given
    /// - `InvalidOperation` / `InvalidState` for unknown codes
    /// - `RoomNameTooLong` if the declared room name exceeds 28 bytes
    /// - `PayloadTooLarge` if the declared payload exceeds 2^29 - 1 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let head = bytes.get(..Self::SIZE).ok_or(ProtocolError::TooShort {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        let header = Self::read_from_bytes(head).map_err(|_| ProtocolError::TooShort {
            expected: Self::SIZE,
            actual: head.len(),
        })?;

        Operation::try_from(header.operation)?;
        TransactionState::try_from(header.state)?;

        if header.room_name_len() > MAX_ROOM_NAME_SIZE {
            return Err(ProtocolError::RoomNameTooLong {
                size: header.room_name_len(),
                max: MAX_ROOM_NAME_SIZE,
            });
        }

        let payload_len = header.declared_payload_len();
        if payload_len > MAX_CONTROL_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_CONTROL_PAYLOAD_SIZE,
            });
        }

        Ok(header)
    }

    /// Raw header bytes, ready for the wire.
    pub fn to_bytes(&self) -> [u8; CONTROL_HEADER_SIZE] {
        let mut out = [0u8; CONTROL_HEADER_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Declared room name length.
    pub fn room_name_len(&self) -> usize {
        usize::from(self.room_name_len)
    }

    /// Declared payload length.
    ///
    /// Only meaningful on headers produced by [`Self::new`] or
    /// [`Self::from_bytes`], which bound it to 2^29 - 1.
    pub fn payload_len(&self) -> usize {
        self.declared_payload_len()
    }

    /// Number of body bytes following the header.
    pub fn body_len(&self) -> usize {
        self.room_name_len() + self.payload_len()
    }

    /// Operation, if the code is known.
    pub fn operation(&self) -> Option<Operation> {
        Operation::try_from(self.operation).ok()
    }

    /// Transaction state, if the code is known.
    pub fn state(&self) -> Option<TransactionState> {
        TransactionState::try_from(self.state).ok()
    }

    fn declared_payload_len(&self) -> usize {
        let value = self
            .payload_len
            .iter()
            .fold(0u64, |acc, &b| acc.saturating_mul(256).saturating_add(u64::from(b)));
        usize::try_from(value).unwrap_or(usize::MAX)
    }
}

impl std::fmt::Debug for ControlHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHeader")
            .field("room_name_len", &self.room_name_len)
            .field("operation", &self.operation())
            .field("state", &self.state())
            .field("payload_len", &self.declared_payload_len())
            .finish()
    }
}

/// A complete control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    /// Target room name.
    pub room: String,
    /// Operation this transaction performs.
    pub operation: Operation,
    /// Position in the transaction.
    pub state: TransactionState,
    /// CBOR payload bytes.
    pub payload: Bytes,
}

impl ControlFrame {
    /// Create a frame from raw parts.
    pub fn new(
        room: impl Into<String>,
        operation: Operation,
        state: TransactionState,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self { room: room.into(), operation, state, payload: payload.into() }
    }

    /// Build a REQUEST frame.
    pub fn request(
        room: impl Into<String>,
        operation: Operation,
        request: &RoomRequest,
    ) -> Result<Self, ProtocolError> {
        Self::with_payload(room, operation, TransactionState::Request, request)
    }

    /// Build a RESPONSE frame.
    pub fn response(
        room: impl Into<String>,
        operation: Operation,
        reply: &StatusReply,
    ) -> Result<Self, ProtocolError> {
        Self::with_payload(room, operation, TransactionState::Response, reply)
    }

    /// Build a COMPLETION frame.
    pub fn completion(
        room: impl Into<String>,
        operation: Operation,
        grant: &Grant,
    ) -> Result<Self, ProtocolError> {
        Self::with_payload(room, operation, TransactionState::Completion, grant)
    }

    fn with_payload<T: Serialize>(
        room: impl Into<String>,
        operation: Operation,
        state: TransactionState,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(room, operation, state, payloads::to_cbor(payload)?))
    }

    /// Header describing this frame.
    ///
    /// # Errors
    ///
    /// Fails if the room name or payload exceeds its bound.
    pub fn header(&self) -> Result<ControlHeader, ProtocolError> {
        ControlHeader::new(self.room.len(), self.operation, self.state, self.payload.len())
    }

    /// Total encoded size (header + body).
    pub fn encoded_len(&self) -> usize {
        CONTROL_HEADER_SIZE + self.room.len() + self.payload.len()
    }

    /// Encode into `dst`.
    ///
    /// Nothing is written if the frame violates a bound.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
        let header = self.header()?;
        dst.put_slice(header.as_bytes());
        dst.put_slice(self.room.as_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a complete frame. The buffer must hold exactly one frame.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = ControlHeader::from_bytes(buf)?;
        let body = &buf[CONTROL_HEADER_SIZE..];

        if body.len() > header.body_len() {
            return Err(ProtocolError::TrailingBytes { extra: body.len() - header.body_len() });
        }

        Self::from_parts(&header, body)
    }

    /// Assemble a frame from a validated header and its body bytes.
    pub fn from_parts(header: &ControlHeader, body: &[u8]) -> Result<Self, ProtocolError> {
        let room_len = header.room_name_len();
        let declared = header.body_len();
        if body.len() < declared {
            return Err(ProtocolError::Truncated { declared, available: body.len() });
        }

        let operation = Operation::try_from(header.operation)?;
        let state = TransactionState::try_from(header.state)?;

        let (room_bytes, rest) = body.split_at(room_len);
        let room = std::str::from_utf8(room_bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        let payload = Bytes::copy_from_slice(&rest[..header.payload_len()]);

        Ok(Self { room: room.to_owned(), operation, state, payload })
    }

    /// Check that this frame is at the expected transaction state.
    pub fn expect_state(&self, expected: TransactionState) -> Result<(), ProtocolError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolError::Unexpected {
                expected: state_name(expected),
                actual: state_name(self.state).to_owned(),
            })
        }
    }

    /// Decode the payload of a REQUEST frame.
    pub fn room_request(&self) -> Result<RoomRequest, ProtocolError> {
        self.decode_payload(TransactionState::Request)
    }

    /// Decode the payload of a RESPONSE frame.
    pub fn status_reply(&self) -> Result<StatusReply, ProtocolError> {
        self.decode_payload(TransactionState::Response)
    }

    /// Decode the payload of a COMPLETION frame.
    pub fn grant(&self) -> Result<Grant, ProtocolError> {
        self.decode_payload(TransactionState::Completion)
    }

    fn decode_payload<T: DeserializeOwned>(
        &self,
        expected: TransactionState,
    ) -> Result<T, ProtocolError> {
        self.expect_state(expected)?;
        payloads::from_cbor(&self.payload)
    }
}

fn state_name(state: TransactionState) -> &'static str {
    match state {
        TransactionState::Request => "REQUEST",
        TransactionState::Response => "RESPONSE",
        TransactionState::Completion => "COMPLETION",
    }
}
