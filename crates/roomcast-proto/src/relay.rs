//! Datagram-channel framing.
//!
//! Client-to-server datagrams carry a 2-byte sub-header (room name length,
//! token length), then the room name, the token and the message. The message
//! runs to the end of the datagram; there is no length field for it.
//!
//! Server-to-client datagrams are the bare message bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{MAX_ROOM_NAME_SIZE, TOKEN_SIZE, errors::ProtocolError};

/// Size of the client-to-server sub-header.
pub const RELAY_HEADER_SIZE: usize = 2;

/// Maximum client-to-server datagram size.
pub const MAX_INBOUND_DATAGRAM: usize = 4096;

/// Maximum server-to-client datagram size.
pub const MAX_OUTBOUND_DATAGRAM: usize = 4094;

/// Client-to-server relay frame.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl hides `token`.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Room the message is addressed to.
    pub room: String,
    /// Capability token issued by the control plane.
    pub token: Bytes,
    /// Opaque message bytes. Empty means keep-alive.
    pub message: Bytes,
}

impl RelayFrame {
    /// Build a frame.
    pub fn new(
        room: impl Into<String>,
        token: impl Into<Bytes>,
        message: impl Into<Bytes>,
    ) -> Self {
        Self { room: room.into(), token: token.into(), message: message.into() }
    }

    /// Largest message that fits next to this room name and token.
    pub fn max_message_len(room_len: usize, token_len: usize) -> usize {
        MAX_INBOUND_DATAGRAM.saturating_sub(RELAY_HEADER_SIZE + room_len + token_len)
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        RELAY_HEADER_SIZE + self.room.len() + self.token.len() + self.message.len()
    }

    /// Encode to a datagram.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.room.len() > MAX_ROOM_NAME_SIZE {
            return Err(ProtocolError::RoomNameTooLong {
                size: self.room.len(),
                max: MAX_ROOM_NAME_SIZE,
            });
        }
        if self.token.len() > TOKEN_SIZE {
            return Err(ProtocolError::TokenTooLong { size: self.token.len(), max: TOKEN_SIZE });
        }
        let size = self.encoded_len();
        if size > MAX_INBOUND_DATAGRAM {
            return Err(ProtocolError::DatagramTooLarge { size, max: MAX_INBOUND_DATAGRAM });
        }

        let room_len = u8::try_from(self.room.len()).map_err(|_| {
            ProtocolError::RoomNameTooLong { size: self.room.len(), max: MAX_ROOM_NAME_SIZE }
        })?;
        let token_len = u8::try_from(self.token.len())
            .map_err(|_| ProtocolError::TokenTooLong { size: self.token.len(), max: TOKEN_SIZE })?;

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(room_len);
        buf.put_u8(token_len);
        buf.put_slice(self.room.as_bytes());
        buf.put_slice(&self.token);
        buf.put_slice(&self.message);
        Ok(buf.freeze())
    }

    /// Decode a datagram.
    ///
    /// # Errors
    ///
    /// - `DatagramTooLarge` above 4096 bytes
    /// - `TooShort` below the 2-byte sub-header
    /// - `RoomNameTooLong` / `TokenTooLong` for out-of-bound declarations
    /// - `Truncated` if the declared room name and token overrun the datagram
    /// - `InvalidUtf8` for a non-UTF-8 room name
    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() > MAX_INBOUND_DATAGRAM {
            return Err(ProtocolError::DatagramTooLarge {
                size: datagram.len(),
                max: MAX_INBOUND_DATAGRAM,
            });
        }

        let (room_len, token_len, body) = split_header(datagram)?;

        if token_len > TOKEN_SIZE {
            return Err(ProtocolError::TokenTooLong { size: token_len, max: TOKEN_SIZE });
        }
        let declared = room_len + token_len;
        if body.len() < declared {
            return Err(ProtocolError::Truncated { declared, available: body.len() });
        }

        let (room_bytes, rest) = body.split_at(room_len);
        let (token, message) = rest.split_at(token_len);
        let room = std::str::from_utf8(room_bytes).map_err(|_| ProtocolError::InvalidUtf8)?;

        Ok(Self {
            room: room.to_owned(),
            token: Bytes::copy_from_slice(token),
            message: Bytes::copy_from_slice(message),
        })
    }

    /// Room name of a datagram whose sub-header and room name are intact.
    ///
    /// Works on frames that fail [`Self::decode`] for other reasons, so a
    /// failure can still be attributed to a room.
    pub fn peek_room(datagram: &[u8]) -> Option<&str> {
        let (room_len, _, body) = split_header(datagram).ok()?;
        std::str::from_utf8(body.get(..room_len)?).ok()
    }
}

impl std::fmt::Debug for RelayFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayFrame")
            .field("room", &self.room)
            .field("token", &format!("<redacted {} bytes>", self.token.len()))
            .field("message_len", &self.message.len())
            .finish()
    }
}

fn split_header(datagram: &[u8]) -> Result<(usize, usize, &[u8]), ProtocolError> {
    let [room_len, token_len, body @ ..] = datagram else {
        return Err(ProtocolError::TooShort {
            expected: RELAY_HEADER_SIZE,
            actual: datagram.len(),
        });
    };

    let room_len = usize::from(*room_len);
    if room_len > MAX_ROOM_NAME_SIZE {
        return Err(ProtocolError::RoomNameTooLong { size: room_len, max: MAX_ROOM_NAME_SIZE });
    }

    Ok((room_len, usize::from(*token_len), body))
}

/// Frame a message for delivery to a client.
pub fn encode_outbound(message: &[u8]) -> Result<Bytes, ProtocolError> {
    if message.len() > MAX_OUTBOUND_DATAGRAM {
        return Err(ProtocolError::DatagramTooLarge {
            size: message.len(),
            max: MAX_OUTBOUND_DATAGRAM,
        });
    }
    Ok(Bytes::copy_from_slice(message))
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn encode_layout() {
        let frame = RelayFrame::new("ab", Bytes::from_static(b"tk"), Bytes::from_static(b"hi"));
        let bytes = frame.encode().expect("encode");

        assert_eq!(bytes.as_ref(), hex!("02 02 6162 746b 6869"));
    }

    #[test]
    fn decode_rejects_header_only_byte() {
        assert_eq!(
            RelayFrame::decode(b"x"),
            Err(ProtocolError::TooShort { expected: 2, actual: 1 })
        );
    }

    #[test]
    fn decode_rejects_declared_overrun() {
        let result = RelayFrame::decode(&hex!("05 00 6162"));
        assert_eq!(result, Err(ProtocolError::Truncated { declared: 5, available: 2 }));
    }

    #[test]
    fn decode_rejects_long_room_declaration() {
        let mut datagram = vec![29, 0];
        datagram.extend(std::iter::repeat_n(b'a', 29));

        let result = RelayFrame::decode(&datagram);
        assert!(matches!(result, Err(ProtocolError::RoomNameTooLong { size: 29, .. })));
    }

    #[test]
    fn decode_rejects_long_token_declaration() {
        let mut datagram = vec![1, 33, b'a'];
        datagram.extend(std::iter::repeat_n(0u8, 33));

        let result = RelayFrame::decode(&datagram);
        assert!(matches!(result, Err(ProtocolError::TokenTooLong { size: 33, .. })));
    }

    #[test]
    fn decode_rejects_oversized_datagram() {
        let datagram = vec![0u8; MAX_INBOUND_DATAGRAM + 1];
        assert!(matches!(
            RelayFrame::decode(&datagram),
            Err(ProtocolError::DatagramTooLarge { .. })
        ));
    }

    #[test]
    fn encode_rejects_oversized_message() {
        let message = vec![0u8; RelayFrame::max_message_len(5, TOKEN_SIZE) + 1];
        let frame = RelayFrame::new("lobby", vec![0u8; TOKEN_SIZE], message);

        assert!(matches!(frame.encode(), Err(ProtocolError::DatagramTooLarge { .. })));
    }

    #[test]
    fn encode_rejects_lengths_past_u8() {
        let frame = RelayFrame::new("r".repeat(256), Bytes::new(), Bytes::new());
        assert_eq!(
            frame.encode(),
            Err(ProtocolError::RoomNameTooLong { size: 256, max: MAX_ROOM_NAME_SIZE })
        );

        let frame = RelayFrame::new("lobby", vec![0u8; 300], Bytes::new());
        assert_eq!(frame.encode(), Err(ProtocolError::TokenTooLong { size: 300, max: TOKEN_SIZE }));
    }

    #[test]
    fn peek_room_survives_bad_token_length() {
        let mut datagram = vec![5, 200];
        datagram.extend_from_slice(b"lobby");

        assert!(RelayFrame::decode(&datagram).is_err());
        assert_eq!(RelayFrame::peek_room(&datagram), Some("lobby"));
    }

    #[test]
    fn peek_room_on_garbage() {
        assert_eq!(RelayFrame::peek_room(&[]), None);
        assert_eq!(RelayFrame::peek_room(&[10, 0, b'a']), None);
    }

    #[test]
    fn outbound_bound() {
        assert!(encode_outbound(&[0u8; MAX_OUTBOUND_DATAGRAM]).is_ok());
        assert!(encode_outbound(&[0u8; MAX_OUTBOUND_DATAGRAM + 1]).is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let frame = RelayFrame::new("lobby", Bytes::from_static(b"secret-token"), Bytes::new());
        assert!(!format!("{frame:?}").contains("secret"));
    }
}
