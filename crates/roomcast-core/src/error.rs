//! Room and relay error types.

use roomcast_proto::{ProtocolError, StatusCode};

use crate::env::EntropyError;

/// Errors from control-plane room operations.
///
/// Every variant maps onto the wire [`StatusCode`] the control session sends
/// back; none of them leaves partial room or token state behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// A live room already uses that name.
    #[error("room already exists: {0}")]
    RoomExists(String),

    /// No live room with that name.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Room is at capacity.
    #[error("room {room} is full ({capacity} members)")]
    RoomFull {
        /// Room name.
        room: String,
        /// Configured capacity.
        capacity: usize,
    },

    /// Room name failed validation.
    #[error("invalid room name")]
    InvalidName,

    /// Username failed validation.
    #[error("invalid username")]
    InvalidUsername,

    /// Username already present in the room.
    #[error("username {0:?} is already in use")]
    UsernameTaken(String),

    /// Password longer than the wire bound.
    #[error("password too long")]
    InvalidPassword,

    /// Password mismatch, or a token without the required role.
    #[error("unauthorized")]
    Unauthorized,

    /// Random bytes for a token or salt were unavailable.
    #[error("token generation failed: {0}")]
    Entropy(#[from] EntropyError),
}

impl RoomError {
    /// Status code reported to the control-plane client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RoomExists(_) => StatusCode::RoomExists,
            Self::RoomNotFound(_) => StatusCode::RoomNotFound,
            Self::RoomFull { .. } => StatusCode::RoomFull,
            Self::InvalidName => StatusCode::InvalidName,
            Self::InvalidUsername | Self::UsernameTaken(_) => StatusCode::InvalidUsername,
            Self::Unauthorized => StatusCode::Unauthorized,
            Self::InvalidPassword | Self::Entropy(_) => StatusCode::ServerError,
        }
    }
}

/// Reasons a datagram is dropped by the relay.
///
/// None of these is ever reported to the sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayReject {
    /// The datagram does not parse.
    #[error("malformed datagram: {0}")]
    Malformed(#[from] ProtocolError),

    /// Unknown or revoked token, or a source address it is not bound to.
    #[error("invalid token")]
    InvalidToken,

    /// Token is valid but was issued for another room.
    #[error("token issued for room {granted}, datagram addressed to {claimed}")]
    RoomMismatch {
        /// Room the token belongs to.
        granted: String,
        /// Room named in the datagram.
        claimed: String,
    },

    /// The room was destroyed.
    #[error("room {0} is gone")]
    RoomGone(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(RoomError::RoomExists("lobby".into()).status_code(), StatusCode::RoomExists);
        assert_eq!(
            RoomError::UsernameTaken("bob".into()).status_code(),
            StatusCode::InvalidUsername
        );
        assert_eq!(
            RoomError::Entropy(EntropyError::Degenerate { attempts: 8 }).status_code(),
            StatusCode::ServerError
        );
    }

    #[test]
    fn error_display() {
        let err = RoomError::RoomFull { room: "lobby".into(), capacity: 2 };
        assert_eq!(err.to_string(), "room lobby is full (2 members)");
    }
}
