//! CBOR payloads carried inside control frames.
//!
//! | Operation | State      | Payload         |
//! |-----------|------------|-----------------|
//! | any       | REQUEST    | [`RoomRequest`] |
//! | any       | RESPONSE   | [`StatusReply`] |
//! | any       | COMPLETION | [`Grant`]       |

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::errors::ProtocolError;

/// Status code returned in a RESPONSE frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum StatusCode {
    /// Request accepted; a COMPLETION frame follows.
    Success = 0,
    /// A live room with that name already exists.
    RoomExists = 1,
    /// No live room with that name.
    RoomNotFound = 2,
    /// Room is at capacity.
    RoomFull = 3,
    /// Username failed validation.
    InvalidUsername = 4,
    /// Room name failed validation.
    InvalidName = 5,
    /// Malformed request or internal failure.
    ServerError = 6,
    /// Password mismatch.
    Unauthorized = 7,
}

impl StatusCode {
    /// True for [`StatusCode::Success`].
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::RoomExists => "ROOM_EXISTS",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomFull => "ROOM_FULL",
            Self::InvalidUsername => "INVALID_USERNAME",
            Self::InvalidName => "INVALID_NAME",
            Self::ServerError => "SERVER_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
        };
        f.write_str(name)
    }
}

/// Role a token grants inside its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Role {
    /// Room creator; its departure destroys the room.
    Host = 0,
    /// Member admitted through JOIN.
    Participant = 1,
}

/// REQUEST payload for both CREATE and JOIN.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl hides `password`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRequest {
    /// Display name inside the room.
    pub username: String,
    /// Room password (CREATE sets it, JOIN must match it).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,
}

impl RoomRequest {
    /// Request without a password.
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), password: None }
    }

    /// Attach a password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for RoomRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRequest")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// RESPONSE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    /// Outcome of the request.
    pub status: StatusCode,
    /// Human-readable detail for the front-end.
    #[serde(default)]
    pub message: String,
}

impl StatusReply {
    /// Build a reply.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

/// COMPLETION payload: the capability the client takes to the data channel.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl hides `token`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Opaque capability token.
    pub token: Vec<u8>,
    /// Role bound to the token.
    pub role: Role,
    /// Username of the room's host.
    pub host_username: String,
    /// Members in the room after this admission.
    pub participant_count: u32,
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grant")
            .field("token", &format!("<redacted {} bytes>", self.token.len()))
            .field("role", &self.role)
            .field("host_username", &self.host_username)
            .field("participant_count", &self.participant_count)
            .finish()
    }
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::Payload(e.to_string()))?;
    Ok(Bytes::from(buf))
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Payload(e.to_string()))
}
