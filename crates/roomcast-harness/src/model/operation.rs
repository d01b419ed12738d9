//! Operations for model-based testing.
//!
//! Operations are generated randomly by proptest and applied to both the
//! model and the real implementation.

use arbitrary::Arbitrary;

/// Client identifier (0-indexed).
pub type ClientId = u8;

/// Room identifier, folded onto a handful of room names.
pub type ModelRoomId = u8;

/// Operations that can be applied to the system.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Client creates a room, optionally with a password.
    CreateRoom {
        /// Client performing the operation.
        client_id: ClientId,
        /// Room to create.
        room_id: ModelRoomId,
        /// Password key (expanded to a string in the real system).
        password: Option<u8>,
    },

    /// Client joins a room.
    JoinRoom {
        /// Client performing the operation.
        client_id: ClientId,
        /// Room to join.
        room_id: ModelRoomId,
        /// Password key offered.
        password: Option<u8>,
    },

    /// Client sends a datagram to a room. An empty message is a keep-alive.
    SendMessage {
        /// Sender.
        client_id: ClientId,
        /// Target room.
        room_id: ModelRoomId,
        /// Message content.
        content: SmallMessage,
    },

    /// Client leaves a room.
    LeaveRoom {
        /// Client leaving.
        client_id: ClientId,
        /// Room to leave.
        room_id: ModelRoomId,
    },

    /// Advance virtual time.
    AdvanceTime {
        /// Seconds to advance.
        secs: u8,
    },

    /// Run the liveness sweep.
    Sweep,
}

impl Operation {
    /// Same operation with the client id folded into `0..num_clients`.
    #[must_use]
    pub fn clamp_client(self, num_clients: usize) -> Self {
        let n = u8::try_from(num_clients.max(1)).unwrap_or(u8::MAX);
        match self {
            Self::CreateRoom {
                client_id,
                room_id,
                password,
            } => Self::CreateRoom {
                client_id: client_id % n,
                room_id,
                password,
            },
            Self::JoinRoom {
                client_id,
                room_id,
                password,
            } => Self::JoinRoom {
                client_id: client_id % n,
                room_id,
                password,
            },
            Self::SendMessage {
                client_id,
                room_id,
                content,
            } => Self::SendMessage {
                client_id: client_id % n,
                room_id,
                content,
            },
            Self::LeaveRoom { client_id, room_id } => Self::LeaveRoom {
                client_id: client_id % n,
                room_id,
            },
            other => other,
        }
    }
}

/// Small message content for testing.
///
/// The content is deterministic from the seed.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub struct SmallMessage {
    /// Message seed.
    pub seed: u8,
    /// Length hint (0-3 maps to empty/small/medium/large).
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to actual message bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len: u8 = match self.size_class % 4 {
            0 => 0,
            1 => 8,
            2 => 64,
            _ => 255,
        };

        (0..len).map(|i| self.seed.wrapping_add(i)).collect()
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Datagram accepted and delivered to these clients (sorted).
    Delivered(Vec<ClientId>),

    /// Operation failed with expected error.
    Error(OperationError),
}

/// Expected errors that can occur during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Room already exists.
    RoomAlreadyExists,
    /// Room not found.
    RoomNotFound,
    /// Room at capacity.
    RoomFull,
    /// Wrong or missing password.
    Unauthorized,
    /// Client already a member under the same username.
    UsernameTaken,
    /// Client is not a member of the room.
    NotMember,
    /// Invalid client ID.
    InvalidClient,
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        !self.is_err()
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
