//! Model world: the oracle against which the real registry is verified.

use std::collections::BTreeMap;

use super::operation::{
    ClientId, ModelRoomId, Operation, OperationError, OperationResult, SmallMessage,
};

/// Number of distinct rooms operations are folded onto.
pub const NUM_ROOMS: u8 = 4;

/// Room capacity used by model-based tests.
pub const MODEL_CAPACITY: usize = 3;

/// Idle timeout used by model-based tests, in seconds.
pub const IDLE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
struct ModelRoom {
    host: ClientId,
    password: Option<u8>,
    /// `(client, last_activity_secs)` in admission order.
    members: Vec<(ClientId, u64)>,
}

impl ModelRoom {
    fn position(&self, client: ClientId) -> Option<usize> {
        self.members.iter().position(|(c, _)| *c == client)
    }
}

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// `(room, host, sorted members)` for every live room, sorted by room.
    pub rooms: Vec<(ModelRoomId, ClientId, Vec<ClientId>)>,
}

/// Model world.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    num_clients: usize,
    now_secs: u64,
    rooms: BTreeMap<ModelRoomId, ModelRoom>,
}

impl ModelWorld {
    /// Create a model world with the given number of clients.
    pub fn new(num_clients: usize) -> Self {
        Self {
            num_clients,
            now_secs: 0,
            rooms: BTreeMap::new(),
        }
    }

    /// Fold an arbitrary room id onto the model's room set.
    pub fn room(room_id: ModelRoomId) -> ModelRoomId {
        room_id % NUM_ROOMS
    }

    /// True if `client` is in `room`.
    pub fn is_member(&self, room_id: ModelRoomId, client: ClientId) -> bool {
        self.rooms
            .get(&Self::room(room_id))
            .is_some_and(|r| r.position(client).is_some())
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Apply an operation and return the result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        if let Some(client) = op_client(op) {
            if usize::from(client) >= self.num_clients {
                return OperationResult::Error(OperationError::InvalidClient);
            }
        }

        match op {
            Operation::CreateRoom {
                client_id,
                room_id,
                password,
            } => self.apply_create(*client_id, Self::room(*room_id), *password),
            Operation::JoinRoom {
                client_id,
                room_id,
                password,
            } => self.apply_join(*client_id, Self::room(*room_id), *password),
            Operation::SendMessage {
                client_id,
                room_id,
                content,
            } => self.apply_send(*client_id, Self::room(*room_id), content),
            Operation::LeaveRoom { client_id, room_id } => {
                self.apply_leave(*client_id, Self::room(*room_id))
            }
            Operation::AdvanceTime { secs } => {
                self.now_secs += u64::from(*secs);
                OperationResult::Ok
            }
            Operation::Sweep => {
                self.apply_sweep();
                OperationResult::Ok
            }
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let rooms = self
            .rooms
            .iter()
            .map(|(id, room)| {
                let mut members: Vec<_> = room.members.iter().map(|(c, _)| *c).collect();
                members.sort_unstable();
                (*id, room.host, members)
            })
            .collect();
        ObservableState { rooms }
    }

    fn apply_create(
        &mut self,
        client: ClientId,
        room: ModelRoomId,
        password: Option<u8>,
    ) -> OperationResult {
        if self.rooms.contains_key(&room) {
            return OperationResult::Error(OperationError::RoomAlreadyExists);
        }
        self.rooms.insert(
            room,
            ModelRoom {
                host: client,
                password,
                members: vec![(client, self.now_secs)],
            },
        );
        OperationResult::Ok
    }

    fn apply_join(
        &mut self,
        client: ClientId,
        room: ModelRoomId,
        password: Option<u8>,
    ) -> OperationResult {
        let now = self.now_secs;
        let Some(state) = self.rooms.get_mut(&room) else {
            return OperationResult::Error(OperationError::RoomNotFound);
        };
        if state.password.is_some() && state.password != password {
            return OperationResult::Error(OperationError::Unauthorized);
        }
        if state.members.len() >= MODEL_CAPACITY {
            return OperationResult::Error(OperationError::RoomFull);
        }
        if state.position(client).is_some() {
            return OperationResult::Error(OperationError::UsernameTaken);
        }
        state.members.push((client, now));
        OperationResult::Ok
    }

    fn apply_send(
        &mut self,
        client: ClientId,
        room: ModelRoomId,
        content: &SmallMessage,
    ) -> OperationResult {
        let now = self.now_secs;
        let Some(state) = self.rooms.get_mut(&room) else {
            return OperationResult::Error(OperationError::NotMember);
        };
        let Some(position) = state.position(client) else {
            return OperationResult::Error(OperationError::NotMember);
        };
        state.members[position].1 = now;

        if content.to_bytes().is_empty() {
            return OperationResult::Delivered(Vec::new());
        }
        let mut recipients: Vec<_> = state
            .members
            .iter()
            .map(|(c, _)| *c)
            .filter(|c| *c != client)
            .collect();
        recipients.sort_unstable();
        OperationResult::Delivered(recipients)
    }

    fn apply_leave(&mut self, client: ClientId, room: ModelRoomId) -> OperationResult {
        let Some(state) = self.rooms.get_mut(&room) else {
            return OperationResult::Error(OperationError::NotMember);
        };
        let Some(position) = state.position(client) else {
            return OperationResult::Error(OperationError::NotMember);
        };

        if state.host == client || state.members.len() == 1 {
            self.rooms.remove(&room);
        } else {
            state.members.remove(position);
        }
        OperationResult::Ok
    }

    fn apply_sweep(&mut self) {
        let now = self.now_secs;
        let idle = |last: u64| now.saturating_sub(last) > IDLE_TIMEOUT_SECS;

        self.rooms.retain(|_, room| {
            let host_idle = room
                .members
                .iter()
                .any(|(c, last)| *c == room.host && idle(*last));
            if host_idle {
                return false;
            }
            room.members.retain(|(_, last)| !idle(*last));
            !room.members.is_empty()
        });
    }
}

fn op_client(op: &Operation) -> Option<ClientId> {
    match op {
        Operation::CreateRoom { client_id, .. }
        | Operation::JoinRoom { client_id, .. }
        | Operation::SendMessage { client_id, .. }
        | Operation::LeaveRoom { client_id, .. } => Some(*client_id),
        Operation::AdvanceTime { .. } | Operation::Sweep => None,
    }
}
