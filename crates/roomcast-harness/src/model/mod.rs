//! Reference model for model-based testing.
//!
//! The model tracks room membership, passwords and per-member activity with
//! plain maps and whole-second virtual time. It has no tokens, no sockets and
//! no locking; it is the oracle the real registry and relay engine are
//! checked against.

mod operation;
mod world;

pub use operation::{
    ClientId, ModelRoomId, Operation, OperationError, OperationResult, SmallMessage,
};
pub use world::{IDLE_TIMEOUT_SECS, MODEL_CAPACITY, ModelWorld, NUM_ROOMS, ObservableState};
