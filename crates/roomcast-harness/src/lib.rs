//! Deterministic test harness for roomcast.
//!
//! [`SimEnv`] implements the core `Environment` with a virtual clock and a
//! seeded ChaCha RNG, so liveness and token tests advance time explicitly and
//! replay exactly from a seed.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation of room membership
//! and fan-out. Operations are applied to both the model and the real
//! registry/relay engine, and their results and observable states are
//! compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_env;

pub use model::{
    ClientId, IDLE_TIMEOUT_SECS, MODEL_CAPACITY, ModelRoomId, ModelWorld, ObservableState,
    Operation, OperationError, OperationResult, SmallMessage,
};
pub use sim_env::SimEnv;
