//! Sans-IO core of the roomcast relay.
//!
//! Everything here is pure state: no sockets, no runtime. Time and
//! randomness come from an [`Environment`], so the same code runs under the
//! production server and under the deterministic harness.
//!
//! ## Architecture
//!
//! ```text
//! roomcast-core
//!   ├─ Environment     (time + entropy seam)
//!   ├─ TokenRegistry   (capability tokens, bound to a client IP)
//!   ├─ RoomRegistry    (rooms, members, endpoint index, sweep)
//!   ├─ ControlSession  (REQUEST → RESPONSE → COMPLETION per connection)
//!   └─ RelayEngine     (datagram validation, fan-out, liveness)
//! ```
//!
//! ## Locking
//!
//! The room map, each room and the endpoint index have their own locks and are
//! always taken in that order. The token registry lock is a leaf and may be
//! taken while any of the others is held.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod registry;
pub mod relay;
pub mod room;
pub mod session;
pub mod token;

#[cfg(test)]
pub(crate) mod test_env;

pub use env::{EntropyError, Environment};
pub use error::{RelayReject, RoomError};
pub use registry::{
    Admission, DEFAULT_MAX_MEMBERS, Departure, DepartureReason, Fanout, Removal, RoomConfig,
    RoomRegistry, RoomSnapshot,
};
pub use relay::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_FAILURES, DEFAULT_SWEEP_INTERVAL, ROOM_CLOSED_NOTICE,
    RelayAction, RelayConfig, RelayEngine,
};
pub use room::{MemberId, PasswordHash, RoomName};
pub use session::{ControlSession, SessionError, SessionState};
pub use token::{Token, TokenGrant, TokenRegistry};
