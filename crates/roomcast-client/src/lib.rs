//! Roomcast client library.
//!
//! Two steps, one per channel:
//!
//! 1. [`dial`] runs a CREATE or JOIN transaction on the control plane and
//!    returns a [`Capability`].
//! 2. [`DataChannel::connect`] takes that capability to the relay and sends
//!    and receives room messages.
//!
//! ```text
//! dial(control, RoomIntent) ──► Capability ──► DataChannel::connect(relay, ..)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod client;
mod error;

pub use channel::DataChannel;
pub use client::{
    Capability, DEFAULT_DIAL_TIMEOUT, MAX_RESPONSE_PAYLOAD, RoomIntent, dial, dial_with_timeout,
};
pub use error::ClientError;
pub use roomcast_proto::{Role, StatusCode};
