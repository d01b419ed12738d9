//! Fuzz target for the relay-frame decoder
//!
//! # Invariants
//!
//! - NEVER panic on any datagram
//! - A decoded frame stays within every bound and re-encodes exactly
//! - `peek_room` agrees with `decode` whenever `decode` succeeds

#![no_main]

use libfuzzer_sys::fuzz_target;
use roomcast_proto::{RelayFrame, MAX_INBOUND_DATAGRAM, MAX_ROOM_NAME_SIZE, TOKEN_SIZE};

fuzz_target!(|data: &[u8]| {
    let peeked = RelayFrame::peek_room(data);

    let Ok(frame) = RelayFrame::decode(data) else {
        return;
    };

    assert!(data.len() <= MAX_INBOUND_DATAGRAM);
    assert!(frame.room.len() <= MAX_ROOM_NAME_SIZE);
    assert!(frame.token.len() <= TOKEN_SIZE);
    assert_eq!(peeked, Some(frame.room.as_str()));

    let bytes = frame.encode().expect("decoded frame re-encodes");
    assert_eq!(bytes.as_ref(), data);
});
