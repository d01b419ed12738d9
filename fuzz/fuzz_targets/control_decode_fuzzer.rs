//! Fuzz target for the control-frame decoder
//!
//! # Strategy
//!
//! - Raw bytes straight into `ControlFrame::decode`
//! - The same bytes split the way a stream reader would: header first, then
//!   exactly `body_len` bytes
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Both decode paths agree on every input that fits
//! - A decoded frame re-encodes to the same bytes
//! - Declared lengths never exceed their bounds after `from_bytes`

#![no_main]

use libfuzzer_sys::fuzz_target;
use roomcast_proto::{
    ControlFrame, ControlHeader, CONTROL_HEADER_SIZE, MAX_CONTROL_PAYLOAD_SIZE, MAX_ROOM_NAME_SIZE,
};

fuzz_target!(|data: &[u8]| {
    let whole = ControlFrame::decode(data);

    if let Ok(frame) = &whole {
        let bytes = frame.to_bytes().expect("decoded frame re-encodes");
        assert_eq!(bytes.as_ref(), data, "re-encoding must be exact");

        // Payload decoders must not panic either.
        let _ = frame.room_request();
        let _ = frame.status_reply();
        let _ = frame.grant();
    }

    let Ok(header) = ControlHeader::from_bytes(data) else {
        assert!(whole.is_err(), "decode accepted a frame whose header is invalid");
        return;
    };
    assert!(header.room_name_len() <= MAX_ROOM_NAME_SIZE);
    assert!(header.payload_len() <= MAX_CONTROL_PAYLOAD_SIZE);

    let body = &data[CONTROL_HEADER_SIZE..];
    if body.len() == header.body_len() {
        let split = ControlFrame::from_parts(&header, body);
        assert_eq!(split, whole, "stream and buffer decoders disagree");
    }
});
