//! Name validation shared by the control plane and the room registry.
//!
//! A valid name is non-empty, fits its byte bound, carries no leading or
//! trailing whitespace and contains no control characters.

use crate::{MAX_ROOM_NAME_SIZE, MAX_USERNAME_SIZE};

/// Check a room name.
pub fn validate_room_name(name: &str) -> bool {
    validate_name(name, MAX_ROOM_NAME_SIZE)
}

/// Check a username.
pub fn validate_username(name: &str) -> bool {
    validate_name(name, MAX_USERNAME_SIZE)
}

fn validate_name(name: &str, max_bytes: usize) -> bool {
    !name.is_empty()
        && name.len() <= max_bytes
        && name.trim() == name
        && !name.chars().any(char::is_control)
}
