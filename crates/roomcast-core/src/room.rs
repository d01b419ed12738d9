//! Room and member records.
//!
//! A [`Room`] owns its members outright. Everything else (the endpoint index,
//! token grants) refers to members by [`MemberId`] and re-resolves them under
//! the room lock.

use std::{
    borrow::Borrow,
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use roomcast_proto::{Role, validate_room_name};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{error::RoomError, token::Token};

/// Size of the per-room password salt.
pub const SALT_SIZE: usize = 16;

/// Validated room name.
///
/// Cheap to clone; borrows as `str` so maps keyed by it can be queried with a
/// plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(Arc<str>);

impl RoomName {
    /// Validate and wrap a room name.
    pub fn new(name: &str) -> Result<Self, RoomError> {
        if validate_room_name(name) {
            Ok(Self(Arc::from(name)))
        } else {
            Err(RoomError::InvalidName)
        }
    }

    /// Name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoomName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RoomName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for RoomName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

/// Server-internal member identity. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Salted SHA-256 password digest.
#[derive(Clone)]
pub struct PasswordHash {
    salt: [u8; SALT_SIZE],
    digest: [u8; 32],
}

impl PasswordHash {
    /// Hash `password` under `salt`.
    pub fn new(password: &str, salt: [u8; SALT_SIZE]) -> Self {
        Self { salt, digest: Self::digest(&salt, password) }
    }

    /// Constant-time check of a candidate password.
    pub fn verify(&self, candidate: &str) -> bool {
        Self::digest(&self.salt, candidate).ct_eq(&self.digest).into()
    }

    fn digest(salt: &[u8; SALT_SIZE], password: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize().into()
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

/// One member of a room.
#[derive(Debug, Clone)]
pub struct Member {
    /// Internal identity.
    pub id: MemberId,
    /// Display name, unique within the room.
    pub username: String,
    /// Host or participant.
    pub role: Role,
    /// Address the control session came from; the token is bound to it.
    pub ip: IpAddr,
    /// Data-channel endpoint, learned from the first valid datagram.
    pub endpoint: Option<SocketAddr>,
    /// Last valid datagram (or admission time).
    pub last_activity: Instant,
    /// Consecutive rejected datagrams.
    pub failures: u32,
    /// Capability token issued at admission.
    pub token: Token,
}

/// A live room.
#[derive(Debug)]
pub struct Room {
    /// Room name.
    pub name: RoomName,
    /// Optional password.
    pub password: Option<PasswordHash>,
    /// Current host. Exactly one member holds [`Role::Host`].
    pub host: MemberId,
    /// Members in admission order.
    pub members: Vec<Member>,
    /// Creation time.
    pub created_at: Instant,
    /// Maximum members.
    pub capacity: usize,
    /// Set under the room lock before the room is unlinked from the map.
    pub closed: bool,
}

impl Room {
    /// Look up a member.
    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Look up a member mutably.
    pub fn member_mut(&mut self, id: MemberId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    /// True once the room holds `capacity` members.
    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    /// True if `username` is taken.
    pub fn has_username(&self, username: &str) -> bool {
        self.members.iter().any(|m| m.username == username)
    }

    /// Username of the host.
    pub fn host_username(&self) -> &str {
        self.member(self.host).map_or("", |m| m.username.as_str())
    }

    /// Known endpoints of every member except `exclude`.
    pub fn endpoints_except(&self, exclude: MemberId) -> Vec<SocketAddr> {
        self.members.iter().filter(|m| m.id != exclude).filter_map(|m| m.endpoint).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_validation() {
        assert!(RoomName::new("lobby").is_ok());
        assert_eq!(RoomName::new(""), Err(RoomError::InvalidName));
        assert_eq!(RoomName::new(&"x".repeat(29)), Err(RoomError::InvalidName));
    }

    #[test]
    fn room_name_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(RoomName::new("lobby").expect("valid"), 1);
        assert_eq!(map.get("lobby"), Some(&1));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = PasswordHash::new("hunter2", [7u8; SALT_SIZE]);
        assert!(hash.verify("hunter2"));
        assert!(!hash.verify("hunter3"));
        assert!(!hash.verify(""));
    }

    #[test]
    fn password_hash_depends_on_salt() {
        let a = PasswordHash::new("pw", [1u8; SALT_SIZE]);
        let b = PasswordHash::new("pw", [2u8; SALT_SIZE]);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn password_hash_debug_redacts() {
        let hash = PasswordHash::new("hunter2", [0u8; SALT_SIZE]);
        assert_eq!(format!("{hash:?}"), "PasswordHash(<redacted>)");
    }

    proptest::proptest! {
        #[test]
        fn password_hash_accepts_only_the_password(
            password in "[ -~]{0,32}",
            other in "[ -~]{0,32}",
            salt in proptest::array::uniform16(proptest::num::u8::ANY),
        ) {
            let hash = PasswordHash::new(&password, salt);
            proptest::prop_assert!(hash.verify(&password));
            proptest::prop_assert_eq!(hash.verify(&other), other == password);
        }
    }
}
