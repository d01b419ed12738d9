//! Capability tokens.
//!
//! A token is 32 random bytes handed out at the end of a control transaction
//! and presented on every datagram. The registry maps the SHA-256 digest of
//! each live token to its grant; the stored token is then compared with the
//! presented one in constant time, so lookup timing reveals nothing about how
//! close a guess was.
//!
//! ## Address binding
//!
//! A grant is bound to the client's IP address, not a full socket address:
//! the control connection and the datagram socket use different ports.

use std::{
    collections::HashMap,
    fmt,
    net::IpAddr,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use roomcast_proto::{Role, TOKEN_SIZE};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{
    env::{EntropyError, Environment},
    room::{MemberId, RoomName},
};

/// Draws before a run of collisions is treated as a broken entropy source.
const MAX_ISSUE_ATTEMPTS: u32 = 8;

type TokenDigest = [u8; 32];

/// Opaque capability token.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl never prints the bytes.
/// - **Constant-time equality**: `PartialEq` uses `subtle`.
#[derive(Clone)]
pub struct Token([u8; TOKEN_SIZE]);

impl Token {
    /// Wrap raw token bytes. `None` unless exactly [`TOKEN_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; TOKEN_SIZE]>::try_from(bytes).ok().map(Self)
    }

    /// Raw bytes, for the COMPLETION frame and relay frames.
    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    fn digest(bytes: &[u8]) -> TokenDigest {
        Sha256::digest(bytes).into()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// What a live token authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Room the token was issued for.
    pub room: RoomName,
    /// Member the token belongs to.
    pub member: MemberId,
    /// Role inside the room.
    pub role: Role,
    /// Client IP the token is bound to.
    pub ip: IpAddr,
    /// Issue time.
    pub issued_at: Instant,
}

struct Entry {
    token: Token,
    grant: TokenGrant,
}

/// Registry of live tokens.
///
/// Internally synchronized; its lock is never held while calling out, so it
/// can be taken underneath any room lock.
pub struct TokenRegistry<E: Environment> {
    env: E,
    entries: Mutex<HashMap<TokenDigest, Entry>>,
}

impl<E: Environment> TokenRegistry<E> {
    /// Create an empty registry.
    pub fn new(env: E) -> Self {
        Self { env, entries: Mutex::new(HashMap::new()) }
    }

    /// Mint a token for `member` of `room`, bound to `ip`.
    ///
    /// Draws are repeated on collision with a live token; revoked tokens are
    /// forgotten entirely, so the only reuse risk is a fresh 256-bit
    /// collision.
    ///
    /// # Errors
    ///
    /// `EntropyError` if the environment cannot supply random bytes, or keeps
    /// producing tokens that are already live.
    pub fn issue(
        &self,
        room: RoomName,
        ip: IpAddr,
        member: MemberId,
        role: Role,
    ) -> Result<Token, EntropyError> {
        let mut entries = self.entries();

        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let mut bytes = [0u8; TOKEN_SIZE];
            self.env.random_bytes(&mut bytes)?;
            let token = Token(bytes);
            let digest = Token::digest(&bytes);

            if entries.contains_key(&digest) {
                tracing::warn!("token collision for room {}, redrawing", room);
                continue;
            }

            let grant = TokenGrant { room, member, role, ip, issued_at: self.env.now() };
            entries.insert(digest, Entry { token: token.clone(), grant });
            return Ok(token);
        }

        Err(EntropyError::Degenerate { attempts: MAX_ISSUE_ATTEMPTS })
    }

    /// Resolve a presented token.
    ///
    /// Returns `None` for unknown, revoked or wrongly sized tokens, and for
    /// tokens presented from an IP other than the one they are bound to.
    pub fn validate(&self, presented: &[u8], ip: IpAddr) -> Option<TokenGrant> {
        if presented.len() != TOKEN_SIZE {
            return None;
        }

        let entries = self.entries();
        let entry = entries.get(&Token::digest(presented))?;

        let matches: bool = entry.token.0.ct_eq(presented).into();
        if !matches || entry.grant.ip != ip {
            return None;
        }
        Some(entry.grant.clone())
    }

    /// Revoke one token. Returns false if it was not live.
    pub fn revoke(&self, token: &Token) -> bool {
        self.entries().remove(&Token::digest(&token.0)).is_some()
    }

    /// Revoke every token issued for `room`. Returns how many were live.
    pub fn revoke_room(&self, room: &str) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.grant.room != *room);
        before - entries.len()
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True if no token is live.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Revoke everything.
    pub fn clear(&self) {
        self.entries().clear();
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TokenDigest, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
