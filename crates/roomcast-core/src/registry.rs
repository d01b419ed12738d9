//! Room registry: the authoritative record of rooms and their members.
//!
//! ## Responsibilities
//!
//! - Room lifecycle: create, join, leave, evict, explicit close, teardown
//! - Admission checks (name, password, capacity) before any token is minted
//! - Relay authorization: token + source address → fan-out target list
//! - Liveness: failure counters and the idle/failure sweep
//!
//! ## Locking
//!
//! ```text
//! rooms: RwLock<HashMap<RoomName, Arc<Mutex<Room>>>>   (1)
//!   └─ Mutex<Room>                                      (2)
//!        └─ endpoints: Mutex<EndpointIndex>             (3)
//! tokens: TokenRegistry                                 (leaf)
//! ```
//!
//! Locks are taken in the numbered order. A room is marked `closed` under its
//! own lock while the map write lock is held and only then unlinked, so a
//! join that cloned the `Arc` before the unlink sees `closed` and reports the
//! room as gone. Anything that can destroy a room takes the map write lock
//! first; the datagram path only ever takes the read lock.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use roomcast_proto::{MAX_PASSWORD_SIZE, Role, validate_username};

use crate::{
    env::Environment,
    error::{RelayReject, RoomError},
    room::{Member, MemberId, PasswordHash, Room, RoomName, SALT_SIZE},
    token::{Token, TokenGrant, TokenRegistry},
};

/// Default maximum members per room.
pub const DEFAULT_MAX_MEMBERS: usize = 32;

/// Room registry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Capacity of every new room, host included.
    pub max_members: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self { max_members: DEFAULT_MAX_MEMBERS }
    }
}

/// Outcome of a successful create or join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Room joined or created.
    pub room: RoomName,
    /// New member's identity.
    pub member: MemberId,
    /// Role granted.
    pub role: Role,
    /// Capability token for the data channel.
    pub token: Token,
    /// Host's username.
    pub host_username: String,
    /// Members after admission.
    pub participant_count: usize,
}

/// Why a member left its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureReason {
    /// Explicit leave.
    Left,
    /// Explicit eviction.
    Evicted,
    /// No valid datagram within the idle timeout.
    Idle,
    /// Too many consecutive rejected datagrams.
    Failures,
    /// The room was destroyed around this member.
    RoomClosed,
    /// The control transaction that admitted the member did not complete.
    Rollback,
}

impl std::fmt::Display for DepartureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Left => "left",
            Self::Evicted => "evicted",
            Self::Idle => "idle timeout",
            Self::Failures => "too many failures",
            Self::RoomClosed => "room closed",
            Self::Rollback => "rolled back",
        };
        f.write_str(reason)
    }
}

/// A member removed from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Former member.
    pub member: MemberId,
    /// Its username.
    pub username: String,
    /// Its role.
    pub role: Role,
    /// Last known data-channel endpoint.
    pub endpoint: Option<SocketAddr>,
    /// Why it left.
    pub reason: DepartureReason,
}

/// Result of removing a member.
///
/// When `room_closed` is set, `departures` lists every member of the room,
/// the one whose removal triggered the close first. Their endpoints are
/// captured before anything is torn down so the caller can still notify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    /// Room the members were removed from.
    pub room: RoomName,
    /// Removed members.
    pub departures: Vec<Departure>,
    /// True if the room was destroyed.
    pub room_closed: bool,
}

/// Stable copy of the targets for one relayed datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fanout {
    /// Room the datagram was addressed to.
    pub room: RoomName,
    /// Sending member.
    pub sender: MemberId,
    /// Endpoints of every other member that has registered one.
    pub targets: Vec<SocketAddr>,
}

/// Read-only view of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Room name.
    pub name: RoomName,
    /// Host's username.
    pub host_username: String,
    /// `(id, username, role)` in admission order.
    pub members: Vec<(MemberId, String, Role)>,
    /// True if joining requires a password.
    pub has_password: bool,
    /// Configured capacity.
    pub capacity: usize,
}

/// Non-owning `endpoint → room → member` back-references.
type EndpointIndex = HashMap<SocketAddr, HashMap<RoomName, MemberId>>;

type RoomHandle = Arc<Mutex<Room>>;

/// Registry of live rooms.
pub struct RoomRegistry<E: Environment> {
    env: E,
    config: RoomConfig,
    rooms: RwLock<HashMap<RoomName, RoomHandle>>,
    endpoints: Mutex<EndpointIndex>,
    tokens: TokenRegistry<E>,
    next_member: AtomicU64,
}

impl<E: Environment> RoomRegistry<E> {
    /// Create an empty registry.
    pub fn new(env: E, config: RoomConfig) -> Self {
        Self {
            tokens: TokenRegistry::new(env.clone()),
            env,
            config,
            rooms: RwLock::new(HashMap::new()),
            endpoints: Mutex::new(HashMap::new()),
            next_member: AtomicU64::new(1),
        }
    }

    /// Token registry backing this room registry.
    pub fn tokens(&self) -> &TokenRegistry<E> {
        &self.tokens
    }

    /// Registry configuration.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Create a room with `username` as its host.
    ///
    /// An empty password is the same as none.
    ///
    /// # Errors
    ///
    /// - `InvalidName` / `InvalidUsername` / `InvalidPassword` on validation
    /// - `RoomExists` if a live room has that name
    /// - `Entropy` if no token or salt could be generated
    pub fn create(
        &self,
        name: &str,
        username: &str,
        password: Option<&str>,
        ip: IpAddr,
    ) -> Result<Admission, RoomError> {
        let name = RoomName::new(name)?;
        check_username(username)?;
        let password = check_password(password)?;

        let mut rooms = self.rooms_write();
        if rooms.contains_key(name.as_str()) {
            return Err(RoomError::RoomExists(name.to_string()));
        }

        let password = match password {
            Some(password) => {
                let mut salt = [0u8; SALT_SIZE];
                self.env.random_bytes(&mut salt)?;
                Some(PasswordHash::new(password, salt))
            },
            None => None,
        };

        let member = self.next_member_id();
        let token = self.tokens.issue(name.clone(), ip, member, Role::Host)?;
        let now = self.env.now();

        let room = Room {
            name: name.clone(),
            password,
            host: member,
            members: vec![Member {
                id: member,
                username: username.to_owned(),
                role: Role::Host,
                ip,
                endpoint: None,
                last_activity: now,
                failures: 0,
                token: token.clone(),
            }],
            created_at: now,
            capacity: self.config.max_members,
            closed: false,
        };
        rooms.insert(name.clone(), Arc::new(Mutex::new(room)));

        tracing::info!("room {} created by {} ({})", name, username, member);

        Ok(Admission {
            room: name,
            member,
            role: Role::Host,
            token,
            host_username: username.to_owned(),
            participant_count: 1,
        })
    }

    /// Join an existing room as a participant.
    ///
    /// A password supplied for a room that has none is ignored.
    ///
    /// # Errors
    ///
    /// - `InvalidName` / `InvalidUsername` / `InvalidPassword` on validation
    /// - `RoomNotFound` if absent or being destroyed
    /// - `Unauthorized` on password mismatch
    /// - `RoomFull` at capacity
    /// - `UsernameTaken` if another member already uses `username`
    /// - `Entropy` if no token could be generated
    pub fn join(
        &self,
        name: &str,
        username: &str,
        password: Option<&str>,
        ip: IpAddr,
    ) -> Result<Admission, RoomError> {
        let name = RoomName::new(name)?;
        check_username(username)?;
        let password = check_password(password)?;

        let handle = self
            .room_handle(name.as_str())
            .ok_or_else(|| RoomError::RoomNotFound(name.to_string()))?;
        let mut room = lock(&handle);

        if room.closed {
            return Err(RoomError::RoomNotFound(name.to_string()));
        }
        if let Some(hash) = &room.password {
            if !password.is_some_and(|candidate| hash.verify(candidate)) {
                tracing::warn!("join to {} rejected: bad password", name);
                return Err(RoomError::Unauthorized);
            }
        }
        if room.is_full() {
            return Err(RoomError::RoomFull { room: name.to_string(), capacity: room.capacity });
        }
        if room.has_username(username) {
            return Err(RoomError::UsernameTaken(username.to_owned()));
        }

        let member = self.next_member_id();
        let token = self.tokens.issue(name.clone(), ip, member, Role::Participant)?;

        room.members.push(Member {
            id: member,
            username: username.to_owned(),
            role: Role::Participant,
            ip,
            endpoint: None,
            last_activity: self.env.now(),
            failures: 0,
            token: token.clone(),
        });

        tracing::info!("{} ({}) joined room {}", username, member, name);

        Ok(Admission {
            room: name,
            member,
            role: Role::Participant,
            token,
            host_username: room.host_username().to_owned(),
            participant_count: room.members.len(),
        })
    }

    /// Remove the member bound to `endpoint` in `room`. Idempotent.
    pub fn leave(&self, room: &str, endpoint: SocketAddr) -> Option<Removal> {
        let member = self.member_at(room, endpoint)?;
        self.remove_member(room, member, DepartureReason::Left)
    }

    /// Evict the member bound to `endpoint` in `room`. Idempotent.
    pub fn evict(&self, room: &str, endpoint: SocketAddr) -> Option<Removal> {
        let member = self.member_at(room, endpoint)?;
        self.remove_member(room, member, DepartureReason::Evicted)
    }

    /// Remove a member by identity.
    ///
    /// Removing the host or the last member destroys the room and revokes
    /// every token issued for it. Returns `None` if the member (or room) is
    /// already gone.
    pub fn remove_member(
        &self,
        room: &str,
        member: MemberId,
        reason: DepartureReason,
    ) -> Option<Removal> {
        let mut rooms = self.rooms_write();
        let handle = rooms.get(room).cloned()?;
        let mut guard = lock(&handle);

        let removal = self.remove_locked(&mut guard, member, reason)?;
        if removal.room_closed {
            rooms.remove(room);
        }
        Some(removal)
    }

    /// Close a room on behalf of its host.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `token` is a live host token for `room` presented
    /// from its bound address; `RoomNotFound` if the room vanished meanwhile.
    pub fn close(&self, room: &str, token: &[u8], ip: IpAddr) -> Result<Removal, RoomError> {
        let grant = self.tokens.validate(token, ip).ok_or(RoomError::Unauthorized)?;
        if grant.room != *room || grant.role != Role::Host {
            return Err(RoomError::Unauthorized);
        }

        self.remove_member(room, grant.member, DepartureReason::Left)
            .ok_or_else(|| RoomError::RoomNotFound(room.to_owned()))
    }

    /// Authorize a datagram and compute its fan-out.
    ///
    /// On success the sender's activity time is refreshed, its failure
    /// counter reset and its endpoint (re)learned from `source`.
    ///
    /// # Errors
    ///
    /// `InvalidToken`, `RoomMismatch` or `RoomGone`. Failure counters are not
    /// touched here; see [`Self::record_failure`].
    pub fn authorize(
        &self,
        room: &str,
        token: &[u8],
        source: SocketAddr,
    ) -> Result<Fanout, RelayReject> {
        let grant = self.tokens.validate(token, source.ip()).ok_or(RelayReject::InvalidToken)?;
        if grant.room != *room {
            return Err(RelayReject::RoomMismatch {
                granted: grant.room.to_string(),
                claimed: room.to_owned(),
            });
        }

        let handle =
            self.room_handle(room).ok_or_else(|| RelayReject::RoomGone(room.to_owned()))?;
        let mut guard = lock(&handle);
        if guard.closed {
            return Err(RelayReject::RoomGone(room.to_owned()));
        }

        let now = self.env.now();
        let name = guard.name.clone();
        let member = guard.member_mut(grant.member).ok_or(RelayReject::InvalidToken)?;
        member.last_activity = now;
        member.failures = 0;

        let previous = member.endpoint.replace(source);
        if previous != Some(source) {
            tracing::debug!("{} in {} bound to {}", grant.member, name, source);
            self.rebind_endpoint(&mut guard, &name, grant.member, previous, source);
        }

        let targets = guard
            .endpoints_except(grant.member)
            .into_iter()
            .filter(|target| *target != source)
            .collect();

        Ok(Fanout { room: name, sender: grant.member, targets })
    }

    /// Charge a rejected datagram to whoever is bound to `source`.
    ///
    /// With a room name in which `source` is bound, only that membership is
    /// charged. Otherwise (no room decoded, or a room the sender is not in)
    /// every membership bound to `source` is. Unknown sources change nothing.
    /// Returns the number of members charged.
    pub fn record_failure(&self, source: SocketAddr, room: Option<&str>) -> usize {
        let targets: Vec<(RoomName, MemberId)> = {
            let index = self.index();
            let Some(bound) = index.get(&source) else {
                return 0;
            };
            match room.and_then(|room| bound.get_key_value(room)) {
                Some((name, member)) => vec![(name.clone(), *member)],
                None => bound.iter().map(|(name, member)| (name.clone(), *member)).collect(),
            }
        };

        let mut charged = 0;
        for (room, member) in targets {
            let Some(handle) = self.room_handle(room.as_str()) else {
                continue;
            };
            let mut guard = lock(&handle);
            if let Some(member) = guard.member_mut(member) {
                member.failures = member.failures.saturating_add(1);
                charged += 1;
                tracing::debug!(
                    "failure {} for {} in {} from {}",
                    member.failures,
                    member.id,
                    room,
                    source
                );
            }
        }
        charged
    }

    /// Evict members idle for longer than `idle_timeout` or with more than
    /// `max_failures` consecutive failures.
    ///
    /// Runs under the map write lock, so the sweep is atomic with respect to
    /// create and join.
    pub fn sweep(&self, now: Instant, idle_timeout: Duration, max_failures: u32) -> Vec<Removal> {
        let mut rooms = self.rooms_write();
        let mut removals = Vec::new();
        let mut closed = Vec::new();

        for (name, handle) in rooms.iter() {
            let mut guard = lock(handle);

            let expired: Vec<(MemberId, DepartureReason)> = guard
                .members
                .iter()
                .filter_map(|m| {
                    if now.saturating_duration_since(m.last_activity) > idle_timeout {
                        Some((m.id, DepartureReason::Idle))
                    } else if m.failures > max_failures {
                        Some((m.id, DepartureReason::Failures))
                    } else {
                        None
                    }
                })
                .collect();

            for (member, reason) in expired {
                let Some(removal) = self.remove_locked(&mut guard, member, reason) else {
                    continue;
                };
                let room_closed = removal.room_closed;
                removals.push(removal);
                if room_closed {
                    closed.push(name.clone());
                    break;
                }
            }
        }

        for name in closed {
            rooms.remove(&name);
        }
        removals
    }

    /// Destroy every room and revoke every token. Idempotent.
    ///
    /// Returns the number of rooms destroyed.
    pub fn clear(&self) -> usize {
        let mut rooms = self.rooms_write();
        let count = rooms.len();
        for handle in rooms.values() {
            let mut guard = lock(handle);
            guard.closed = true;
            guard.members.clear();
        }
        rooms.clear();
        self.index().clear();
        self.tokens.clear();

        if count > 0 {
            tracing::info!("registry cleared, {} rooms destroyed", count);
        }
        count
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms_read().len()
    }

    /// Members of `room`, or `None` if it does not exist.
    pub fn member_count(&self, room: &str) -> Option<usize> {
        let handle = self.room_handle(room)?;
        let guard = lock(&handle);
        (!guard.closed).then_some(guard.members.len())
    }

    /// True if `room` exists.
    pub fn has_room(&self, room: &str) -> bool {
        self.rooms_read().contains_key(room)
    }

    /// Names of every live room, sorted.
    pub fn room_names(&self) -> Vec<RoomName> {
        let mut names: Vec<_> = self.rooms_read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of one room.
    pub fn snapshot(&self, room: &str) -> Option<RoomSnapshot> {
        let handle = self.room_handle(room)?;
        let guard = lock(&handle);
        if guard.closed {
            return None;
        }
        Some(RoomSnapshot {
            name: guard.name.clone(),
            host_username: guard.host_username().to_owned(),
            members: guard.members.iter().map(|m| (m.id, m.username.clone(), m.role)).collect(),
            has_password: guard.password.is_some(),
            capacity: guard.capacity,
        })
    }

    /// Member bound to `endpoint` in `room`.
    pub fn member_at(&self, room: &str, endpoint: SocketAddr) -> Option<MemberId> {
        self.index().get(&endpoint)?.get(room).copied()
    }

    /// Resolve a token without touching room state.
    pub fn grant(&self, token: &[u8], ip: IpAddr) -> Option<TokenGrant> {
        self.tokens.validate(token, ip)
    }

    /// Remove `member` from a locked room. The caller unlinks the room from
    /// the map if the returned removal closed it.
    fn remove_locked(
        &self,
        room: &mut Room,
        member: MemberId,
        reason: DepartureReason,
    ) -> Option<Removal> {
        if room.closed {
            return None;
        }
        let position = room.members.iter().position(|m| m.id == member)?;
        let destroy = member == room.host || room.members.len() == 1;

        let departures: Vec<Departure> = if destroy {
            room.closed = true;
            let removed = room.members.remove(position);
            let mut departures = vec![departure(&removed, reason)];
            departures.extend(
                room.members.drain(..).map(|m| departure(&m, DepartureReason::RoomClosed)),
            );
            departures
        } else {
            let removed = room.members.remove(position);
            self.tokens.revoke(&removed.token);
            vec![departure(&removed, reason)]
        };

        {
            let mut index = self.index();
            for departed in &departures {
                if let Some(endpoint) = departed.endpoint {
                    unbind(&mut index, endpoint, room.name.as_str());
                }
            }
        }

        if destroy {
            let revoked = self.tokens.revoke_room(room.name.as_str());
            tracing::info!(
                "room {} destroyed ({} departed, {} tokens revoked, reason: {})",
                room.name,
                departures.len(),
                revoked,
                reason
            );
        } else {
            tracing::info!("{} left room {} ({})", member, room.name, reason);
        }

        Some(Removal { room: room.name.clone(), departures, room_closed: destroy })
    }

    fn rebind_endpoint(
        &self,
        room: &mut Room,
        name: &RoomName,
        member: MemberId,
        previous: Option<SocketAddr>,
        endpoint: SocketAddr,
    ) {
        let mut index = self.index();
        if let Some(previous) = previous {
            unbind(&mut index, previous, name.as_str());
        }

        // Another member of this room previously bound to the same endpoint
        // loses the binding; one endpoint maps to at most one member per room.
        let displaced = index.entry(endpoint).or_default().insert(name.clone(), member);
        if let Some(displaced) = displaced.filter(|id| *id != member) {
            if let Some(other) = room.member_mut(displaced) {
                other.endpoint = None;
            }
        }
    }

    fn next_member_id(&self) -> MemberId {
        MemberId(self.next_member.fetch_add(1, Ordering::Relaxed))
    }

    fn room_handle(&self, room: &str) -> Option<RoomHandle> {
        self.rooms_read().get(room).cloned()
    }

    fn rooms_read(&self) -> RwLockReadGuard<'_, HashMap<RoomName, RoomHandle>> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rooms_write(&self) -> RwLockWriteGuard<'_, HashMap<RoomName, RoomHandle>> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn index(&self) -> MutexGuard<'_, EndpointIndex> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(handle: &RoomHandle) -> MutexGuard<'_, Room> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unbind(index: &mut EndpointIndex, endpoint: SocketAddr, room: &str) {
    if let Some(bound) = index.get_mut(&endpoint) {
        bound.remove(room);
        if bound.is_empty() {
            index.remove(&endpoint);
        }
    }
}

fn departure(member: &Member, reason: DepartureReason) -> Departure {
    Departure {
        member: member.id,
        username: member.username.clone(),
        role: member.role,
        endpoint: member.endpoint,
        reason,
    }
}

fn check_username(username: &str) -> Result<(), RoomError> {
    if validate_username(username) { Ok(()) } else { Err(RoomError::InvalidUsername) }
}

fn check_password(password: Option<&str>) -> Result<Option<&str>, RoomError> {
    match password {
        Some(p) if p.len() > MAX_PASSWORD_SIZE => Err(RoomError::InvalidPassword),
        Some(p) if !p.is_empty() => Ok(Some(p)),
        _ => Ok(None),
    }
}
