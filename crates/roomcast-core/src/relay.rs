//! Relay engine: the data-plane half of the core.
//!
//! ## Responsibilities
//!
//! - Validate each datagram against the token and room registries
//! - Fan a valid message out to every other member of its room
//! - Charge rejected datagrams to the member bound to the source endpoint
//! - Periodically evict idle and failing members
//!
//! ## Design
//!
//! - Action-based: no socket here; the runtime executes [`RelayAction`]s
//! - Silent drops: rejected datagrams never produce a reply, so the relay can
//!   not be used to reflect traffic at a spoofed address
//! - Fan-out targets are a copy taken under the room lock; sending happens
//!   after it is released

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use roomcast_proto::{RelayFrame, encode_outbound};

use crate::{
    env::Environment,
    error::RelayReject,
    registry::{DepartureReason, Removal, RoomRegistry},
    room::{MemberId, RoomName},
};

/// Message sent to every member of a room that is being destroyed.
pub const ROOM_CLOSED_NOTICE: &[u8] = b"*** room closed ***";

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default consecutive failures tolerated before eviction.
pub const DEFAULT_MAX_FAILURES: u32 = 8;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Relay engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Members silent for longer than this are evicted.
    pub idle_timeout: Duration,
    /// Members with more consecutive failures than this are evicted.
    pub max_failures: u32,
    /// How often the runtime runs [`RelayEngine::sweep`].
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_failures: DEFAULT_MAX_FAILURES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Actions returned by the engine for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send a datagram.
    Send {
        /// Destination endpoint.
        to: SocketAddr,
        /// Datagram bytes.
        payload: Bytes,
    },

    /// A datagram was dropped. Nothing is sent back.
    Drop {
        /// Source of the datagram.
        from: SocketAddr,
        /// Why it was dropped.
        reason: RelayReject,
    },

    /// A member was removed by the sweep.
    Evicted {
        /// Room it was removed from.
        room: RoomName,
        /// Former member.
        member: MemberId,
        /// Its username.
        username: String,
        /// Why it was removed.
        reason: DepartureReason,
    },

    /// A room was destroyed by the sweep.
    RoomClosed {
        /// Destroyed room.
        room: RoomName,
    },
}

/// Relay engine.
pub struct RelayEngine<E: Environment> {
    env: E,
    registry: Arc<RoomRegistry<E>>,
    config: RelayConfig,
}

impl<E: Environment> RelayEngine<E> {
    /// Create an engine over a shared registry.
    pub fn new(env: E, registry: Arc<RoomRegistry<E>>, config: RelayConfig) -> Self {
        Self { env, registry, config }
    }

    /// Engine configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Registry this engine relays for.
    pub fn registry(&self) -> &Arc<RoomRegistry<E>> {
        &self.registry
    }

    /// Process one inbound datagram.
    ///
    /// Returns one `Send` per fan-out target, nothing for a keep-alive (empty
    /// message), or a single `Drop` for a rejected datagram.
    pub fn handle_datagram(&self, datagram: &[u8], source: SocketAddr) -> Vec<RelayAction> {
        let frame = match RelayFrame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                self.registry.record_failure(source, RelayFrame::peek_room(datagram));
                return vec![RelayAction::Drop { from: source, reason: e.into() }];
            },
        };

        let fanout = match self.registry.authorize(&frame.room, &frame.token, source) {
            Ok(fanout) => fanout,
            Err(reason) => {
                self.registry.record_failure(source, Some(&frame.room));
                return vec![RelayAction::Drop { from: source, reason }];
            },
        };

        if frame.message.is_empty() {
            tracing::trace!("keep-alive from {} in {}", fanout.sender, fanout.room);
            return Vec::new();
        }

        let payload = match encode_outbound(&frame.message) {
            Ok(payload) => payload,
            Err(e) => return vec![RelayAction::Drop { from: source, reason: e.into() }],
        };

        tracing::debug!(
            "relaying {} bytes from {} to {} members of {}",
            payload.len(),
            fanout.sender,
            fanout.targets.len(),
            fanout.room
        );

        fanout
            .targets
            .into_iter()
            .map(|to| RelayAction::Send { to, payload: payload.clone() })
            .collect()
    }

    /// Evict idle and failing members.
    ///
    /// For a destroyed room the closing notices come first, addressed to
    /// every member that had an endpoint, followed by the eviction records.
    pub fn sweep(&self) -> Vec<RelayAction> {
        let removals = self.registry.sweep(
            self.env.now(),
            self.config.idle_timeout,
            self.config.max_failures,
        );

        removals.into_iter().flat_map(removal_actions).collect()
    }
}

/// Actions announcing one removal.
pub fn removal_actions(removal: Removal) -> Vec<RelayAction> {
    let mut actions = Vec::new();

    if removal.room_closed {
        let notice = Bytes::from_static(ROOM_CLOSED_NOTICE);
        actions.extend(
            removal
                .departures
                .iter()
                .filter_map(|d| d.endpoint)
                .map(|to| RelayAction::Send { to, payload: notice.clone() }),
        );
    }

    for departure in removal.departures {
        if departure.reason != DepartureReason::RoomClosed {
            tracing::info!(
                "evicted {} ({}) from {}: {}",
                departure.username,
                departure.member,
                removal.room,
                departure.reason
            );
        }
        actions.push(RelayAction::Evicted {
            room: removal.room.clone(),
            member: departure.member,
            username: departure.username,
            reason: departure.reason,
        });
    }

    if removal.room_closed {
        actions.push(RelayAction::RoomClosed { room: removal.room });
    }
    actions
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use roomcast_proto::{ProtocolError, RelayFrame};

    use super::*;
    use crate::{registry::RoomConfig, test_env::TestEnv};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn engine() -> (TestEnv, RelayEngine<TestEnv>) {
        let env = TestEnv::new();
        let registry = Arc::new(RoomRegistry::new(env.clone(), RoomConfig::default()));
        (env.clone(), RelayEngine::new(env, registry, RelayConfig::default()))
    }

    fn datagram(room: &str, token: &[u8], message: &[u8]) -> Bytes {
        RelayFrame::new(room, token.to_vec(), message.to_vec()).encode().expect("encode")
    }

    #[test]
    fn garbage_is_dropped_without_reply() {
        let (_, engine) = engine();
        let actions = engine.handle_datagram(&[0xff], addr(1));

        assert!(matches!(
            actions.as_slice(),
            [RelayAction::Drop {
                reason: RelayReject::Malformed(ProtocolError::TooShort { .. }),
                ..
            }]
        ));
    }

    #[test]
    fn keepalive_produces_no_fanout() {
        let (_, engine) = engine();
        let host = engine.registry().create("lobby", "alice", None, addr(1).ip()).expect("create");
        engine.registry().join("lobby", "bob", None, addr(2).ip()).expect("join");

        let actions =
            engine.handle_datagram(&datagram("lobby", host.token.as_bytes(), b""), addr(1));
        assert!(actions.is_empty());
    }

    #[test]
    fn message_excludes_sender() {
        let (_, engine) = engine();
        let registry = engine.registry();
        let alice = registry.create("lobby", "alice", None, addr(1).ip()).expect("create");
        let bob = registry.join("lobby", "bob", None, addr(2).ip()).expect("join");

        // Bob registers his endpoint first.
        engine.handle_datagram(&datagram("lobby", bob.token.as_bytes(), b""), addr(2));
        let actions =
            engine.handle_datagram(&datagram("lobby", alice.token.as_bytes(), b"hi"), addr(1));

        assert_eq!(
            actions,
            vec![RelayAction::Send { to: addr(2), payload: Bytes::from_static(b"hi") }]
        );
    }

    #[test]
    fn wrong_room_counts_as_failure() {
        let (_, engine) = engine();
        let registry = engine.registry();
        let alice = registry.create("lobby", "alice", None, addr(1).ip()).expect("create");
        registry.create("attic", "carol", None, addr(3).ip()).expect("create");

        engine.handle_datagram(&datagram("lobby", alice.token.as_bytes(), b""), addr(1));
        let actions =
            engine.handle_datagram(&datagram("attic", alice.token.as_bytes(), b"x"), addr(1));

        assert!(matches!(
            actions.as_slice(),
            [RelayAction::Drop { reason: RelayReject::RoomMismatch { .. }, .. }]
        ));

        let max_failures = engine.config().max_failures;
        for _ in 0..max_failures {
            engine.handle_datagram(&datagram("attic", alice.token.as_bytes(), b"x"), addr(1));
        }
        let actions = engine.sweep();
        assert!(actions.iter().any(|a| matches!(
            a,
            RelayAction::Evicted { member, reason: DepartureReason::Failures, .. }
                if *member == alice.member
        )));
        assert!(!registry.has_room("lobby"));
        assert!(registry.has_room("attic"));
    }

    #[test]
    fn malformed_frame_naming_foreign_room_counts_as_failure() {
        let (_, engine) = engine();
        let registry = engine.registry();
        let alice = registry.create("lobby", "alice", None, addr(1).ip()).expect("create");
        registry.create("attic", "carol", None, addr(3).ip()).expect("create");
        engine.handle_datagram(&datagram("lobby", alice.token.as_bytes(), b""), addr(1));

        // Header and room intact, token length past the bound.
        let mut malformed = vec![5, 200];
        malformed.extend_from_slice(b"attic");

        for _ in 0..=engine.config().max_failures {
            let actions = engine.handle_datagram(&malformed, addr(1));
            assert!(matches!(
                actions.as_slice(),
                [RelayAction::Drop { reason: RelayReject::Malformed(_), .. }]
            ));
        }

        let actions = engine.sweep();
        assert!(actions.iter().any(|a| matches!(
            a,
            RelayAction::Evicted { reason: DepartureReason::Failures, .. }
        )));
        assert_eq!(registry.member_count("attic"), Some(1));
    }

    #[test]
    fn sweep_evicts_idle_host_and_notifies_room() {
        let (env, engine) = engine();
        let registry = engine.registry();
        let alice = registry.create("lobby", "alice", None, addr(1).ip()).expect("create");
        let bob = registry.join("lobby", "bob", None, addr(2).ip()).expect("join");

        engine.handle_datagram(&datagram("lobby", alice.token.as_bytes(), b""), addr(1));
        env.advance(Duration::from_secs(40));
        engine.handle_datagram(&datagram("lobby", bob.token.as_bytes(), b""), addr(2));
        env.advance(Duration::from_secs(30));

        let actions = engine.sweep();
        assert!(actions.contains(&RelayAction::Send {
            to: addr(2),
            payload: Bytes::from_static(ROOM_CLOSED_NOTICE),
        }));
        let lobby = RoomName::new("lobby").expect("name");
        assert!(actions.contains(&RelayAction::RoomClosed { room: lobby }));
        assert!(!registry.has_room("lobby"));
        assert!(registry.grant(bob.token.as_bytes(), addr(2).ip()).is_none());
    }
}
