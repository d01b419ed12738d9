//! Fuzz target for the relay engine
//!
//! Drives a registry with real rooms and tokens through arbitrary datagrams,
//! clock advances and sweeps.
//!
//! # Strategy
//!
//! - Datagrams built from a real token, a mangled token or raw bytes
//! - Sources drawn from a small set of endpoints, some of them members
//! - Time advanced in whole seconds, sweeps interleaved
//!
//! # Invariants
//!
//! - NEVER panic on any datagram
//! - A message is never sent back to its sender
//! - A rejected datagram produces exactly one `Drop` and nothing else
//! - Live tokens always equal live members
//! - No room is left empty by a sweep

#![no_main]

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use roomcast_core::{RelayAction, RelayConfig, RelayEngine, RoomConfig, RoomRegistry, Token};
use roomcast_harness::SimEnv;
use roomcast_proto::RelayFrame;

const ROOMS: [&str; 2] = ["alpha", "beta"];
const CLIENTS: u8 = 4;

#[derive(Debug, Arbitrary)]
enum Datagram {
    Valid { client: u8, message: Vec<u8> },
    WrongRoom { client: u8 },
    MangledToken { client: u8, flip: u8 },
    Raw(Vec<u8>),
}

#[derive(Debug, Arbitrary)]
enum Event {
    Receive { datagram: Datagram, from: u8 },
    Advance { secs: u8 },
    Sweep,
}

#[derive(Debug, Arbitrary)]
struct Input {
    seed: u64,
    events: Vec<Event>,
}

fn endpoint(client: u8) -> SocketAddr {
    let client = client % CLIENTS;
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, client + 1)), 40_000 + u16::from(client))
}

struct Client {
    room: &'static str,
    token: Token,
}

fuzz_target!(|input: Input| {
    let env = SimEnv::with_seed(input.seed);
    let registry = Arc::new(RoomRegistry::new(env.clone(), RoomConfig::default()));
    let config = RelayConfig {
        idle_timeout: Duration::from_secs(30),
        max_failures: 3,
        sweep_interval: Duration::from_secs(5),
    };
    let engine = RelayEngine::new(env.clone(), Arc::clone(&registry), config.clone());

    let mut clients = Vec::new();
    for client in 0..CLIENTS {
        let room = ROOMS[usize::from(client) % ROOMS.len()];
        let ip = endpoint(client).ip();
        let username = format!("user-{client}");
        let admission = if client < 2 {
            registry.create(room, &username, None, ip)
        } else {
            registry.join(room, &username, None, ip)
        }
        .expect("setup admission");
        clients.push(Client { room, token: admission.token });
    }

    for event in input.events.into_iter().take(256) {
        match event {
            Event::Receive { datagram, from } => {
                let source = endpoint(from);
                let bytes = match datagram {
                    Datagram::Valid { client, message } => {
                        let c = &clients[usize::from(client % CLIENTS)];
                        encode(c.room, c.token.as_bytes(), message)
                    },
                    Datagram::WrongRoom { client } => {
                        let c = &clients[usize::from(client % CLIENTS)];
                        let other = ROOMS.iter().find(|r| **r != c.room).copied().unwrap_or("x");
                        encode(other, c.token.as_bytes(), Vec::new())
                    },
                    Datagram::MangledToken { client, flip } => {
                        let c = &clients[usize::from(client % CLIENTS)];
                        let mut token = c.token.as_bytes().to_vec();
                        let i = usize::from(flip) % token.len();
                        token[i] ^= 0x01 | flip;
                        encode(c.room, &token, b"x".to_vec())
                    },
                    Datagram::Raw(bytes) => Bytes::from(bytes),
                };

                let actions = engine.handle_datagram(&bytes, source);
                let drops =
                    actions.iter().filter(|a| matches!(a, RelayAction::Drop { .. })).count();
                if drops > 0 {
                    assert_eq!(actions.len(), 1, "a drop must stand alone");
                }
                for action in &actions {
                    if let RelayAction::Send { to, .. } = action {
                        assert_ne!(*to, source, "message echoed to its sender");
                    }
                }
            },
            Event::Advance { secs } => env.advance(Duration::from_secs(u64::from(secs))),
            Event::Sweep => {
                let _ = engine.sweep();
                for room in registry.room_names() {
                    let snapshot = registry.snapshot(room.as_str()).expect("listed room exists");
                    assert!(!snapshot.members.is_empty(), "empty room survived a sweep");
                }
            },
        }

        let members: usize =
            registry.room_names().iter().filter_map(|r| registry.member_count(r.as_str())).sum();
        assert_eq!(registry.tokens().len(), members, "tokens diverged from members");
    }
});

fn encode(room: &str, token: &[u8], message: Vec<u8>) -> Bytes {
    let room = room.to_string();
    let max = RelayFrame::max_message_len(room.len(), token.len());
    let mut message = message;
    message.truncate(max);
    RelayFrame::new(room, Bytes::copy_from_slice(token), message)
        .encode()
        .unwrap_or_else(|_| Bytes::new())
}
