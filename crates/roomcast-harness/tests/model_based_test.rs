//! Model-based property tests.
//!
//! Random operation sequences are applied to the reference model and to the
//! real registry + relay engine; results and observable state must agree.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelWorld    RealWorld      Compare
//!      (reference)   (SimEnv)       Results
//! ```

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use proptest::prelude::*;
use roomcast_core::{
    ControlSession, RelayAction, RelayConfig, RelayEngine, RoomConfig, RoomRegistry, Token,
};
use roomcast_harness::{
    ClientId, IDLE_TIMEOUT_SECS, MODEL_CAPACITY, ModelRoomId, ModelWorld, Operation,
    OperationError, OperationResult, SimEnv, SmallMessage,
};
use roomcast_proto::{ControlFrame, Operation as ControlOp, RelayFrame, RoomRequest, StatusCode};

fn room_name(room: ModelRoomId) -> String {
    format!("room-{room}")
}

fn password(key: u8) -> String {
    format!("pw-{key}")
}

fn client_ip(client: ClientId) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, client + 1))
}

fn client_endpoint(client: ClientId) -> SocketAddr {
    SocketAddr::new(client_ip(client), 40_000 + u16::from(client))
}

/// Real system wrapper that mirrors `ModelWorld`'s interface.
struct RealWorld {
    num_clients: usize,
    env: SimEnv,
    registry: Arc<RoomRegistry<SimEnv>>,
    engine: RelayEngine<SimEnv>,
    /// Latest token each client received per room. May be stale.
    tokens: HashMap<(ClientId, ModelRoomId), Token>,
}

impl RealWorld {
    fn new(num_clients: usize, seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        let registry =
            Arc::new(RoomRegistry::new(env.clone(), RoomConfig { max_members: MODEL_CAPACITY }));
        let config = RelayConfig {
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
            // The model has no failure counters.
            max_failures: u32::MAX,
            ..RelayConfig::default()
        };
        let engine = RelayEngine::new(env.clone(), Arc::clone(&registry), config);

        Self { num_clients, env, registry, engine, tokens: HashMap::new() }
    }

    fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::CreateRoom { client_id, room_id, password } => {
                self.transact(ControlOp::Create, *client_id, *room_id, *password)
            },
            Operation::JoinRoom { client_id, room_id, password } => {
                self.transact(ControlOp::Join, *client_id, *room_id, *password)
            },
            Operation::SendMessage { client_id, room_id, content } => {
                self.send(*client_id, ModelWorld::room(*room_id), content)
            },
            Operation::LeaveRoom { client_id, room_id } => {
                self.leave(*client_id, ModelWorld::room(*room_id))
            },
            Operation::AdvanceTime { secs } => {
                self.env.advance(Duration::from_secs(u64::from(*secs)));
                OperationResult::Ok
            },
            Operation::Sweep => {
                self.engine.sweep();
                OperationResult::Ok
            },
        }
    }

    /// Full control transaction, then a registration keep-alive.
    fn transact(
        &mut self,
        op: ControlOp,
        client: ClientId,
        room_id: ModelRoomId,
        key: Option<u8>,
    ) -> OperationResult {
        if usize::from(client) >= self.num_clients {
            return OperationResult::Error(OperationError::InvalidClient);
        }
        let room = ModelWorld::room(room_id);

        let mut request = RoomRequest::new(format!("user-{client}"));
        if let Some(key) = key {
            request = request.with_password(password(key));
        }
        let frame = ControlFrame::request(room_name(room), op, &request).expect("request");

        let mut session = ControlSession::new(client_ip(client));
        let response = session.handle_request(&frame, &self.registry).expect("response");
        let status = response.status_reply().expect("reply").status;

        let error = match status {
            StatusCode::Success => None,
            StatusCode::RoomExists => Some(OperationError::RoomAlreadyExists),
            StatusCode::RoomNotFound => Some(OperationError::RoomNotFound),
            StatusCode::RoomFull => Some(OperationError::RoomFull),
            StatusCode::Unauthorized => Some(OperationError::Unauthorized),
            StatusCode::InvalidUsername => Some(OperationError::UsernameTaken),
            other => unreachable!("unexpected status {other}"),
        };
        if let Some(error) = error {
            return OperationResult::Error(error);
        }

        let completion = session.completion().expect("encode").expect("completion");
        let grant = completion.grant().expect("grant");
        session.finish();

        let token = Token::from_slice(&grant.token).expect("token size");
        self.tokens.insert((client, room), token);
        self.datagram(client, room, &[]);
        OperationResult::Ok
    }

    fn send(
        &mut self,
        client: ClientId,
        room: ModelRoomId,
        content: &SmallMessage,
    ) -> OperationResult {
        if usize::from(client) >= self.num_clients {
            return OperationResult::Error(OperationError::InvalidClient);
        }
        if !self.tokens.contains_key(&(client, room)) {
            return OperationResult::Error(OperationError::NotMember);
        }

        let actions = self.datagram(client, room, &content.to_bytes());
        if actions.iter().any(|a| matches!(a, RelayAction::Drop { .. })) {
            return OperationResult::Error(OperationError::NotMember);
        }

        let mut recipients: Vec<ClientId> = actions
            .iter()
            .filter_map(|a| match a {
                RelayAction::Send { to, .. } => Some(to.port() - 40_000),
                _ => None,
            })
            .map(|port| ClientId::try_from(port).expect("client port"))
            .collect();
        recipients.sort_unstable();
        OperationResult::Delivered(recipients)
    }

    fn leave(&mut self, client: ClientId, room: ModelRoomId) -> OperationResult {
        if usize::from(client) >= self.num_clients {
            return OperationResult::Error(OperationError::InvalidClient);
        }
        match self.registry.leave(&room_name(room), client_endpoint(client)) {
            Some(_) => OperationResult::Ok,
            None => OperationResult::Error(OperationError::NotMember),
        }
    }

    fn datagram(&self, client: ClientId, room: ModelRoomId, message: &[u8]) -> Vec<RelayAction> {
        let token = &self.tokens[&(client, room)];
        let bytes = RelayFrame::new(room_name(room), token.as_bytes().to_vec(), message.to_vec())
            .encode()
            .expect("encode datagram");
        self.engine.handle_datagram(&bytes, client_endpoint(client))
    }

    fn observable_rooms(&self) -> Vec<(ModelRoomId, ClientId, Vec<ClientId>)> {
        let parse = |username: &str| -> ClientId {
            username.trim_start_matches("user-").parse().expect("username")
        };

        (0..roomcast_harness::model::NUM_ROOMS)
            .filter_map(|room| {
                let snapshot = self.registry.snapshot(&room_name(room))?;
                let mut members: Vec<_> =
                    snapshot.members.iter().map(|(_, username, _)| parse(username)).collect();
                members.sort_unstable();
                Some((room, parse(&snapshot.host_username), members))
            })
            .collect()
    }
}

fn small_message_strategy() -> impl Strategy<Value = SmallMessage> {
    (any::<u8>(), any::<u8>()).prop_map(|(seed, size_class)| SmallMessage { seed, size_class })
}

/// Strategy for generating operations with valid client IDs.
fn operation_strategy(num_clients: u8) -> impl Strategy<Value = Operation> {
    let client_id = 0..num_clients;
    let room_id = 0..roomcast_harness::model::NUM_ROOMS;
    let password = prop::option::weighted(0.2, 0..2u8);

    prop_oneof![
        2 => (client_id.clone(), room_id.clone(), password.clone()).prop_map(|(c, r, p)| {
            Operation::CreateRoom { client_id: c, room_id: r, password: p }
        }),
        3 => (client_id.clone(), room_id.clone(), password).prop_map(|(c, r, p)| {
            Operation::JoinRoom { client_id: c, room_id: r, password: p }
        }),
        5 => (client_id.clone(), room_id.clone(), small_message_strategy()).prop_map(
            |(c, r, content)| Operation::SendMessage { client_id: c, room_id: r, content }
        ),
        1 => (client_id, room_id).prop_map(|(c, r)| Operation::LeaveRoom {
            client_id: c,
            room_id: r
        }),
        1 => (0..40u8).prop_map(|secs| Operation::AdvanceTime { secs }),
        1 => Just(Operation::Sweep),
    ]
}

proptest! {
    /// Every operation returns the same result in model and real system, and
    /// membership agrees after the run.
    #[test]
    fn prop_model_matches_real(
        seed in any::<u64>(),
        num_clients in 2..5usize,
        ops in prop::collection::vec(operation_strategy(4), 0..60)
    ) {
        let mut model = ModelWorld::new(num_clients);
        let mut real = RealWorld::new(num_clients, seed);

        for (i, op) in ops.into_iter().enumerate() {
            let op = op.clamp_client(num_clients);

            let model_result = model.apply(&op);
            let real_result = real.apply(&op);

            prop_assert_eq!(
                &model_result,
                &real_result,
                "Divergence at operation {}: {:?}",
                i,
                op
            );
        }

        prop_assert_eq!(model.observable_state().rooms, real.observable_rooms());
    }

    /// Live tokens always equal live memberships.
    #[test]
    fn prop_tokens_track_membership(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(4), 0..60)
    ) {
        let mut real = RealWorld::new(4, seed);
        for op in ops {
            real.apply(&op);
        }

        let members: usize = real
            .observable_rooms()
            .iter()
            .map(|(_, _, members)| members.len())
            .sum();
        prop_assert_eq!(real.registry.tokens().len(), members);
    }

    /// A second create of the same room always fails.
    #[test]
    fn prop_create_room_idempotent(client_id in 0..4u8, room_id in any::<ModelRoomId>()) {
        let mut model = ModelWorld::new(4);

        let first = model.apply(&Operation::CreateRoom { client_id, room_id, password: None });
        prop_assert!(first.is_ok());

        let second = model.apply(&Operation::CreateRoom { client_id, room_id, password: None });
        prop_assert_eq!(second, OperationResult::Error(OperationError::RoomAlreadyExists));
    }
}

#[test]
fn real_world_smoke() {
    let mut real = RealWorld::new(2, 7);

    let create = Operation::CreateRoom { client_id: 0, room_id: 1, password: Some(1) };
    assert_eq!(real.apply(&create), OperationResult::Ok);

    let bad_join = Operation::JoinRoom { client_id: 1, room_id: 1, password: Some(0) };
    assert_eq!(real.apply(&bad_join), OperationResult::Error(OperationError::Unauthorized));

    let join = Operation::JoinRoom { client_id: 1, room_id: 1, password: Some(1) };
    assert_eq!(real.apply(&join), OperationResult::Ok);

    let say = Operation::SendMessage {
        client_id: 0,
        room_id: 1,
        content: SmallMessage { seed: 3, size_class: 2 },
    };
    assert_eq!(real.apply(&say), OperationResult::Delivered(vec![1]));

    assert_eq!(real.apply(&Operation::LeaveRoom { client_id: 0, room_id: 1 }), OperationResult::Ok);
    assert_eq!(real.apply(&say), OperationResult::Error(OperationError::NotMember));
    assert!(real.observable_rooms().is_empty());
}
