//! `dial` against scripted control-plane peers.

use std::{net::SocketAddr, time::Duration};

use roomcast_client::{
    ClientError, MAX_RESPONSE_PAYLOAD, RoomIntent, StatusCode, dial, dial_with_timeout,
};
use roomcast_proto::{
    CONTROL_HEADER_SIZE, ControlFrame, ControlHeader, Grant, Operation, ProtocolError, Role,
    StatusReply, TransactionState,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// Accept one connection, read its REQUEST, then write `replies` in order.
async fn scripted_peer(replies: Vec<ControlFrame>) -> SocketAddr {
    let bytes = replies.iter().flat_map(|reply| reply.to_bytes().expect("encode")).collect();
    raw_peer(bytes).await
}

/// Accept one connection, read its REQUEST, then write `bytes` verbatim.
async fn raw_peer(bytes: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let request = read_frame(&mut stream).await;
        assert!(request.room_request().is_ok());
        stream.write_all(&bytes).await.expect("write");
        // Hold the connection open until the client is done with it.
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
    });

    addr
}

async fn read_frame(stream: &mut TcpStream) -> ControlFrame {
    let mut header = [0u8; CONTROL_HEADER_SIZE];
    stream.read_exact(&mut header).await.expect("header");
    let header = ControlHeader::from_bytes(&header).expect("valid header");
    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body).await.expect("body");
    ControlFrame::from_parts(&header, &body).expect("valid frame")
}

fn response(status: StatusCode, message: &str) -> ControlFrame {
    ControlFrame::response("lobby", Operation::Join, &StatusReply::new(status, message))
        .expect("response")
}

fn completion(token: Vec<u8>) -> ControlFrame {
    let grant = Grant {
        token,
        role: Role::Participant,
        host_username: "alice".to_string(),
        participant_count: 2,
    };
    ControlFrame::completion("lobby", Operation::Join, &grant).expect("completion")
}

#[tokio::test]
async fn granted_join_yields_capability() {
    let addr =
        scripted_peer(vec![response(StatusCode::Success, "joined"), completion(vec![9; 32])])
            .await;

    let capability = dial(addr, RoomIntent::join("lobby", "bob")).await.expect("dial");
    assert_eq!(capability.room, "lobby");
    assert_eq!(capability.token.as_ref(), &[9u8; 32]);
    assert_eq!(capability.role, Role::Participant);
    assert_eq!(capability.host_username, "alice");
    assert_eq!(capability.participant_count, 2);
}

#[tokio::test]
async fn refusal_carries_status_and_message() {
    let addr = scripted_peer(vec![response(StatusCode::RoomFull, "room lobby is full")]).await;

    let err = dial(addr, RoomIntent::join("lobby", "bob")).await.unwrap_err();
    match err {
        ClientError::Rejected { status, message } => {
            assert_eq!(status, StatusCode::RoomFull);
            assert_eq!(message, "room lobby is full");
        },
        other => unreachable!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn short_token_is_invalid_grant() {
    let addr =
        scripted_peer(vec![response(StatusCode::Success, "joined"), completion(vec![1; 5])])
            .await;

    let err = dial(addr, RoomIntent::join("lobby", "bob")).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidGrant { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn completion_in_place_of_response_is_protocol_error() {
    let addr = scripted_peer(vec![completion(vec![9; 32])]).await;

    let err = dial(addr, RoomIntent::join("lobby", "bob")).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}

#[tokio::test]
async fn silent_server_times_out() {
    let addr = scripted_peer(Vec::new()).await;

    let err = dial_with_timeout(addr, RoomIntent::join("lobby", "bob"), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn huge_declared_response_is_refused_unread() {
    let size = 256 * 1024 * 1024;
    let header = ControlHeader::new(5, Operation::Join, TransactionState::Response, size)
        .expect("header");
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(b"lobby");
    let addr = raw_peer(bytes).await;

    let err = dial_with_timeout(addr, RoomIntent::join("lobby", "bob"), Duration::from_secs(1))
        .await
        .unwrap_err();
    match err {
        ClientError::Protocol(ProtocolError::PayloadTooLarge { size: declared, max }) => {
            assert_eq!(declared, size);
            assert_eq!(max, MAX_RESPONSE_PAYLOAD);
        },
        other => unreachable!("expected oversized payload, got {other:?}"),
    }
}
