//! TCP control plane.
//!
//! One task per connection, each running a single [`ControlSession`]:
//! read the REQUEST, write the RESPONSE, write the COMPLETION if the request
//! was granted, close. Every read and write is bounded by the session timeout.
//! A transaction that fails or is cancelled after its admission was granted
//! is rolled back, so a client never holds a room it did not hear about.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use roomcast_core::{ControlSession, RoomRegistry};
use roomcast_proto::{
    CONTROL_HEADER_SIZE, ControlFrame, ControlHeader, Operation, ProtocolError, StatusCode,
    StatusReply,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    task::JoinSet,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{error::ServerError, system_env::SystemEnv};

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlLimits {
    pub session_timeout: Duration,
    pub max_payload: usize,
}

/// Accept connections until cancelled, then wait for in-flight sessions.
pub(crate) async fn serve(
    listener: &TcpListener,
    registry: &Arc<RoomRegistry<SystemEnv>>,
    limits: ControlLimits,
    cancel: &CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("control connection from {}", peer);
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(registry),
                        limits,
                        cancel.clone(),
                    ));
                },
                Err(e) => tracing::error!("control accept error: {}", e),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("control task failed: {}", e);
                }
            },
        }
    }

    // Sessions observe the same token and roll themselves back.
    while connections.join_next().await.is_some() {}
    tracing::debug!("control plane stopped");
}

async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    registry: Arc<RoomRegistry<SystemEnv>>,
    limits: ControlLimits,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = ControlSession::new(peer.ip());

    let result = tokio::select! {
        () = cancel.cancelled() => Err(ServerError::Cancelled),
        result = transact(&mut stream, &mut session, &registry, limits) => result,
    };

    match result {
        Ok(()) => {
            if let Some(admission) = session.finish() {
                tracing::info!(
                    "{} {} in {} as {:?} ({} members)",
                    peer,
                    admission.member,
                    admission.room,
                    admission.role,
                    admission.participant_count
                );
            }
        },
        Err(e) => {
            tracing::warn!("control session with {} failed: {}", peer, e);
            session.abort(&registry);
        },
    }
}

async fn transact<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    session: &mut ControlSession,
    registry: &RoomRegistry<SystemEnv>,
    limits: ControlLimits,
) -> Result<(), ServerError> {
    let request = read_request(stream, limits).await?;

    let response = session.handle_request(&request, registry)?;
    write_frame(stream, &response, limits.session_timeout).await?;

    if let Some(completion) = session.completion()? {
        write_frame(stream, &completion, limits.session_timeout).await?;
    }

    // Best effort; the transaction is already complete.
    let _ = timeout(limits.session_timeout, stream.shutdown()).await;
    Ok(())
}

/// Read one frame: header, room name, payload.
///
/// A malformed header or body is answered with a RESPONSE before the
/// connection closes: `INVALID_NAME` for a bad room name, `SERVER_ERROR`
/// otherwise. A payload above the configured limit is refused with a
/// `SERVER_ERROR` response before any of it is read.
async fn read_request<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    limits: ControlLimits,
) -> Result<ControlFrame, ServerError> {
    let mut header_bytes = [0u8; CONTROL_HEADER_SIZE];
    timeout(limits.session_timeout, stream.read_exact(&mut header_bytes)).await??;
    let header = match ControlHeader::from_bytes(&header_bytes) {
        Ok(header) => header,
        Err(e) => {
            let operation = Operation::try_from(header_bytes[1]).unwrap_or(Operation::Create);
            return Err(refuse(stream, String::new(), operation, e, limits).await);
        },
    };
    let operation = header.operation().unwrap_or(Operation::Create);

    let room_len = header.room_name_len();
    let mut body = vec![0u8; room_len];
    timeout(limits.session_timeout, stream.read_exact(&mut body)).await??;

    let size = header.payload_len();
    if size > limits.max_payload {
        let reply = StatusReply::new(
            StatusCode::ServerError,
            format!("request payload of {size} bytes exceeds {}", limits.max_payload),
        );
        let response = ControlFrame::response(room_of(&body), operation, &reply)?;
        write_frame(stream, &response, limits.session_timeout).await?;
        return Err(ServerError::PayloadTooLarge { size, max: limits.max_payload });
    }

    body.resize(header.body_len(), 0);
    timeout(limits.session_timeout, stream.read_exact(&mut body[room_len..])).await??;

    match ControlFrame::from_parts(&header, &body) {
        Ok(frame) => Ok(frame),
        Err(e) => Err(refuse(stream, room_of(&body[..room_len]), operation, e, limits).await),
    }
}

/// Answer a malformed request, then hand back the error that ends the session.
async fn refuse<S: AsyncWrite + Unpin>(
    stream: &mut S,
    room: String,
    operation: Operation,
    error: ProtocolError,
    limits: ControlLimits,
) -> ServerError {
    let status = match error {
        ProtocolError::RoomNameTooLong { .. } | ProtocolError::InvalidUtf8 => {
            StatusCode::InvalidName
        },
        _ => StatusCode::ServerError,
    };
    let reply = StatusReply::new(status, format!("malformed request: {error}"));

    let written = match ControlFrame::response(room, operation, &reply) {
        Ok(response) => write_frame(stream, &response, limits.session_timeout).await,
        Err(e) => Err(e.into()),
    };
    match written {
        Ok(()) => error.into(),
        Err(e) => e,
    }
}

/// Room name to echo in a refusal; empty if it is not valid UTF-8.
fn room_of(bytes: &[u8]) -> String {
    std::str::from_utf8(bytes).map_or_else(|_| String::new(), str::to_owned)
}

async fn write_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    frame: &ControlFrame,
    session_timeout: Duration,
) -> Result<(), ServerError> {
    let bytes = frame.to_bytes()?;
    timeout(session_timeout, stream.write_all(&bytes)).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use roomcast_core::RoomConfig;
    use roomcast_proto::{RoomRequest, TransactionState};
    use tokio::io::{DuplexStream, duplex};

    use super::*;

    const WAIT: Duration = Duration::from_secs(3);

    fn limits() -> ControlLimits {
        ControlLimits { session_timeout: WAIT, max_payload: 1024 }
    }

    async fn read_frame(stream: &mut DuplexStream) -> ControlFrame {
        let mut header = [0u8; CONTROL_HEADER_SIZE];
        stream.read_exact(&mut header).await.expect("header");
        let header = ControlHeader::from_bytes(&header).expect("valid header");
        let mut body = vec![0u8; header.body_len()];
        stream.read_exact(&mut body).await.expect("body");
        ControlFrame::from_parts(&header, &body).expect("valid frame")
    }

    /// Start a session over an in-memory pipe too small to hold the
    /// COMPLETION, send a CREATE and read back the RESPONSE.
    ///
    /// On return the session holds a granted admission it has not yet
    /// delivered.
    async fn granted_create(
        registry: &Arc<RoomRegistry<SystemEnv>>,
        cancel: &CancellationToken,
    ) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (mut client, server) = duplex(8);
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));
        let session = tokio::spawn(handle_connection(
            server,
            peer,
            Arc::clone(registry),
            limits(),
            cancel.clone(),
        ));

        let request = ControlFrame::request("lobby", Operation::Create, &RoomRequest::new("alice"))
            .expect("request");
        client.write_all(&request.to_bytes().expect("encode")).await.expect("send");

        let response = timeout(WAIT, read_frame(&mut client)).await.expect("response");
        assert_eq!(response.state, TransactionState::Response);
        assert_eq!(response.status_reply().expect("reply").status, StatusCode::Success);
        assert!(registry.has_room("lobby"));
        assert!(!registry.tokens().is_empty());

        (client, session)
    }

    #[tokio::test]
    async fn cancelled_before_completion_rolls_back() {
        let registry = Arc::new(RoomRegistry::new(SystemEnv::new(), RoomConfig::default()));
        let cancel = CancellationToken::new();
        let (_client, session) = granted_create(&registry, &cancel).await;

        cancel.cancel();
        timeout(WAIT, session).await.expect("session ends").expect("join");

        assert!(!registry.has_room("lobby"));
        assert!(registry.tokens().is_empty());
    }

    #[tokio::test]
    async fn failed_completion_write_rolls_back() {
        let registry = Arc::new(RoomRegistry::new(SystemEnv::new(), RoomConfig::default()));
        let cancel = CancellationToken::new();
        let (client, session) = granted_create(&registry, &cancel).await;

        drop(client);
        timeout(WAIT, session).await.expect("session ends").expect("join");

        assert!(!registry.has_room("lobby"));
        assert!(registry.tokens().is_empty());
        assert!(!cancel.is_cancelled());
    }
}
