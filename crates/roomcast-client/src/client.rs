//! Control-plane client: one TCRP transaction per call.

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use roomcast_proto::{
    CONTROL_HEADER_SIZE, ControlFrame, ControlHeader, Operation, ProtocolError, Role,
    RoomRequest, TOKEN_SIZE,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::error::ClientError;

/// Default bound on a whole control transaction.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest RESPONSE or COMPLETION payload the client will read.
///
/// Status replies and grants are a few hundred bytes at most.
pub const MAX_RESPONSE_PAYLOAD: usize = 64 * 1024;

/// What the client wants from the control plane.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl hides `password`.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomIntent {
    /// CREATE or JOIN.
    pub operation: Operation,
    /// Room name.
    pub room: String,
    /// Display name inside the room.
    pub username: String,
    /// Room password.
    pub password: Option<String>,
}

impl RoomIntent {
    /// Create a room and become its host.
    pub fn create(room: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(Operation::Create, room, username)
    }

    /// Join an existing room.
    pub fn join(room: impl Into<String>, username: impl Into<String>) -> Self {
        Self::new(Operation::Join, room, username)
    }

    fn new(operation: Operation, room: impl Into<String>, username: impl Into<String>) -> Self {
        Self { operation, room: room.into(), username: username.into(), password: None }
    }

    /// Attach a password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn request(&self) -> RoomRequest {
        let request = RoomRequest::new(self.username.clone());
        match &self.password {
            Some(password) => request.with_password(password.clone()),
            None => request,
        }
    }
}

impl std::fmt::Debug for RoomIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomIntent")
            .field("operation", &self.operation)
            .field("room", &self.room)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Capability handed from the control plane to the data channel.
///
/// # Security
///
/// - **Debug Redaction**: the `Debug` impl hides `token`.
#[derive(Clone, PartialEq, Eq)]
pub struct Capability {
    /// Room the token is valid for.
    pub room: String,
    /// Opaque token to present on every datagram.
    pub token: Bytes,
    /// Role granted.
    pub role: Role,
    /// Username of the room's host.
    pub host_username: String,
    /// Members in the room when the token was issued.
    pub participant_count: u32,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("room", &self.room)
            .field("token", &format!("<redacted {} bytes>", self.token.len()))
            .field("role", &self.role)
            .field("host_username", &self.host_username)
            .field("participant_count", &self.participant_count)
            .finish()
    }
}

/// Run one CREATE or JOIN transaction against `control_addr`.
///
/// # Errors
///
/// - `Rejected` for any non-SUCCESS status
/// - `Timeout` if the transaction takes longer than [`DEFAULT_DIAL_TIMEOUT`]
/// - `Protocol` / `InvalidGrant` if the server's frames do not make sense,
///   including a frame declaring more than [`MAX_RESPONSE_PAYLOAD`] bytes
pub async fn dial(control_addr: SocketAddr, intent: RoomIntent) -> Result<Capability, ClientError> {
    dial_with_timeout(control_addr, intent, DEFAULT_DIAL_TIMEOUT).await
}

/// [`dial`] with an explicit bound on the whole transaction.
pub async fn dial_with_timeout(
    control_addr: SocketAddr,
    intent: RoomIntent,
    limit: Duration,
) -> Result<Capability, ClientError> {
    timeout(limit, transact(control_addr, &intent)).await?
}

async fn transact(
    control_addr: SocketAddr,
    intent: &RoomIntent,
) -> Result<Capability, ClientError> {
    let mut stream = TcpStream::connect(control_addr).await?;
    tracing::debug!("{:?} {} via {}", intent.operation, intent.room, control_addr);

    let request = ControlFrame::request(intent.room.clone(), intent.operation, &intent.request())?;
    stream.write_all(&request.to_bytes()?).await?;

    let response = read_frame(&mut stream).await?;
    let reply = response.status_reply()?;
    if !reply.status.is_success() {
        return Err(ClientError::Rejected { status: reply.status, message: reply.message });
    }

    let completion = read_frame(&mut stream).await?;
    let grant = completion.grant()?;
    if grant.token.len() != TOKEN_SIZE {
        return Err(ClientError::InvalidGrant {
            reason: format!("token of {} bytes, expected {TOKEN_SIZE}", grant.token.len()),
        });
    }

    Ok(Capability {
        room: completion.room,
        token: Bytes::from(grant.token),
        role: grant.role,
        host_username: grant.host_username,
        participant_count: grant.participant_count,
    })
}

async fn read_frame(stream: &mut TcpStream) -> Result<ControlFrame, ClientError> {
    let mut header_bytes = [0u8; CONTROL_HEADER_SIZE];
    stream.read_exact(&mut header_bytes).await?;
    let header = ControlHeader::from_bytes(&header_bytes)?;

    let size = header.payload_len();
    if size > MAX_RESPONSE_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge { size, max: MAX_RESPONSE_PAYLOAD }.into());
    }

    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body).await?;
    Ok(ControlFrame::from_parts(&header, &body)?)
}
