//! Control-plane transaction state machine.
//!
//! One [`ControlSession`] per control connection:
//!
//! ```text
//! AwaitingRequest ──handle_request──► Responded ──finish──► Completed
//!        │                                │
//!        │ (refused)                      └──abort──► Aborted
//!        └──────────────────────────────────────────► Completed
//! ```
//!
//! The session performs no I/O. The runtime reads the REQUEST frame, hands it
//! to [`ControlSession::handle_request`], writes the RESPONSE it gets back,
//! then writes [`ControlSession::completion`] if there is one. An admission is
//! only committed by [`ControlSession::finish`]; any transport failure before
//! that must end in [`ControlSession::abort`] so the room state is reverted.

use std::net::IpAddr;

use roomcast_proto::{ControlFrame, Grant, Operation, ProtocolError, StatusCode, StatusReply};

use crate::{
    env::Environment,
    registry::{Admission, DepartureReason, RoomRegistry},
};

/// Where a session is in its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the REQUEST frame.
    AwaitingRequest,
    /// RESPONSE produced; an admission may be pending.
    Responded,
    /// Transaction over; nothing left to roll back.
    Completed,
    /// Transport failed and the admission was reverted.
    Aborted,
}

/// Errors from driving a session out of order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Operation not valid in the current state.
    #[error("invalid session state: expected {expected:?}, got {actual:?}")]
    InvalidState {
        /// State the operation requires.
        expected: SessionState,
        /// State the session is in.
        actual: SessionState,
    },

    /// Reply frame could not be built.
    #[error("failed to build reply: {0}")]
    Encode(#[from] ProtocolError),
}

#[derive(Debug)]
struct Pending {
    operation: Operation,
    admission: Admission,
}

/// Per-connection control transaction.
#[derive(Debug)]
pub struct ControlSession {
    peer: IpAddr,
    state: SessionState,
    pending: Option<Pending>,
}

impl ControlSession {
    /// New session for a connection from `peer`.
    pub fn new(peer: IpAddr) -> Self {
        Self { peer, state: SessionState::AwaitingRequest, pending: None }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Address of the client.
    pub fn peer(&self) -> IpAddr {
        self.peer
    }

    /// True if an admission awaits delivery of its COMPLETION frame.
    pub fn has_pending_admission(&self) -> bool {
        self.pending.is_some()
    }

    /// Process the REQUEST frame and produce the RESPONSE frame.
    ///
    /// A frame that is not a REQUEST, or whose payload does not decode, gets
    /// a `SERVER_ERROR` response. Every non-success response ends the
    /// transaction immediately.
    pub fn handle_request<E: Environment>(
        &mut self,
        frame: &ControlFrame,
        registry: &RoomRegistry<E>,
    ) -> Result<ControlFrame, SessionError> {
        self.expect(SessionState::AwaitingRequest)?;

        let outcome = match frame.room_request() {
            Ok(request) => {
                let password = request.password.as_deref();
                match frame.operation {
                    Operation::Create => {
                        registry.create(&frame.room, &request.username, password, self.peer)
                    },
                    Operation::Join => {
                        registry.join(&frame.room, &request.username, password, self.peer)
                    },
                }
                .map_err(|e| (e.status_code(), e.to_string()))
            },
            Err(e) => {
                tracing::warn!("malformed request from {}: {}", self.peer, e);
                Err((StatusCode::ServerError, format!("malformed request: {e}")))
            },
        };

        let reply = match outcome {
            Ok(admission) => {
                let message = match frame.operation {
                    Operation::Create => format!("room {} created", admission.room),
                    Operation::Join => format!("joined room {}", admission.room),
                };
                self.pending = Some(Pending { operation: frame.operation, admission });
                self.state = SessionState::Responded;
                StatusReply::new(StatusCode::Success, message)
            },
            Err((status, message)) => {
                tracing::debug!(
                    "{:?} {} from {} refused: {}",
                    frame.operation,
                    frame.room,
                    self.peer,
                    status
                );
                self.state = SessionState::Completed;
                StatusReply::new(status, message)
            },
        };

        Ok(ControlFrame::response(frame.room.clone(), frame.operation, &reply)?)
    }

    /// COMPLETION frame carrying the token, if the request was granted.
    pub fn completion(&self) -> Result<Option<ControlFrame>, SessionError> {
        let Some(pending) = &self.pending else {
            return Ok(None);
        };
        self.expect(SessionState::Responded)?;

        let admission = &pending.admission;
        let grant = Grant {
            token: admission.token.as_bytes().to_vec(),
            role: admission.role,
            host_username: admission.host_username.clone(),
            participant_count: u32::try_from(admission.participant_count).unwrap_or(u32::MAX),
        };
        let frame =
            ControlFrame::completion(admission.room.to_string(), pending.operation, &grant)?;
        Ok(Some(frame))
    }

    /// Commit the transaction. Returns the admission, if there was one.
    pub fn finish(&mut self) -> Option<Admission> {
        if self.state == SessionState::Aborted {
            return None;
        }
        self.state = SessionState::Completed;
        self.pending.take().map(|pending| pending.admission)
    }

    /// Revert an admission whose COMPLETION never reached the client.
    ///
    /// A granted CREATE destroys the room again; a granted JOIN removes the
    /// participant. No-op after [`Self::finish`] or a refused request.
    pub fn abort<E: Environment>(&mut self, registry: &RoomRegistry<E>) {
        if let Some(pending) = self.pending.take() {
            let admission = pending.admission;
            tracing::warn!(
                "rolling back {:?} of {} for {} ({})",
                pending.operation,
                admission.room,
                admission.member,
                self.peer
            );
            registry.remove_member(
                admission.room.as_str(),
                admission.member,
                DepartureReason::Rollback,
            );
            self.state = SessionState::Aborted;
        } else if self.state != SessionState::Completed {
            self.state = SessionState::Aborted;
        }
    }

    fn expect(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { expected, actual: self.state })
        }
    }
}
