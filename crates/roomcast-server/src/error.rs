//! Server error types.

use std::fmt;

use roomcast_core::SessionError;
use roomcast_proto::ProtocolError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Transport/network error
    Transport(String),

    /// Malformed control frame
    Protocol(ProtocolError),

    /// Control payload above the configured limit
    PayloadTooLarge {
        /// Declared payload size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Control read or write exceeded the session timeout
    Timeout,

    /// Control session driven out of order
    Session(SessionError),

    /// Server is shutting down
    Cancelled,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "control payload too large: {size} bytes (max {max})")
            },
            Self::Timeout => write!(f, "control session timed out"),
            Self::Session(err) => write!(f, "session error: {err}"),
            Self::Cancelled => write!(f, "server shutting down"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            Self::Session(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<tokio::time::error::Elapsed> for ServerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
