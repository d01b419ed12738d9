//! Client error types.

use roomcast_proto::{ProtocolError, StatusCode};
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket error on either channel.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Server sent a frame that does not decode.
    #[error("invalid frame: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server refused the request.
    #[error("request refused ({status}): {message}")]
    Rejected {
        /// Status code from the RESPONSE frame.
        status: StatusCode,
        /// Server-supplied detail.
        message: String,
    },

    /// COMPLETION frame does not carry a usable capability.
    #[error("invalid grant: {reason}")]
    InvalidGrant {
        /// Description of the problem.
        reason: String,
    },

    /// Message does not fit in one datagram next to the room name and token.
    #[error("message too large: {size} > {max}")]
    MessageTooLarge {
        /// Message size.
        size: usize,
        /// Largest message that fits.
        max: usize,
    },

    /// Server did not answer in time.
    #[error("timed out waiting for the server")]
    Timeout,
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors mean the server speaks a different protocol. Transient
    /// errors can be recovered by retrying, possibly with other input.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Protocol(_) | Self::InvalidGrant { .. } => true,

            Self::Io(_) | Self::Rejected { .. } | Self::MessageTooLarge { .. } | Self::Timeout => {
                false
            },
        }
    }

    /// Status code of a refused request.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
