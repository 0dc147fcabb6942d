//! Error types for the connectivity layer.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the backend transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The backend could not be reached (DNS failure, connection refused).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The request exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other transport-level failure.
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Human-readable description stored in `ConnectionState::error`.
    pub fn describe(&self) -> String {
        match self {
            TransportError::Timeout(deadline) => {
                format!("Timeout of connection ({}s)", deadline.as_secs())
            }
            TransportError::Unreachable(detail) => {
                format!("Backend unreachable: {}", detail)
            }
            TransportError::Other(detail) => detail.clone(),
        }
    }
}

/// Errors surfaced by the channel manager.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A stream was requested without an authentication signal present.
    #[error("stream refused: not authenticated")]
    Unauthorized,

    /// An inbound event failed to parse. Recovered per-message; the
    /// channel stays open.
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),

    /// Automatic reconnection gave up. Terminal for the channel.
    #[error("reconnect attempts exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// A transport-level failure on the underlying stream.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
