//! Error types for the STUN client library
//!
//! Most failures on the message path never surface here: codec errors and
//! transport delivery failures are converted into transaction outcomes so the
//! server pool can fail over. These variants cover what genuinely propagates
//! to callers, chiefly resource exhaustion and misuse of a closed client.

use thiserror::Error;

/// Result type for STUN client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the STUN client
#[derive(Debug, Error)]
pub enum Error {
    /// Codec error from stun-core
    #[error("codec error: {0}")]
    Codec(#[from] stun_core::Error),

    /// Every candidate server has been tried and failed
    #[error("no STUN servers available")]
    NoServersAvailable,

    /// A configured server hostname could not be resolved
    #[error("unknown host: {host}")]
    UnknownHost { host: String },

    /// The transport has been closed
    #[error("transport closed")]
    TransportClosed,

    /// Operation not valid in the current client state
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Network-level failure establishing or using a session
    #[error("network error: {message}")]
    Network { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
