//! Relay error types.
//!
//! Protocol-level refusals (wrong password, ban) are not errors: they are
//! `ServerEvent::JoinRejected` replies. `RelayError` covers the operational
//! failures around the protocol: transport problems, configuration, and
//! actor plumbing.

use thiserror::Error;

/// Roomlink relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// WebSocket or TCP transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An actor mailbox was closed while the peer half still tried to use
    /// it; normal during shutdown, a bug otherwise.
    #[error("Coordinator unavailable")]
    CoordinatorUnavailable,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Transport(err.to_string())
    }
}
