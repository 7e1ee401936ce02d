//! Mesh client error types.

use thiserror::Error;

/// Roomlink mesh client error type.
#[derive(Debug, Error)]
pub enum MeshError {
    /// WebSocket transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failed to encode or decode a signaling frame.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The media transport rejected a negotiation payload.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// The signaling channel closed underneath us.
    #[error("Signaling channel closed")]
    ChannelClosed,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for MeshError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MeshError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::Signaling(err.to_string())
    }
}
