//! Identifier newtypes for Roomlink components.
//!
//! Two identity spaces exist and must not be conflated:
//!
//! - [`SessionId`] is the durable, client-generated token that survives
//!   transport reconnects. Rosters and moderation targets use this space.
//! - [`ChannelId`] identifies one relay-side signaling connection and is
//!   minted fresh per WebSocket accept. It never appears on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Durable per-user session identity.
///
/// Clients generate this once and present it on every join so the relay can
/// collapse duplicate connections from the same logical user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new random session ID.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// View the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for SessionId {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for one signaling connection (relay side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    /// Create a new random channel ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
