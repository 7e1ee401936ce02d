//! Signaling wire protocol.
//!
//! Events travel as JSON text frames over the WebSocket between each client
//! and the relay. The enums are internally tagged so frames stay
//! self-describing and unknown fields are tolerated.
//!
//! WebRTC negotiation payloads (`payload` fields) are opaque to this layer:
//! the relay forwards them unexamined and the mesh hands them to the media
//! transport as-is.

use crate::types::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum display-name length in characters; longer names are truncated.
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// Display name used when a client supplies none.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Events sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Request to join a room, creating it if absent.
    Join {
        room_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        password: String,
        /// Durable session token. Omitting it makes the relay mint one,
        /// at the cost of takeover semantics on reconnect.
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    /// Opaque negotiation payload for one co-room member.
    Signal { to: SessionId, payload: Value },
    /// Ask `target` to tear down its link to us and re-initiate.
    ReconnectRequest { target: SessionId },
    /// Host-only: remove a member.
    Kick { target: SessionId },
    /// Host-only: ban the member's address, then remove it.
    Ban { target: SessionId },
}

/// Why a join request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    WrongPassword,
    Banned,
}

/// One roster entry in a `join_accepted` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: SessionId,
    pub name: String,
}

/// Events sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Join succeeded; `roster` lists the members already present.
    JoinAccepted {
        /// The session identity this connection is now bound to.
        session_id: SessionId,
        roster: Vec<MemberInfo>,
    },
    /// Join refused; for `WrongPassword` the connection stays open so the
    /// client can re-prompt and retry.
    JoinRejected { reason: RejectReason },
    /// Grants moderation rights to the receiver.
    YouAreHost,
    /// A new member entered the room. The newcomer initiates links, so this
    /// is roster bookkeeping for existing members.
    MemberJoined { id: SessionId, name: String },
    /// A member left; tear down the corresponding peer link.
    MemberLeft { id: SessionId },
    /// Relayed negotiation payload.
    Signal { from: SessionId, payload: Value },
    /// A peer observed our link to it fail; we should re-initiate.
    ReconnectRequest { from: SessionId },
    /// The receiver was removed by the host. The channel closes shortly
    /// after this event.
    Kicked { banned: bool },
}

/// Truncate to [`MAX_DISPLAY_NAME_LEN`] characters and substitute
/// [`DEFAULT_DISPLAY_NAME`] for empty input.
#[must_use]
pub fn sanitize_display_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return DEFAULT_DISPLAY_NAME.to_string();
    }
    trimmed.chars().take(MAX_DISPLAY_NAME_LEN).collect()
}
