//! Media transport seam.
//!
//! The actual WebRTC stack is an external collaborator: this layer only
//! shuttles its opaque negotiation payloads and reacts to its connection
//! state reports. [`LinkTransport`] and [`LinkFactory`] are the boundary,
//! so the whole mesh state machine runs against [`crate::mock`] transports
//! in tests, without a network.

use crate::errors::MeshError;
use common::types::SessionId;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which side of a peer link started the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// We created the link and sent the first payload.
    Initiator,
    /// The remote side started; we answer.
    Responder,
}

impl LinkRole {
    /// Role as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkRole::Initiator => "initiator",
            LinkRole::Responder => "responder",
        }
    }
}

/// Peer link connection state, as reported by the media transport.
///
/// The transport owns failure detection timing; this layer never imposes
/// its own timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Offer/answer/candidate exchange in progress.
    Negotiating,
    /// Media flowing directly between the peers.
    Connected,
    /// The transport reported a connectivity failure.
    Failed,
    /// Torn down.
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Negotiating => f.write_str("negotiating"),
            LinkState::Connected => f.write_str("connected"),
            LinkState::Failed => f.write_str("failed"),
            LinkState::Closed => f.write_str("closed"),
        }
    }
}

/// Opaque reference to the locally captured media stream.
///
/// Capture belongs to an external provider; the mesh only passes the
/// handle to each transport it creates. Negotiation must work without one
/// (media acquisition may have failed).
#[derive(Debug, Clone)]
pub struct StreamHandle {
    label: Arc<str>,
}

impl StreamHandle {
    /// Wrap a provider-issued stream label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into().into(),
        }
    }

    /// The provider's label for this stream.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// What a transport reported, tagged with which link reported it.
///
/// `link_id` is a per-orchestrator generation counter: events from a torn
/// down transport carry a stale id and are dropped instead of being
/// misapplied to the replacement link.
#[derive(Debug)]
pub struct LinkEvent {
    pub remote: SessionId,
    pub link_id: u64,
    pub kind: LinkEventKind,
}

/// Payload of a [`LinkEvent`].
#[derive(Debug)]
pub enum LinkEventKind {
    /// An outgoing negotiation payload to relay to the remote member.
    Signal(Value),
    /// The transport moved to a new connection state.
    StateChanged(LinkState),
}

/// One media-transport connection to a single remote peer.
pub trait LinkTransport: Send {
    /// Apply a negotiation payload relayed from the remote side.
    fn apply_remote(&mut self, payload: Value) -> Result<(), MeshError>;

    /// Tear the connection down. Idempotent.
    fn close(&mut self);
}

/// Creates [`LinkTransport`]s.
///
/// `events` is the orchestrator's shared event funnel; everything the
/// transport wants to say (outgoing payloads, state changes) goes through
/// it, tagged with `remote` and `link_id`.
pub trait LinkFactory: Send {
    fn create(
        &mut self,
        remote: &SessionId,
        link_id: u64,
        role: LinkRole,
        local_stream: Option<&StreamHandle>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Box<dyn LinkTransport>;
}
