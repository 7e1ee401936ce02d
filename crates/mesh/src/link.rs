//! `PeerLink` - one client-to-client connection's state.
//!
//! State machine per link:
//!
//! ```text
//! negotiating -> connected -> (failed -> negotiating) | closed
//! ```
//!
//! The transitions are driven by the media transport's own reports; this
//! layer adds the reconnect-request latch: on entering `failed`/`closed`
//! the orchestrator asks the remote side to re-initiate exactly once per
//! failure episode, and the latch clears when the link recovers.

use crate::errors::MeshError;
use crate::transport::{LinkRole, LinkState, LinkTransport};

use common::types::SessionId;
use serde_json::Value;

/// One peer link owned by the orchestrator.
pub struct PeerLink {
    remote: SessionId,
    role: LinkRole,
    link_id: u64,
    state: LinkState,
    reconnect_requested: bool,
    transport: Box<dyn LinkTransport>,
}

impl PeerLink {
    /// Wrap a freshly created transport.
    #[must_use]
    pub fn new(
        remote: SessionId,
        role: LinkRole,
        link_id: u64,
        transport: Box<dyn LinkTransport>,
    ) -> Self {
        Self {
            remote,
            role,
            link_id,
            state: LinkState::Negotiating,
            reconnect_requested: false,
            transport,
        }
    }

    /// Remote member this link connects to.
    #[must_use]
    pub fn remote(&self) -> &SessionId {
        &self.remote
    }

    /// Our role on this link.
    #[must_use]
    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Generation tag; events carrying another id belong to a torn-down
    /// predecessor and must be dropped.
    #[must_use]
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Apply a relayed negotiation payload.
    pub fn apply_signal(&mut self, payload: Value) -> Result<(), MeshError> {
        self.transport.apply_remote(payload)
    }

    /// Record a transport-reported state change. Recovery clears the
    /// reconnect latch so the next failure episode may notify again.
    pub fn set_state(&mut self, state: LinkState) {
        self.state = state;
        if state == LinkState::Connected {
            self.reconnect_requested = false;
        }
    }

    /// Arm the reconnect latch. Returns false if this failure episode has
    /// already been notified.
    pub fn arm_reconnect(&mut self) -> bool {
        if self.reconnect_requested {
            return false;
        }
        self.reconnect_requested = true;
        true
    }

    /// Tear the transport down.
    pub fn close(&mut self) {
        self.transport.close();
        self.state = LinkState::Closed;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mock::MockLinkFactory;
    use crate::transport::LinkFactory;
    use tokio::sync::mpsc;

    fn make_link(role: LinkRole) -> PeerLink {
        let mut factory = MockLinkFactory::new();
        let (tx, _rx) = mpsc::channel(16);
        let remote = SessionId::from("peer-b");
        let transport = factory.create(&remote, 1, role, None, tx);
        PeerLink::new(remote, role, 1, transport)
    }

    #[test]
    fn test_new_link_is_negotiating() {
        let link = make_link(LinkRole::Initiator);
        assert_eq!(link.state(), LinkState::Negotiating);
        assert_eq!(link.role(), LinkRole::Initiator);
    }

    #[test]
    fn test_reconnect_latch_fires_once_per_episode() {
        let mut link = make_link(LinkRole::Initiator);

        link.set_state(LinkState::Failed);
        assert!(link.arm_reconnect());
        // Still the same episode: Failed then Closed must not re-notify.
        link.set_state(LinkState::Closed);
        assert!(!link.arm_reconnect());

        // Recovery resets the latch for the next episode.
        link.set_state(LinkState::Connected);
        link.set_state(LinkState::Failed);
        assert!(link.arm_reconnect());
    }

    #[test]
    fn test_close_moves_to_closed() {
        let mut link = make_link(LinkRole::Responder);
        link.close();
        assert_eq!(link.state(), LinkState::Closed);
    }
}
