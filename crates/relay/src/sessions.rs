//! Session identity index.
//!
//! Maps each durable [`SessionId`] to the signaling channel currently bound
//! to it. The invariant is at most one live channel per session: binding a
//! new channel reports the displaced one so the coordinator can evict the
//! ghost before the join proceeds, which keeps a reconnecting user from
//! being counted twice.

use common::types::{ChannelId, SessionId};
use std::collections::HashMap;

/// `SessionId` -> live `ChannelId` bindings. Owned by the coordinator task.
#[derive(Debug, Default)]
pub struct SessionIndex {
    bindings: HashMap<SessionId, ChannelId>,
}

impl SessionIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `session` to `channel`, returning the channel it displaced.
    ///
    /// Rebinding the same channel is a no-op and displaces nothing.
    pub fn bind(&mut self, session: SessionId, channel: ChannelId) -> Option<ChannelId> {
        match self.bindings.insert(session, channel) {
            Some(old) if old != channel => Some(old),
            _ => None,
        }
    }

    /// The channel currently bound to `session`.
    #[must_use]
    pub fn channel_for(&self, session: &SessionId) -> Option<ChannelId> {
        self.bindings.get(session).copied()
    }

    /// Release the binding, but only if `channel` still holds it.
    ///
    /// The guard matters during takeover: the evicted channel's disconnect
    /// arrives after the new channel has already re-bound the session, and
    /// must not tear down the successor's binding.
    pub fn release(&mut self, session: &SessionId, channel: ChannelId) {
        if self.bindings.get(session) == Some(&channel) {
            self.bindings.remove(session);
        }
    }

    /// Number of live bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no session is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
