//! In-memory mock media transport.
//!
//! Scripts a minimal offer/answer handshake over the same opaque-payload
//! channel a real WebRTC stack would use, so orchestrator and end-to-end
//! tests exercise the full mesh state machine without any media stack:
//!
//! - initiator transports emit an `offer` payload on creation
//! - responder transports answer an applied `offer` and report `Connected`
//! - initiator transports report `Connected` when the `answer` arrives
//!
//! [`MockControls`] lets tests inject failures and inspect what was
//! created.

use crate::errors::MeshError;
use crate::transport::{
    LinkEvent, LinkEventKind, LinkFactory, LinkRole, LinkState, LinkTransport, StreamHandle,
};

use common::types::SessionId;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One created transport, as seen from the test side.
struct MockHandle {
    remote: SessionId,
    link_id: u64,
    role: LinkRole,
    events: mpsc::Sender<LinkEvent>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockInner {
    handles: Vec<MockHandle>,
}

/// Factory producing scripted mock transports.
#[derive(Default)]
pub struct MockLinkFactory {
    inner: Arc<Mutex<MockInner>>,
}

impl MockLinkFactory {
    /// Create a new mock factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Control handle for inspecting and driving created transports.
    #[must_use]
    pub fn controls(&self) -> MockControls {
        MockControls {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl LinkFactory for MockLinkFactory {
    fn create(
        &mut self,
        remote: &SessionId,
        link_id: u64,
        role: LinkRole,
        _local_stream: Option<&StreamHandle>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Box<dyn LinkTransport> {
        let closed = Arc::new(AtomicBool::new(false));
        if let Ok(mut inner) = self.inner.lock() {
            inner.handles.push(MockHandle {
                remote: remote.clone(),
                link_id,
                role,
                events: events.clone(),
                closed: Arc::clone(&closed),
            });
        }

        if role == LinkRole::Initiator {
            let _ = events.try_send(LinkEvent {
                remote: remote.clone(),
                link_id,
                kind: LinkEventKind::Signal(json!({"kind": "offer", "link": link_id})),
            });
        }

        Box::new(MockLinkTransport {
            remote: remote.clone(),
            link_id,
            role,
            events,
            closed,
            connected: false,
        })
    }
}

/// Test-side view of a [`MockLinkFactory`].
#[derive(Clone)]
pub struct MockControls {
    inner: Arc<Mutex<MockInner>>,
}

impl MockControls {
    /// Every transport created so far: `(remote, link_id, role)`.
    #[must_use]
    pub fn created(&self) -> Vec<(SessionId, u64, LinkRole)> {
        self.inner.lock().map_or_else(
            |_| Vec::new(),
            |inner| {
                inner
                    .handles
                    .iter()
                    .map(|h| (h.remote.clone(), h.link_id, h.role))
                    .collect()
            },
        )
    }

    /// How many transports were created.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.handles.len())
    }

    /// Role of the most recently created transport for `remote`.
    #[must_use]
    pub fn latest_role(&self, remote: &SessionId) -> Option<LinkRole> {
        self.inner.lock().ok().and_then(|inner| {
            inner
                .handles
                .iter()
                .rev()
                .find(|h| &h.remote == remote)
                .map(|h| h.role)
        })
    }

    /// Whether the most recent transport for `remote` has been closed.
    #[must_use]
    pub fn latest_closed(&self, remote: &SessionId) -> Option<bool> {
        self.inner.lock().ok().and_then(|inner| {
            inner
                .handles
                .iter()
                .rev()
                .find(|h| &h.remote == remote)
                .map(|h| h.closed.load(Ordering::SeqCst))
        })
    }

    /// Inject a connectivity failure into the live transport for `remote`,
    /// as ICE would report it. Returns whether a live link was found.
    pub fn fail(&self, remote: &SessionId) -> bool {
        let Ok(inner) = self.inner.lock() else {
            return false;
        };
        let Some(handle) = inner
            .handles
            .iter()
            .rev()
            .find(|h| &h.remote == remote && !h.closed.load(Ordering::SeqCst))
        else {
            return false;
        };
        handle
            .events
            .try_send(LinkEvent {
                remote: handle.remote.clone(),
                link_id: handle.link_id,
                kind: LinkEventKind::StateChanged(LinkState::Failed),
            })
            .is_ok()
    }
}

/// Scripted transport produced by [`MockLinkFactory`].
struct MockLinkTransport {
    remote: SessionId,
    link_id: u64,
    role: LinkRole,
    events: mpsc::Sender<LinkEvent>,
    closed: Arc<AtomicBool>,
    connected: bool,
}

impl MockLinkTransport {
    fn emit(&self, kind: LinkEventKind) {
        let _ = self.events.try_send(LinkEvent {
            remote: self.remote.clone(),
            link_id: self.link_id,
            kind,
        });
    }
}

impl LinkTransport for MockLinkTransport {
    fn apply_remote(&mut self, payload: Value) -> Result<(), MeshError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        match payload.get("kind").and_then(Value::as_str) {
            Some("offer") if self.role == LinkRole::Responder => {
                // Duplicate offers re-emit the answer; the exchange is
                // idempotent on the responder side.
                self.emit(LinkEventKind::Signal(
                    json!({"kind": "answer", "link": self.link_id}),
                ));
                if !self.connected {
                    self.connected = true;
                    self.emit(LinkEventKind::StateChanged(LinkState::Connected));
                }
                Ok(())
            }
            Some("answer") if self.role == LinkRole::Initiator => {
                if !self.connected {
                    self.connected = true;
                    self.emit(LinkEventKind::StateChanged(LinkState::Connected));
                }
                Ok(())
            }
            // Incremental candidates and anything else: accepted, no-op.
            _ => Ok(()),
        }
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.emit(LinkEventKind::StateChanged(LinkState::Closed));
        }
    }
}
