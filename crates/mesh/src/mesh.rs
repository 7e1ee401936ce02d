//! `MeshOrchestrator` - realizes the full mesh of peer links.
//!
//! One orchestrator per joined client. It consumes the relay's server
//! events and the transports' link events through a single loop, so all
//! mutations of the link map are serialized:
//!
//! - the join roster creates one **initiator** link per member already
//!   present
//! - the first targeted payload from an unknown sender creates a
//!   **responder** link; payloads for known senders are applied to the
//!   existing link, never duplicate-created
//! - a failed link asks the remote side to re-initiate (once per failure
//!   episode) and keeps the defunct link until the fresh offer arrives;
//!   an inbound reconnect request tears down the stale link and
//!   re-initiates locally. Requester and requested sides never both
//!   initiate, so the dual-initiator race cannot occur
//! - `member_left` tears the corresponding link down
//!
//! The live `{member -> link state}` roster is published through a
//! `tokio::sync::watch` for the rendering layer to consume.

use crate::link::PeerLink;
use crate::transport::{LinkEvent, LinkEventKind, LinkFactory, LinkRole, LinkState, StreamHandle};

use common::protocol::{ClientEvent, RejectReason, ServerEvent};
use common::types::SessionId;

use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Buffer for transport-reported link events.
const LINK_EVENT_BUFFER: usize = 256;

/// Parameters for joining a room.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Room to join (created on first join).
    pub room_id: String,
    /// Display name presented to other members.
    pub display_name: String,
    /// Room password; empty for public rooms.
    pub password: String,
    /// Durable session token; reuse across reconnects for takeover.
    pub session_id: SessionId,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The relay refused the join. For `WrongPassword` the signaling
    /// channel is still open; re-prompt and join again.
    Rejected(RejectReason),
    /// Removed by the host.
    Kicked { banned: bool },
    /// The signaling channel closed.
    ChannelClosed,
    /// Locally cancelled (user left the call).
    Cancelled,
}

/// Per-remote entry in the published roster.
#[derive(Debug, Clone)]
pub struct LinkSummary {
    /// Display name, once known from the roster.
    pub name: Option<String>,
    /// Link connection state.
    pub state: LinkState,
    /// Our role on the link.
    pub role: LinkRole,
}

/// Snapshot published to the rendering layer.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    /// Live links by remote member.
    pub links: HashMap<SessionId, LinkSummary>,
    /// Whether this client currently holds moderation rights.
    pub is_host: bool,
    /// Set once, when the session terminates.
    pub ended: Option<SessionEnd>,
}

/// Handle to a running orchestrator.
#[derive(Clone)]
pub struct MeshHandle {
    roster: watch::Receiver<RosterSnapshot>,
    outbound: mpsc::Sender<ClientEvent>,
    cancel_token: CancellationToken,
}

impl MeshHandle {
    /// Subscribe to roster snapshots.
    #[must_use]
    pub fn roster(&self) -> watch::Receiver<RosterSnapshot> {
        self.roster.clone()
    }

    /// Ask the relay to remove `target` from the room. The relay ignores
    /// this unless we are the host.
    pub async fn kick(&self, target: SessionId) -> bool {
        self.outbound
            .send(ClientEvent::Kick { target })
            .await
            .is_ok()
    }

    /// Kick `target` and ban its address from the room.
    pub async fn ban(&self, target: SessionId) -> bool {
        self.outbound
            .send(ClientEvent::Ban { target })
            .await
            .is_ok()
    }

    /// Leave the call: tear down all links and stop the loop.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The orchestrator implementation.
pub struct MeshOrchestrator {
    config: MeshConfig,
    links: HashMap<SessionId, PeerLink>,
    /// Display names learned from roster events; kept also for members we
    /// have no link to yet.
    names: HashMap<SessionId, String>,
    factory: Box<dyn LinkFactory>,
    local_stream: Option<StreamHandle>,
    outbound: mpsc::Sender<ClientEvent>,
    link_tx: mpsc::Sender<LinkEvent>,
    roster_tx: watch::Sender<RosterSnapshot>,
    cancel_token: CancellationToken,
    is_host: bool,
    next_link_id: u64,
}

impl MeshOrchestrator {
    /// Spawn an orchestrator.
    ///
    /// `outbound`/`inbound` are the signaling channel halves (see
    /// [`crate::signal::SignalChannel::split`]). The join request is sent
    /// on startup; `local_stream` may be `None` when media capture failed,
    /// negotiation still proceeds.
    pub fn spawn(
        config: MeshConfig,
        factory: Box<dyn LinkFactory>,
        local_stream: Option<StreamHandle>,
        outbound: mpsc::Sender<ClientEvent>,
        inbound: mpsc::Receiver<ServerEvent>,
        cancel_token: CancellationToken,
    ) -> (MeshHandle, JoinHandle<()>) {
        let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        let (roster_tx, roster_rx) = watch::channel(RosterSnapshot::default());
        let handle_outbound = outbound.clone();

        let actor = Self {
            config,
            links: HashMap::new(),
            names: HashMap::new(),
            factory,
            local_stream,
            outbound,
            link_tx,
            roster_tx,
            cancel_token: cancel_token.clone(),
            is_host: false,
            next_link_id: 0,
        };

        let task_handle = tokio::spawn(actor.run(inbound, link_rx));

        let handle = MeshHandle {
            roster: roster_rx,
            outbound: handle_outbound,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the orchestrator loop.
    #[instrument(skip_all, name = "mesh.orchestrator", fields(room_id = %self.config.room_id, session = %self.config.session_id))]
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ServerEvent>,
        mut link_rx: mpsc::Receiver<LinkEvent>,
    ) {
        let join = ClientEvent::Join {
            room_id: self.config.room_id.clone(),
            name: self.config.display_name.clone(),
            password: self.config.password.clone(),
            session_id: Some(self.config.session_id.clone()),
        };
        if self.outbound.send(join).await.is_err() {
            self.finish(SessionEnd::ChannelClosed);
            return;
        }

        info!(target: "mesh.orchestrator", "MeshOrchestrator started");

        let end = loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "mesh.orchestrator", "MeshOrchestrator received cancellation signal");
                    break SessionEnd::Cancelled;
                }

                event = inbound.recv() => {
                    match event {
                        Some(event) => {
                            if let Some(end) = self.handle_server_event(event).await {
                                break end;
                            }
                        }
                        None => break SessionEnd::ChannelClosed,
                    }
                }

                event = link_rx.recv() => {
                    // link_tx lives in self, so this arm never yields None
                    // while the loop runs.
                    if let Some(event) = event {
                        if let Some(end) = self.handle_link_event(event).await {
                            break end;
                        }
                    }
                }
            }
        };

        self.finish(end);
    }

    /// Handle one relay event. Returns `Some` to stop the loop.
    async fn handle_server_event(&mut self, event: ServerEvent) -> Option<SessionEnd> {
        match event {
            ServerEvent::JoinAccepted { session_id, roster } => {
                info!(
                    target: "mesh.orchestrator",
                    members = roster.len(),
                    "Join accepted, forming mesh"
                );
                self.config.session_id = session_id;
                for member in roster {
                    self.names.insert(member.id.clone(), member.name);
                    self.ensure_link(&member.id, LinkRole::Initiator);
                }
                self.publish_roster();
                None
            }

            ServerEvent::JoinRejected { reason } => {
                info!(target: "mesh.orchestrator", ?reason, "Join rejected");
                Some(SessionEnd::Rejected(reason))
            }

            ServerEvent::YouAreHost => {
                info!(target: "mesh.orchestrator", "Granted host rights");
                self.is_host = true;
                self.publish_roster();
                None
            }

            ServerEvent::MemberJoined { id, name } => {
                // The newcomer initiates; we only note the name and wait
                // for its first payload.
                debug!(target: "mesh.orchestrator", member = %id, "Member joined");
                self.names.insert(id, name);
                None
            }

            ServerEvent::MemberLeft { id } => {
                debug!(target: "mesh.orchestrator", member = %id, "Member left");
                self.names.remove(&id);
                if let Some(mut link) = self.links.remove(&id) {
                    link.close();
                }
                self.publish_roster();
                None
            }

            ServerEvent::Signal { from, payload } => {
                // A payload for a defunct link is the remote side
                // re-initiating after our reconnect request; replace the
                // link and answer on the fresh one.
                let defunct = self
                    .links
                    .get(&from)
                    .is_some_and(|l| matches!(l.state(), LinkState::Failed | LinkState::Closed));
                if defunct {
                    if let Some(mut stale) = self.links.remove(&from) {
                        stale.close();
                    }
                }
                // Re-check existence on every payload: joins, duplicate
                // deliveries, and candidate trickles arrive in any order.
                if !self.links.contains_key(&from) {
                    self.ensure_link(&from, LinkRole::Responder);
                    self.publish_roster();
                }
                if let Some(link) = self.links.get_mut(&from) {
                    if let Err(e) = link.apply_signal(payload) {
                        warn!(
                            target: "mesh.orchestrator",
                            member = %from,
                            error = %e,
                            "Transport rejected payload, dropping"
                        );
                    }
                }
                None
            }

            ServerEvent::ReconnectRequest { from } => {
                // The remote side saw our link fail; we are the requested
                // side, so we re-initiate. The requester never does.
                info!(target: "mesh.orchestrator", member = %from, "Reconnect requested, re-initiating");
                if let Some(mut stale) = self.links.remove(&from) {
                    stale.close();
                }
                self.ensure_link(&from, LinkRole::Initiator);
                self.publish_roster();
                None
            }

            ServerEvent::Kicked { banned } => {
                info!(target: "mesh.orchestrator", banned, "Kicked from room");
                Some(SessionEnd::Kicked { banned })
            }
        }
    }

    /// Handle one transport report. Returns `Some` to stop the loop.
    async fn handle_link_event(&mut self, event: LinkEvent) -> Option<SessionEnd> {
        let Some(link) = self.links.get_mut(&event.remote) else {
            debug!(target: "mesh.orchestrator", member = %event.remote, "Event for removed link, dropping");
            return None;
        };
        if link.link_id() != event.link_id {
            debug!(
                target: "mesh.orchestrator",
                member = %event.remote,
                stale = event.link_id,
                current = link.link_id(),
                "Stale link event, dropping"
            );
            return None;
        }

        match event.kind {
            LinkEventKind::Signal(payload) => {
                let sent = self
                    .outbound
                    .send(ClientEvent::Signal {
                        to: event.remote,
                        payload,
                    })
                    .await;
                if sent.is_err() {
                    return Some(SessionEnd::ChannelClosed);
                }
            }

            LinkEventKind::StateChanged(state) => {
                debug!(target: "mesh.orchestrator", member = %event.remote, %state, "Link state changed");
                link.set_state(state);
                if matches!(state, LinkState::Failed | LinkState::Closed) && link.arm_reconnect() {
                    let sent = self
                        .outbound
                        .send(ClientEvent::ReconnectRequest {
                            target: event.remote,
                        })
                        .await;
                    if sent.is_err() {
                        return Some(SessionEnd::ChannelClosed);
                    }
                }
                self.publish_roster();
            }
        }
        None
    }

    /// Create a link to `remote` unless one already exists.
    fn ensure_link(&mut self, remote: &SessionId, role: LinkRole) {
        if self.links.contains_key(remote) {
            return;
        }
        self.next_link_id += 1;
        let link_id = self.next_link_id;
        debug!(
            target: "mesh.orchestrator",
            member = %remote,
            role = role.as_str(),
            link_id,
            "Creating peer link"
        );
        let transport = self.factory.create(
            remote,
            link_id,
            role,
            self.local_stream.as_ref(),
            self.link_tx.clone(),
        );
        self.links
            .insert(remote.clone(), PeerLink::new(remote.clone(), role, link_id, transport));
    }

    /// Publish the current roster to the rendering layer.
    fn publish_roster(&self) {
        let links = self
            .links
            .iter()
            .map(|(remote, link)| {
                (
                    remote.clone(),
                    LinkSummary {
                        name: self.names.get(remote).cloned(),
                        state: link.state(),
                        role: link.role(),
                    },
                )
            })
            .collect();
        self.roster_tx.send_replace(RosterSnapshot {
            links,
            is_host: self.is_host,
            ended: None,
        });
    }

    /// Tear everything down and publish the terminal snapshot.
    fn finish(mut self, end: SessionEnd) {
        for (_, link) in self.links.iter_mut() {
            link.close();
        }
        let links = self
            .links
            .iter()
            .map(|(remote, link)| {
                (
                    remote.clone(),
                    LinkSummary {
                        name: self.names.get(remote).cloned(),
                        state: link.state(),
                        role: link.role(),
                    },
                )
            })
            .collect();
        self.roster_tx.send_replace(RosterSnapshot {
            links,
            is_host: self.is_host,
            ended: Some(end),
        });
        info!(target: "mesh.orchestrator", ?end, "MeshOrchestrator stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mock::MockLinkFactory;
    use common::protocol::MemberInfo;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Fixture {
        handle: MeshHandle,
        server_tx: mpsc::Sender<ServerEvent>,
        client_rx: mpsc::Receiver<ClientEvent>,
        controls: crate::mock::MockControls,
    }

    fn spawn_orchestrator() -> Fixture {
        let factory = MockLinkFactory::new();
        let controls = factory.controls();
        let (client_tx, client_rx) = mpsc::channel(64);
        let (server_tx, server_rx) = mpsc::channel(64);
        let config = MeshConfig {
            room_id: "standup".to_string(),
            display_name: "local".to_string(),
            password: String::new(),
            session_id: SessionId::from("sess-local"),
        };
        let (handle, _task) = MeshOrchestrator::spawn(
            config,
            Box::new(factory),
            Some(StreamHandle::new("cam-0")),
            client_tx,
            server_rx,
            CancellationToken::new(),
        );
        Fixture {
            handle,
            server_tx,
            client_rx,
            controls,
        }
    }

    async fn next_client_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_join_sent_on_startup() {
        let mut fx = spawn_orchestrator();
        let ClientEvent::Join { room_id, session_id, .. } =
            next_client_event(&mut fx.client_rx).await
        else {
            panic!("expected join");
        };
        assert_eq!(room_id, "standup");
        assert_eq!(session_id, Some(SessionId::from("sess-local")));
    }

    #[tokio::test]
    async fn test_roster_creates_initiator_links() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::JoinAccepted {
                session_id: SessionId::from("sess-local"),
                roster: vec![
                    MemberInfo { id: SessionId::from("sess-a"), name: "A".to_string() },
                    MemberInfo { id: SessionId::from("sess-b"), name: "B".to_string() },
                ],
            })
            .await
            .unwrap();

        // Each initiator transport emits an offer, relayed as a signal.
        for _ in 0..2 {
            let ClientEvent::Signal { .. } = next_client_event(&mut fx.client_rx).await else {
                panic!("expected signal");
            };
        }
        assert_eq!(fx.controls.created_count(), 2);
        assert_eq!(
            fx.controls.latest_role(&SessionId::from("sess-a")),
            Some(LinkRole::Initiator)
        );
    }

    #[tokio::test]
    async fn test_duplicate_signal_never_duplicates_link() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::JoinAccepted {
                session_id: SessionId::from("sess-local"),
                roster: vec![],
            })
            .await
            .unwrap();

        let offer = serde_json::json!({"kind": "offer"});
        for _ in 0..2 {
            fx.server_tx
                .send(ServerEvent::Signal {
                    from: SessionId::from("sess-a"),
                    payload: offer.clone(),
                })
                .await
                .unwrap();
        }

        // Both deliveries produce an answer from the same responder link.
        for _ in 0..2 {
            let ClientEvent::Signal { to, .. } = next_client_event(&mut fx.client_rx).await else {
                panic!("expected signal");
            };
            assert_eq!(to, SessionId::from("sess-a"));
        }
        assert_eq!(fx.controls.created_count(), 1);
        assert_eq!(
            fx.controls.latest_role(&SessionId::from("sess-a")),
            Some(LinkRole::Responder)
        );
    }

    #[tokio::test]
    async fn test_failure_emits_one_reconnect_request() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::JoinAccepted {
                session_id: SessionId::from("sess-local"),
                roster: vec![MemberInfo { id: SessionId::from("sess-a"), name: "A".to_string() }],
            })
            .await
            .unwrap();
        let _offer = next_client_event(&mut fx.client_rx).await;

        assert!(fx.controls.fail(&SessionId::from("sess-a")));
        let ClientEvent::ReconnectRequest { target } = next_client_event(&mut fx.client_rx).await
        else {
            panic!("expected reconnect request");
        };
        assert_eq!(target, SessionId::from("sess-a"));

        // Same failure episode: a second report must not re-notify.
        assert!(fx.controls.fail(&SessionId::from("sess-a")));
        assert!(timeout(Duration::from_millis(50), fx.client_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_offer_for_failed_link_replaces_it_as_responder() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::JoinAccepted {
                session_id: SessionId::from("sess-local"),
                roster: vec![MemberInfo { id: SessionId::from("sess-a"), name: "A".to_string() }],
            })
            .await
            .unwrap();
        let _offer = next_client_event(&mut fx.client_rx).await;

        assert!(fx.controls.fail(&SessionId::from("sess-a")));
        let ClientEvent::ReconnectRequest { .. } = next_client_event(&mut fx.client_rx).await
        else {
            panic!("expected reconnect request");
        };

        // The remote side re-initiated: its fresh offer replaces the
        // failed link and is answered.
        fx.server_tx
            .send(ServerEvent::Signal {
                from: SessionId::from("sess-a"),
                payload: serde_json::json!({"kind": "offer"}),
            })
            .await
            .unwrap();
        let ClientEvent::Signal { to, payload } = next_client_event(&mut fx.client_rx).await else {
            panic!("expected signal");
        };
        assert_eq!(to, SessionId::from("sess-a"));
        assert_eq!(payload.get("kind").and_then(serde_json::Value::as_str), Some("answer"));
        assert_eq!(fx.controls.created_count(), 2);
        assert_eq!(
            fx.controls.latest_role(&SessionId::from("sess-a")),
            Some(LinkRole::Responder)
        );
    }

    #[tokio::test]
    async fn test_reconnect_request_for_unknown_member_initiates() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::JoinAccepted {
                session_id: SessionId::from("sess-local"),
                roster: vec![],
            })
            .await
            .unwrap();

        // No link, no roster entry: the request may arrive before the
        // member_joined for that identity, and must still re-initiate.
        fx.server_tx
            .send(ServerEvent::ReconnectRequest { from: SessionId::from("sess-a") })
            .await
            .unwrap();

        let ClientEvent::Signal { to, payload } = next_client_event(&mut fx.client_rx).await else {
            panic!("expected signal");
        };
        assert_eq!(to, SessionId::from("sess-a"));
        assert_eq!(payload.get("kind").and_then(serde_json::Value::as_str), Some("offer"));
        assert_eq!(fx.controls.created_count(), 1);
        assert_eq!(
            fx.controls.latest_role(&SessionId::from("sess-a")),
            Some(LinkRole::Initiator)
        );
    }

    #[tokio::test]
    async fn test_reconnect_request_reinitiates_fresh_link() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        // Existing responder link to sess-a.
        fx.server_tx
            .send(ServerEvent::JoinAccepted {
                session_id: SessionId::from("sess-local"),
                roster: vec![],
            })
            .await
            .unwrap();
        fx.server_tx
            .send(ServerEvent::Signal {
                from: SessionId::from("sess-a"),
                payload: serde_json::json!({"kind": "offer"}),
            })
            .await
            .unwrap();
        let _answer = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::ReconnectRequest { from: SessionId::from("sess-a") })
            .await
            .unwrap();

        // The replacement link initiates: a fresh offer goes out.
        let ClientEvent::Signal { to, payload } = next_client_event(&mut fx.client_rx).await else {
            panic!("expected signal");
        };
        assert_eq!(to, SessionId::from("sess-a"));
        assert_eq!(payload.get("kind").and_then(serde_json::Value::as_str), Some("offer"));
        assert_eq!(fx.controls.created_count(), 2);
        assert_eq!(
            fx.controls.latest_role(&SessionId::from("sess-a")),
            Some(LinkRole::Initiator)
        );
        // The stale link is closed, and no reconnect request leaks from its
        // teardown (its events are stale by link id).
        assert!(timeout(Duration::from_millis(50), fx.client_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_member_left_tears_down_link() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::JoinAccepted {
                session_id: SessionId::from("sess-local"),
                roster: vec![MemberInfo { id: SessionId::from("sess-a"), name: "A".to_string() }],
            })
            .await
            .unwrap();
        let _offer = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::MemberLeft { id: SessionId::from("sess-a") })
            .await
            .unwrap();

        let mut roster = fx.handle.roster();
        timeout(Duration::from_secs(1), async {
            loop {
                if roster.borrow().links.is_empty() {
                    break;
                }
                roster.changed().await.unwrap();
            }
        })
        .await
        .expect("link never torn down");
        assert_eq!(fx.controls.latest_closed(&SessionId::from("sess-a")), Some(true));
    }

    #[tokio::test]
    async fn test_kicked_ends_session() {
        let mut fx = spawn_orchestrator();
        let _join = next_client_event(&mut fx.client_rx).await;

        fx.server_tx
            .send(ServerEvent::Kicked { banned: true })
            .await
            .unwrap();

        let mut roster = fx.handle.roster();
        timeout(Duration::from_secs(1), async {
            loop {
                if roster.borrow().ended.is_some() {
                    break;
                }
                roster.changed().await.unwrap();
            }
        })
        .await
        .expect("session never ended");
        assert_eq!(
            roster.borrow().ended,
            Some(SessionEnd::Kicked { banned: true })
        );
    }
}
