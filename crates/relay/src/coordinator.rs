//! `CoordinatorActor` - the authoritative room/session state machine.
//!
//! Every signaling channel funnels its events into this single actor, so
//! join, signal, moderation, and disconnect handlers run to completion one
//! at a time and the registry needs no locks. Handlers never perform
//! blocking I/O: event delivery is a bounded `try_send` into each channel's
//! outbox, and timed work (the kick grace period) is a fire-and-forget task.
//!
//! # Join protocol
//!
//! 1. Session takeover: a `session_id` bound to another live channel evicts
//!    that ghost connection first.
//! 2. Banned address -> `join_rejected(banned)` and the channel is closed.
//! 3. Password mismatch -> `join_rejected(wrong_password)`; the channel
//!    stays open so the client can re-prompt without reconnecting.
//! 4. First member into a room becomes host and fixes the room password.
//! 5. Success -> `join_accepted` with the prior-member roster, plus
//!    `member_joined` to everyone already present.

use crate::registry::{Member, RoomRegistry, RoomSnapshot};
use crate::sessions::SessionIndex;

use common::protocol::{sanitize_display_name, ClientEvent, MemberInfo, RejectReason, ServerEvent};
use common::types::{ChannelId, SessionId};

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox buffer for the coordinator.
const COORDINATOR_CHANNEL_BUFFER: usize = 500;

/// Commands delivered to a channel actor's outbox.
#[derive(Debug)]
pub enum ChannelCommand {
    /// Forward an event to the client.
    Deliver(ServerEvent),
    /// Close the connection.
    Close { reason: &'static str },
}

/// Messages accepted by the coordinator.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// A new signaling channel came up.
    Register {
        channel: ChannelId,
        addr: IpAddr,
        outbox: mpsc::Sender<ChannelCommand>,
    },
    /// An event arrived from a client.
    FromClient {
        channel: ChannelId,
        event: ClientEvent,
    },
    /// A signaling channel went away (socket closed, either direction).
    Disconnected { channel: ChannelId },
    /// Query one room's state.
    Snapshot {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomSnapshot>>,
    },
    /// Query coordinator-wide counters.
    Stats {
        respond_to: oneshot::Sender<CoordinatorStats>,
    },
}

/// Coordinator-wide counters, for readiness checks and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Live rooms.
    pub rooms: usize,
    /// Registered signaling channels.
    pub channels: usize,
    /// Bound session identities.
    pub sessions: usize,
}

/// Handle to the coordinator actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    /// Register a signaling channel.
    pub async fn register(
        &self,
        channel: ChannelId,
        addr: IpAddr,
        outbox: mpsc::Sender<ChannelCommand>,
    ) -> bool {
        self.sender
            .send(CoordinatorMessage::Register {
                channel,
                addr,
                outbox,
            })
            .await
            .is_ok()
    }

    /// Forward a client event.
    pub async fn from_client(&self, channel: ChannelId, event: ClientEvent) -> bool {
        self.sender
            .send(CoordinatorMessage::FromClient { channel, event })
            .await
            .is_ok()
    }

    /// Report a channel disconnect.
    pub async fn disconnected(&self, channel: ChannelId) -> bool {
        self.sender
            .send(CoordinatorMessage::Disconnected { channel })
            .await
            .is_ok()
    }

    /// Snapshot one room, `None` if it does not exist.
    pub async fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Snapshot {
                room_id: room_id.to_string(),
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Coordinator-wide counters.
    pub async fn stats(&self) -> Option<CoordinatorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Stats { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Cancel the coordinator (and, via child tokens, its channels).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the coordinator is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for channel actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Registered channel state.
struct ChannelEntry {
    addr: IpAddr,
    outbox: mpsc::Sender<ChannelCommand>,
}

/// The coordinator actor implementation.
pub struct CoordinatorActor {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    registry: RoomRegistry,
    sessions: SessionIndex,
    channels: HashMap<ChannelId, ChannelEntry>,
    kick_grace: Duration,
}

impl CoordinatorActor {
    /// Spawn the coordinator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        kick_grace: Duration,
        cancel_token: CancellationToken,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            registry: RoomRegistry::new(),
            sessions: SessionIndex::new(),
            channels: HashMap::new(),
            kick_grace,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CoordinatorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.coordinator")]
    async fn run(mut self) {
        info!(target: "relay.coordinator", "CoordinatorActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.coordinator",
                        "CoordinatorActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(
                                target: "relay.coordinator",
                                "CoordinatorActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.coordinator",
            rooms = self.registry.room_count(),
            channels = self.channels.len(),
            "CoordinatorActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Register {
                channel,
                addr,
                outbox,
            } => {
                debug!(
                    target: "relay.coordinator",
                    channel = %channel,
                    addr = %addr,
                    "Channel registered"
                );
                self.channels.insert(channel, ChannelEntry { addr, outbox });
            }

            CoordinatorMessage::FromClient { channel, event } => match event {
                ClientEvent::Join {
                    room_id,
                    name,
                    password,
                    session_id,
                } => self.handle_join(channel, &room_id, &name, &password, session_id),
                ClientEvent::Signal { to, payload } => self.handle_signal(channel, &to, payload),
                ClientEvent::ReconnectRequest { target } => {
                    self.handle_reconnect_request(channel, &target);
                }
                ClientEvent::Kick { target } => self.handle_moderation(channel, &target, false),
                ClientEvent::Ban { target } => self.handle_moderation(channel, &target, true),
            },

            CoordinatorMessage::Disconnected { channel } => self.handle_disconnect(channel),

            CoordinatorMessage::Snapshot { room_id, respond_to } => {
                let _ = respond_to.send(self.registry.snapshot(&room_id));
            }

            CoordinatorMessage::Stats { respond_to } => {
                let _ = respond_to.send(CoordinatorStats {
                    rooms: self.registry.room_count(),
                    channels: self.channels.len(),
                    sessions: self.sessions.len(),
                });
            }
        }
    }

    /// Handle a join request.
    #[instrument(skip_all, fields(channel = %channel, room_id = %room_id))]
    fn handle_join(
        &mut self,
        channel: ChannelId,
        room_id: &str,
        name: &str,
        password: &str,
        session_id: Option<SessionId>,
    ) {
        let Some(entry) = self.channels.get(&channel) else {
            warn!(target: "relay.coordinator", "Join from unregistered channel, dropping");
            return;
        };
        let addr = entry.addr;
        let session = session_id.unwrap_or_else(SessionId::random);
        let name = sanitize_display_name(name);

        // A channel re-joining (same or different room) leaves its current
        // room first, so it is never a member of two.
        if self.registry.member_by_channel(channel).is_some() {
            self.remove_membership(channel);
        }

        // Session takeover: evict the ghost channel so a reconnecting user
        // is never counted twice.
        if let Some(old) = self.sessions.channel_for(&session) {
            if old != channel {
                info!(
                    target: "relay.coordinator",
                    session = %session,
                    evicted_channel = %old,
                    "Session takeover, evicting previous channel"
                );
                self.remove_membership(old);
                self.sessions.release(&session, old);
                self.send_command(old, ChannelCommand::Close { reason: "session takeover" });
                self.channels.remove(&old);
            }
        }

        // Ban gate. Bans live in the room record, so they only apply while
        // the room exists.
        if self.registry.is_banned(room_id, addr) {
            debug!(target: "relay.coordinator", addr = %addr, "Rejecting banned address");
            self.deliver(channel, ServerEvent::JoinRejected { reason: RejectReason::Banned });
            self.send_command(channel, ChannelCommand::Close { reason: "banned" });
            return;
        }

        // Password gate. Exact string match, no normalization.
        if let Some(room_password) = self.registry.password(room_id) {
            if !room_password.is_empty() && password != room_password {
                debug!(target: "relay.coordinator", "Rejecting wrong password");
                self.deliver(
                    channel,
                    ServerEvent::JoinRejected { reason: RejectReason::WrongPassword },
                );
                return;
            }
        }

        let member = Member {
            session: session.clone(),
            channel,
            name: name.clone(),
            addr,
        };
        let became_host = self.registry.add_member(room_id, password, member);
        self.sessions.bind(session.clone(), channel);

        let roster: Vec<MemberInfo> = self
            .registry
            .members(room_id)
            .iter()
            .filter(|m| m.channel != channel)
            .map(|m| MemberInfo {
                id: m.session.clone(),
                name: m.name.clone(),
            })
            .collect();
        let others: Vec<ChannelId> = self
            .registry
            .members(room_id)
            .iter()
            .filter(|m| m.channel != channel)
            .map(|m| m.channel)
            .collect();

        self.deliver(
            channel,
            ServerEvent::JoinAccepted {
                session_id: session.clone(),
                roster,
            },
        );
        if became_host {
            self.deliver(channel, ServerEvent::YouAreHost);
        }
        for other in others {
            self.deliver(
                other,
                ServerEvent::MemberJoined {
                    id: session.clone(),
                    name: name.clone(),
                },
            );
        }

        info!(
            target: "relay.coordinator",
            session = %session,
            members = self.registry.member_count(room_id),
            host = became_host,
            "Member joined"
        );
    }

    /// Relay an opaque negotiation payload to a co-room member.
    fn handle_signal(&mut self, channel: ChannelId, to: &SessionId, payload: serde_json::Value) {
        let Some((room_id, sender)) = self.registry.member_by_channel(channel) else {
            debug!(target: "relay.coordinator", channel = %channel, "Signal from non-member, dropping");
            return;
        };
        let from = sender.session.clone();
        let room_id = room_id.to_string();

        let Some(target) = self.registry.member_by_session(&room_id, to) else {
            debug!(
                target: "relay.coordinator",
                to = %to,
                "Signal target not in room, dropping"
            );
            return;
        };
        let target_channel = target.channel;
        self.deliver(target_channel, ServerEvent::Signal { from, payload });
    }

    /// Relay a reconnect request; the requested side re-initiates.
    fn handle_reconnect_request(&mut self, channel: ChannelId, target: &SessionId) {
        let Some((room_id, sender)) = self.registry.member_by_channel(channel) else {
            debug!(
                target: "relay.coordinator",
                channel = %channel,
                "Reconnect request from non-member, dropping"
            );
            return;
        };
        let from = sender.session.clone();
        let room_id = room_id.to_string();

        let Some(member) = self.registry.member_by_session(&room_id, target) else {
            debug!(
                target: "relay.coordinator",
                to = %target,
                "Reconnect target not in room, dropping"
            );
            return;
        };
        let target_channel = member.channel;
        self.deliver(target_channel, ServerEvent::ReconnectRequest { from });
    }

    /// Handle kick/ban. Only the host may moderate; anything else is
    /// silently ignored so host status never leaks through error replies.
    fn handle_moderation(&mut self, channel: ChannelId, target: &SessionId, ban: bool) {
        let Some((room_id, sender)) = self.registry.member_by_channel(channel) else {
            debug!(target: "relay.coordinator", channel = %channel, "Moderation from non-member, ignoring");
            return;
        };
        let sender_session = sender.session.clone();
        let room_id = room_id.to_string();

        if self.registry.host(&room_id) != Some(&sender_session) {
            debug!(
                target: "relay.coordinator",
                from = %sender_session,
                "Moderation from non-host, ignoring"
            );
            return;
        }
        if &sender_session == target {
            debug!(target: "relay.coordinator", "Host self-moderation, ignoring");
            return;
        }
        let Some(member) = self.registry.member_by_session(&room_id, target) else {
            debug!(target: "relay.coordinator", to = %target, "Moderation target not in room, ignoring");
            return;
        };
        let target_channel = member.channel;
        let target_addr = member.addr;

        if ban {
            self.registry.ban_address(&room_id, target_addr);
        }

        info!(
            target: "relay.coordinator",
            room_id = %room_id,
            session = %target,
            banned = ban,
            "Member kicked"
        );

        self.deliver(target_channel, ServerEvent::Kicked { banned: ban });

        // Forced close after a grace period so the notice can flush.
        // Fire-and-forget: the coordinator never sleeps in a handler.
        if let Some(entry) = self.channels.get(&target_channel) {
            let outbox = entry.outbox.clone();
            let grace = self.kick_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = outbox.send(ChannelCommand::Close { reason: "kicked" }).await;
            });
        }
    }

    /// Handle a channel disconnect.
    fn handle_disconnect(&mut self, channel: ChannelId) {
        self.remove_membership(channel);
        if self.channels.remove(&channel).is_some() {
            debug!(target: "relay.coordinator", channel = %channel, "Channel deregistered");
        }
    }

    /// Remove a channel's room membership: drop the member record, release
    /// its session binding, notify the remaining members, and hand host
    /// rights down if needed. The room record disappears here the instant
    /// membership reaches zero.
    fn remove_membership(&mut self, channel: ChannelId) {
        let Some(removal) = self.registry.remove_channel(channel) else {
            return;
        };
        self.sessions.release(&removal.member.session, channel);

        info!(
            target: "relay.coordinator",
            room_id = %removal.room_id,
            session = %removal.member.session,
            room_destroyed = removal.room_destroyed,
            "Member left"
        );

        if removal.room_destroyed {
            return;
        }

        let remaining: Vec<ChannelId> = self
            .registry
            .members(&removal.room_id)
            .iter()
            .map(|m| m.channel)
            .collect();
        for other in remaining {
            self.deliver(
                other,
                ServerEvent::MemberLeft {
                    id: removal.member.session.clone(),
                },
            );
        }

        if let Some(promoted) = removal.promoted_host {
            info!(
                target: "relay.coordinator",
                room_id = %removal.room_id,
                session = %promoted.session,
                "Host succession"
            );
            self.deliver(promoted.channel, ServerEvent::YouAreHost);
        }
    }

    /// Deliver an event to one channel's outbox without blocking the
    /// coordinator. A full outbox means a stalled consumer; the event is
    /// dropped rather than stalling every other room's traffic.
    fn deliver(&self, channel: ChannelId, event: ServerEvent) {
        self.send_command(channel, ChannelCommand::Deliver(event));
    }

    fn send_command(&self, channel: ChannelId, command: ChannelCommand) {
        let Some(entry) = self.channels.get(&channel) else {
            debug!(target: "relay.coordinator", channel = %channel, "Delivery to unknown channel, dropping");
            return;
        };
        if let Err(e) = entry.outbox.try_send(command) {
            warn!(
                target: "relay.coordinator",
                channel = %channel,
                error = %e,
                "Channel outbox full or closed, dropping command"
            );
        }
    }
}
