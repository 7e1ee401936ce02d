//! Room and member state container.
//!
//! `RoomRegistry` is the single authoritative store for room membership,
//! passwords, ban lists, and host assignment. The coordinator task is its
//! sole owner, so every operation is synchronous and lock-free.
//!
//! Lifecycle invariants enforced here, in one place:
//! - a room exists iff it has at least one member; the record is dropped
//!   synchronously inside [`RoomRegistry::remove_channel`] the moment
//!   membership reaches zero, never between events
//! - the password is fixed by the founding member for the room's whole
//!   remaining lifetime
//! - a non-empty room has exactly one host, always a current member,
//!   re-elected in join order when the host departs

use common::types::{ChannelId, SessionId};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// One member's participation record within a room.
#[derive(Debug, Clone)]
pub struct Member {
    /// Durable session identity; roster and moderation key.
    pub session: SessionId,
    /// Current signaling connection.
    pub channel: ChannelId,
    /// Display name, already sanitized.
    pub name: String,
    /// Network address, recorded for bans.
    pub addr: IpAddr,
}

/// A named rendezvous point for a group call.
#[derive(Debug)]
struct Room {
    /// Fixed at creation by the founding member; empty means public.
    password: String,
    /// Members in join order. Join order doubles as host-succession order.
    members: Vec<Member>,
    /// Addresses refused at the join gate. Cleared with the room.
    banned: HashSet<IpAddr>,
    /// Current host's session identity.
    host: SessionId,
}

/// Outcome of removing a channel from the registry.
#[derive(Debug)]
pub struct Removal {
    /// Room the channel was a member of.
    pub room_id: String,
    /// The removed member record.
    pub member: Member,
    /// Whether the room was garbage-collected (membership hit zero).
    pub room_destroyed: bool,
    /// Member promoted to host by this removal, if any.
    pub promoted_host: Option<Member>,
}

/// Point-in-time view of one room, for queries and tests.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    /// Sessions in join order.
    pub members: Vec<SessionId>,
    /// Current host.
    pub host: SessionId,
    /// Room password (empty = public).
    pub password: String,
    /// Banned addresses.
    pub banned: Vec<IpAddr>,
}

/// Authoritative room/member store. Sole writer: the coordinator task.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    /// Reverse index: which room each live channel belongs to.
    channel_index: HashMap<ChannelId, String>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a room currently exists (i.e. has members).
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of members in a room, zero if the room does not exist.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.members.len())
    }

    /// The room's password, if the room exists.
    #[must_use]
    pub fn password(&self, room_id: &str) -> Option<&str> {
        self.rooms.get(room_id).map(|r| r.password.as_str())
    }

    /// Whether `addr` is banned in `room_id`. Bans do not survive room
    /// destruction, so a missing room means not banned.
    #[must_use]
    pub fn is_banned(&self, room_id: &str, addr: IpAddr) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|r| r.banned.contains(&addr))
    }

    /// Record `addr` in the room's ban set.
    pub fn ban_address(&mut self, room_id: &str, addr: IpAddr) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.banned.insert(addr);
        }
    }

    /// Add a member, creating the room if absent. Room creation fixes the
    /// supplied password for the room's lifetime; later values are ignored.
    ///
    /// Returns whether the member became host (true exactly for founders).
    pub fn add_member(&mut self, room_id: &str, password: &str, member: Member) -> bool {
        let channel = member.channel;
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| Room {
            password: password.to_string(),
            members: Vec::new(),
            banned: HashSet::new(),
            host: member.session.clone(),
        });
        let became_host = room.members.is_empty();
        if became_host {
            room.host = member.session.clone();
        }
        room.members.push(member);
        self.channel_index.insert(channel, room_id.to_string());
        became_host
    }

    /// Remove whatever member is bound to `channel`.
    ///
    /// Garbage-collects the room at zero members and re-elects the host in
    /// join order when the departing member held it. Returns `None` if the
    /// channel was not a member anywhere (already removed, or never joined).
    pub fn remove_channel(&mut self, channel: ChannelId) -> Option<Removal> {
        let room_id = self.channel_index.remove(&channel)?;
        let room = self.rooms.get_mut(&room_id)?;
        let idx = room.members.iter().position(|m| m.channel == channel)?;
        let member = room.members.remove(idx);

        if room.members.is_empty() {
            self.rooms.remove(&room_id);
            return Some(Removal {
                room_id,
                member,
                room_destroyed: true,
                promoted_host: None,
            });
        }

        let promoted_host = if room.host == member.session {
            self.elect_host(&room_id).cloned()
        } else {
            None
        };

        Some(Removal {
            room_id,
            member,
            room_destroyed: false,
            promoted_host,
        })
    }

    /// Promote the earliest-joined member to host.
    ///
    /// Returns the new host if the assignment changed.
    pub fn elect_host(&mut self, room_id: &str) -> Option<&Member> {
        let room = self.rooms.get_mut(room_id)?;
        let earliest = room.members.first()?;
        if room.host == earliest.session {
            return None;
        }
        room.host = earliest.session.clone();
        room.members.first()
    }

    /// Current host session, if the room exists.
    #[must_use]
    pub fn host(&self, room_id: &str) -> Option<&SessionId> {
        self.rooms.get(room_id).map(|r| &r.host)
    }

    /// Members of a room in join order.
    #[must_use]
    pub fn members(&self, room_id: &str) -> &[Member] {
        self.rooms.get(room_id).map_or(&[], |r| r.members.as_slice())
    }

    /// The member bound to `channel`, with its room.
    #[must_use]
    pub fn member_by_channel(&self, channel: ChannelId) -> Option<(&str, &Member)> {
        let room_id = self.channel_index.get(&channel)?;
        let room = self.rooms.get(room_id)?;
        let member = room.members.iter().find(|m| m.channel == channel)?;
        Some((room_id.as_str(), member))
    }

    /// The member holding `session` within one room.
    #[must_use]
    pub fn member_by_session(&self, room_id: &str, session: &SessionId) -> Option<&Member> {
        self.rooms
            .get(room_id)?
            .members
            .iter()
            .find(|m| &m.session == session)
    }

    /// Snapshot one room for queries and tests.
    #[must_use]
    pub fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let room = self.rooms.get(room_id)?;
        Some(RoomSnapshot {
            members: room.members.iter().map(|m| m.session.clone()).collect(),
            host: room.host.clone(),
            password: room.password.clone(),
            banned: room.banned.iter().copied().collect(),
        })
    }
}
