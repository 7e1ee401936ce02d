//! Roomlink Relay Library
//!
//! The relay is a stateful WebSocket signaling server that brokers the
//! connection-setup handshake for mesh video calls. It owns the
//! authoritative room, member, and session state; it never carries media.
//!
//! # Architecture
//!
//! One mailbox actor per concern:
//!
//! ```text
//! CoordinatorActor (singleton per relay instance)
//! ├── owns RoomRegistry (rooms, members, passwords, bans, hosts)
//! ├── owns SessionIndex (durable session -> live channel)
//! └── serves N ChannelActors
//!     └── ChannelActor (one per WebSocket connection)
//! ```
//!
//! All registry mutation happens on the coordinator task, so join /
//! moderation / disconnect handlers serialize without locks. Channel actors
//! only shuttle frames.
//!
//! # Modules
//!
//! - [`coordinator`] - the room/session state machine
//! - [`registry`] - room and member records
//! - [`sessions`] - durable-session-to-channel bindings
//! - [`channel`] - per-connection WebSocket actor
//! - [`server`] - accept loop
//! - [`config`] - service configuration from environment
//! - [`health`] - liveness/readiness probes
//! - [`errors`] - error types

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod health;
pub mod registry;
pub mod server;
pub mod sessions;
