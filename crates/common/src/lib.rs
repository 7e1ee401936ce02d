//! Common types shared between the Roomlink relay and mesh client.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for the signaling wire protocol
pub mod protocol;
