//! Roomlink mesh client.
//!
//! Client-side orchestration of a full-mesh group call: one signaling
//! channel to the relay, one peer link per other room member.
//!
//! ```text
//!   SignalChannel (WebSocket to relay)
//!        |  ServerEvent / ClientEvent
//!        v
//!   MeshOrchestrator ---- watch ----> RosterSnapshot (rendering layer)
//!        |
//!        | LinkFactory::create per remote member
//!        v
//!   PeerLink { LinkTransport }   (media stack behind the seam)
//! ```
//!
//! The media stack itself is external: [`transport::LinkTransport`] and
//! [`transport::LinkFactory`] are the boundary, and [`mock`] provides a
//! scripted in-memory implementation for tests.

pub mod errors;
pub mod link;
pub mod mesh;
pub mod mock;
pub mod signal;
pub mod transport;
