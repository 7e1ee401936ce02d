//! Test utilities for the Roomlink relay and mesh client.
//!
//! - [`harness`] - in-process relay on an ephemeral port
//! - [`client`] - scripted raw WebSocket signaling client
//!
//! ```rust,ignore
//! use test_utils::harness::RelayHarness;
//! use test_utils::client::TestClient;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let relay = RelayHarness::start().await;
//!     let mut alice = TestClient::connect(relay.url()).await;
//!     alice.join("standup", "Alice", "", Some("sess-alice")).await;
//!     let accepted = alice.recv().await;
//!     // ...
//!     relay.shutdown().await;
//! }
//! ```

pub mod client;
pub mod harness;
