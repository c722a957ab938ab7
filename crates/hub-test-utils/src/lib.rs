//! # Hub Test Utilities
//!
//! Shared test utilities for the Signaling Hub.
//!
//! This crate provides fixtures and an in-memory transport for exercising
//! the hub and its connection actors without sockets or Redis.
//!
//! ## Modules
//!
//! - `fixtures` - Identities and client messages
//! - `mock_transport` - In-memory duplex standing in for a WebSocket
//! - `assertions` - Waiting and registry helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let hub = test_hub();
//!     let mut alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;
//!     let mut bob = TestClient::connect(&hub, TestPeer::new("bob"), "m1").await;
//!
//!     let joined = alice.next_message().await;
//!     assert_eq!(joined.from.as_str(), "bob");
//!
//!     bob.send_json(fixtures::offer("alice", "v=0"));
//!     let offer = alice.next_message().await;
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_transport;

pub use assertions::*;
pub use fixtures::*;
pub use mock_transport::*;

use signaling_hub::actors::{ActorMetrics, SignalingHubHandle};

/// Spawn a hub with no storage mirror.
#[must_use]
pub fn test_hub() -> SignalingHubHandle {
    SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None)
}
