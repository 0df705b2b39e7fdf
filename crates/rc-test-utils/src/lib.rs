//! # RC Test Utilities
//!
//! Shared test utilities for the Room Coordinator.
//!
//! Provides mock implementations and fixtures for testing the actor
//! system without real infrastructure:
//!
//! - `mock_media` - recording media-control mock
//! - `fixtures` - registry/room spawning and event stream helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestCoordinator::spawn();
//!
//!     let room = harness.registry.get_or_create("r1").await.unwrap();
//!     let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
//!     // ...
//!     let event = next_event(&mut teacher.events).await;
//!     assert!(harness.media.disconnect_calls().is_empty());
//! }
//! ```

pub mod fixtures;
pub mod mock_media;

pub use fixtures::*;
pub use mock_media::*;
