//! # Room Controller Test Utilities
//!
//! Shared test utilities for the Room Controller.
//!
//! ## Modules
//!
//! - `fixtures` - Room ids, activation codes and controller settings
//! - `harness` - A started controller on a loopback runtime
//! - `events` - Waiting on and draining event subscriptions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestController::start().await;
//!     let room = TestRoom::random();
//!
//!     let mut events = harness.pair_and_connect(&room.id).await;
//!     harness.controller.start_instant_meeting(&room.id).await.unwrap();
//!     wait_for_meeting_status(&mut events, MeetingStatus::InMeeting).await;
//!
//!     harness.shutdown().await;
//! }
//! ```

pub mod events;
pub mod fixtures;
pub mod harness;

pub use events::*;
pub use fixtures::*;
pub use harness::*;

// Common room-controller types tests reach for alongside the helpers
pub use room_controller::events::{EventKind, RoomEvent};
pub use room_controller::native::loopback::LoopbackRuntime;
pub use room_controller::native::{ConnectionState, MeetingStatus, NativeCallback};
