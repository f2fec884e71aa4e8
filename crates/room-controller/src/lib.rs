//! Room Controller Library
//!
//! Session core in front of a native meeting-room control runtime. The
//! runtime is synchronous, non-reentrant and needs a periodic pump; this
//! crate turns it into an async, concurrent API:
//!
//! - Pairing, unpairing and meeting commands per room
//! - A fixed-cadence heartbeat that drains native callbacks
//! - Per-room event subscriptions with bounded, independent queues
//! - Ordered startup (paired rooms loaded before the first command) and
//!   ordered shutdown (heartbeat, subscribers, handles, runtime)
//!
//! # Architecture
//!
//! ```text
//! RoomController
//! ├── SessionRegistry (room id -> RoomSession)
//! │   └── RoomActor (one per room, owns the native handle)
//! ├── EventBroadcaster (room id -> subscriber queues)
//! └── HeartbeatDriver (dedicated thread, sole caller of the pump)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Room actors, their status and the session registry
//! - [`config`] - Service configuration from environment
//! - [`controller`] - Command and subscription surface
//! - [`errors`] - Error types with stable codes
//! - [`events`] - Room events and the broadcaster
//! - [`heartbeat`] - Fixed-cadence pump driver
//! - [`native`] - Native runtime contract and the loopback runtime
//! - [`observability`] - Health endpoints and metrics

pub mod actors;
pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod heartbeat;
pub mod native;
pub mod observability;

pub use controller::{ControllerSettings, RoomController};
pub use errors::RoomError;
