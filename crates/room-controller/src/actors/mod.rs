//! Room session actors.
//!
//! # Actor Hierarchy
//!
//! ```text
//! RoomController (facade, owns the root CancellationToken)
//! └── SessionRegistry
//!     └── RoomActor (one per room, owns its NativeRoomHandle)
//! ```
//!
//! # Key Design
//!
//! - One mailbox per room: commands on one handle are strictly serialized,
//!   commands on different rooms run in parallel
//! - Room state is shared as atomics (`RoomStatus`) so the heartbeat can
//!   apply events without waiting on a busy actor
//! - Cancellation flows from the controller's token to each room actor

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod state;

pub use messages::{CommandAck, RoomMessage};
pub use metrics::{ActorMetrics, MailboxLevel, MailboxMonitor};
pub use registry::SessionRegistry;
pub use room::{RoomActor, RoomSession, RoomSettings};
pub use state::{RoomSnapshot, RoomStatus};
