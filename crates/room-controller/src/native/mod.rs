//! Gateway to the native room control runtime.
//!
//! The runtime is an opaque, synchronous, non-reentrant library. This module
//! describes the contract the rest of the crate relies on:
//!
//! - One process-wide [`NativeRuntime`] instance.
//! - [`NativeRuntime::heartbeat`] is the pump. Only the heartbeat driver calls
//!   it, and it delivers queued callbacks synchronously into a [`CallbackSink`]
//!   before returning.
//! - Per-room [`NativeRoomHandle`]s take `&mut self` for every operation. The
//!   handle is owned by exactly one room actor, so calls on one handle can
//!   never overlap.
//! - Callbacks carry the room id they belong to. There is one fixed sink for
//!   the whole runtime rather than a sink object per room.
//!
//! [`loopback::LoopbackRuntime`] is an in-process implementation used when
//! no vendor library is linked, and by the test suites.

pub mod loopback;
mod types;

pub use types::{
    ConnectionState, DeviceProfile, ExitMeetingCmd, MeetingStatus, PairedRoomInfo, UnpairReason,
};

use thiserror::Error;

/// Raw result codes returned by the runtime.
pub mod result_code {
    /// Call accepted.
    pub const SUCCESS: i32 = 0;
    /// Runtime internal failure.
    pub const INTERNAL_ERROR: i32 = 1;
    /// The room is not in a state that allows this operation.
    pub const INVALID_STATE: i32 = 2;
    /// An argument was rejected (e.g. malformed activation code).
    pub const INVALID_PARAMETER: i32 = 3;
    /// The room has no stored credentials.
    pub const NOT_PAIRED: i32 = 4;
}

/// Error returned by the native layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    /// The runtime returned a non-success result code.
    #[error("runtime rejected call with code {code}")]
    Rejected { code: i32 },

    /// The runtime cannot service calls at all.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

impl NativeError {
    /// Numeric code reported to callers.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            NativeError::Rejected { code } => *code,
            NativeError::Unavailable(_) => result_code::INTERNAL_ERROR,
        }
    }

    /// Convert a raw runtime result code.
    pub fn check(code: i32) -> Result<(), NativeError> {
        if code == result_code::SUCCESS {
            Ok(())
        } else {
            Err(NativeError::Rejected { code })
        }
    }
}

/// A callback raised by the runtime during a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCallback {
    /// Outcome of an activation-code pairing. `result == 0` is success.
    PairRoomResult { room_id: String, result: i32 },
    /// The remote side dropped the room's credentials.
    RoomUnpaired {
        room_id: String,
        reason: UnpairReason,
    },
    /// Connection to the room endpoint changed.
    ConnectionStateChanged {
        room_id: String,
        state: ConnectionState,
    },
    /// Meeting status changed.
    MeetingStatusUpdated {
        room_id: String,
        status: MeetingStatus,
    },
    /// The room's conference is ready for meeting control.
    ConfReady { room_id: String },
    /// The room left a meeting.
    ExitMeeting { room_id: String },
}

impl NativeCallback {
    /// Room the callback belongs to.
    #[must_use]
    pub fn room_id(&self) -> &str {
        match self {
            NativeCallback::PairRoomResult { room_id, .. }
            | NativeCallback::RoomUnpaired { room_id, .. }
            | NativeCallback::ConnectionStateChanged { room_id, .. }
            | NativeCallback::MeetingStatusUpdated { room_id, .. }
            | NativeCallback::ConfReady { room_id }
            | NativeCallback::ExitMeeting { room_id } => room_id,
        }
    }
}

/// Receives callbacks synchronously while the runtime pumps.
///
/// Implementations must not block: they run inside the heartbeat tick.
pub trait CallbackSink {
    fn on_callback(&mut self, callback: NativeCallback);
}

impl CallbackSink for Vec<NativeCallback> {
    fn on_callback(&mut self, callback: NativeCallback) {
        self.push(callback);
    }
}

/// The process-wide runtime singleton.
pub trait NativeRuntime: Send + Sync + 'static {
    /// Register the device profile and credential directory. Called once at startup.
    fn initialize(&self, profile: &DeviceProfile) -> Result<(), NativeError>;

    /// Rooms with stored credentials from a previous run.
    fn query_previously_paired_rooms(&self) -> Result<Vec<PairedRoomInfo>, NativeError>;

    /// Create (or reopen) the handle for a room. Idempotent per room id in the runtime.
    fn create_room_handle(&self, room_id: &str) -> Result<Box<dyn NativeRoomHandle>, NativeError>;

    /// Advance the runtime and deliver pending callbacks into `sink`.
    ///
    /// Any error is unrecoverable for the process.
    fn heartbeat(&self, sink: &mut dyn CallbackSink) -> Result<(), NativeError>;

    /// Destroy the runtime singleton. Called after every handle was released.
    fn shutdown(&self);
}

/// Exclusive handle to one room inside the runtime.
///
/// Every call may block for as long as the runtime takes; callers run them
/// off the async executor.
pub trait NativeRoomHandle: Send + 'static {
    fn room_id(&self) -> &str;

    /// Start an asynchronous pairing. The outcome arrives as `PairRoomResult`.
    fn pair_with_activation_code(&mut self, activation_code: &str) -> Result<(), NativeError>;

    fn unpair(&mut self) -> Result<(), NativeError>;

    /// Re-run the pairing handshake with stored credentials.
    fn retry_pair(&mut self) -> Result<(), NativeError>;

    fn connection_state(&mut self) -> Result<ConnectionState, NativeError>;

    fn start_instant_meeting(&mut self) -> Result<(), NativeError>;

    fn join_meeting(&mut self, meeting_number: &str, password: &str) -> Result<(), NativeError>;

    fn exit_meeting(&mut self, cmd: ExitMeetingCmd) -> Result<(), NativeError>;

    fn mute_audio(&mut self, mute: bool) -> Result<(), NativeError>;

    fn mute_video(&mut self, mute: bool) -> Result<(), NativeError>;

    /// Release the handle. No callback for this room is raised afterwards.
    fn release(self: Box<Self>);
}
