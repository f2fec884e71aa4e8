//! Message types for room actor communication.
//!
//! Commands are sent over `tokio::sync::mpsc`; each carries a
//! `tokio::sync::oneshot` for the request-reply. A reply only says whether
//! the runtime accepted the request. Outcomes arrive later as events.

use crate::errors::RoomError;
use crate::native::{ConnectionState, ExitMeetingCmd};

use serde::Serialize;
use tokio::sync::oneshot;

/// Reply channel for commands without a value.
pub type Reply = oneshot::Sender<Result<(), RoomError>>;

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Start pairing with an activation code.
    Pair {
        activation_code: String,
        respond_to: Reply,
    },

    /// Drop the room's credentials in the runtime.
    Unpair { respond_to: Reply },

    /// Re-run the pairing handshake with stored credentials.
    RetryPair { respond_to: Reply },

    StartInstantMeeting { respond_to: Reply },

    JoinMeeting {
        meeting_number: String,
        password: String,
        respond_to: Reply,
    },

    ExitMeeting {
        cmd: ExitMeetingCmd,
        respond_to: Reply,
    },

    SetAudioMute { mute: bool, respond_to: Reply },

    SetVideoMute { mute: bool, respond_to: Reply },

    /// Ask the runtime for the live connection state.
    QueryConnectionState {
        respond_to: oneshot::Sender<Result<ConnectionState, RoomError>>,
    },

    /// Stop taking commands if the room never started pairing.
    ///
    /// Replies whether the room retired. A retired room refuses every later
    /// command with `RoomNotFound` and keeps its handle until `Release`.
    Retire { respond_to: oneshot::Sender<bool> },

    /// Release the native handle and stop the actor.
    Release { respond_to: oneshot::Sender<()> },
}

impl RoomMessage {
    /// Command name for logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RoomMessage::Pair { .. } => "pair",
            RoomMessage::Unpair { .. } => "unpair",
            RoomMessage::RetryPair { .. } => "retry_pair",
            RoomMessage::StartInstantMeeting { .. } => "start_instant_meeting",
            RoomMessage::JoinMeeting { .. } => "join_meeting",
            RoomMessage::ExitMeeting { .. } => "exit_meeting",
            RoomMessage::SetAudioMute { .. } => "set_audio_mute",
            RoomMessage::SetVideoMute { .. } => "set_video_mute",
            RoomMessage::QueryConnectionState { .. } => "connection_state",
            RoomMessage::Retire { .. } => "retire",
            RoomMessage::Release { .. } => "release",
        }
    }

    /// Answer the message with `error` without running it.
    pub fn reject(self, error: RoomError) {
        // Callers may have gone away
        match self {
            RoomMessage::Pair { respond_to, .. }
            | RoomMessage::Unpair { respond_to }
            | RoomMessage::RetryPair { respond_to }
            | RoomMessage::StartInstantMeeting { respond_to }
            | RoomMessage::JoinMeeting { respond_to, .. }
            | RoomMessage::ExitMeeting { respond_to, .. }
            | RoomMessage::SetAudioMute { respond_to, .. }
            | RoomMessage::SetVideoMute { respond_to, .. } => {
                let _ = respond_to.send(Err(error));
            }
            RoomMessage::QueryConnectionState { respond_to } => {
                let _ = respond_to.send(Err(error));
            }
            RoomMessage::Retire { respond_to } => {
                let _ = respond_to.send(false);
            }
            RoomMessage::Release { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }
}

/// Acknowledgement that a command was accepted by the runtime.
///
/// Acceptance is not success: the outcome is delivered as an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandAck {
    pub room_id: String,
    pub command: &'static str,
    pub accepted: bool,
}

impl CommandAck {
    #[must_use]
    pub fn accepted(room_id: &str, command: &'static str) -> Self {
        Self {
            room_id: room_id.to_string(),
            command,
            accepted: true,
        }
    }
}
