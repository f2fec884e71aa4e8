//! Room Controller error types.
//!
//! Per-command errors are returned synchronously and leave session state
//! unchanged. Asynchronous outcomes (pairing rejected, connection lost) are
//! never errors here: they arrive as [`crate::events::RoomEvent`]s.

use crate::native::NativeError;
use thiserror::Error;

/// Room Controller error type.
///
/// Maps to HTTP-style status codes for the routing collaborator:
/// - `RoomNotFound`: 404
/// - `AlreadyPaired`, `AlreadyPairing`: 409
/// - `NativeCallFailed`: 502
/// - `SubscriberOverflow`, `SubscriptionClosed`: 410
/// - `PumpFailure`, `ShuttingDown`: 503
/// - `Config`, `Internal`: 500
#[derive(Debug, Error)]
pub enum RoomError {
    /// Command targets a room id that is not in the registry.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Pair requested for a room that is already connected.
    #[error("Room already paired: {0}")]
    AlreadyPaired(String),

    /// Pair requested while a previous pairing is still in flight.
    #[error("Room pairing already in progress: {0}")]
    AlreadyPairing(String),

    /// The native runtime rejected the operation (or its precondition failed).
    #[error("Native call failed for room {room_id}: code {code}")]
    NativeCallFailed { room_id: String, code: i32 },

    /// The subscriber's delivery queue overflowed and it was disconnected.
    #[error("Subscriber queue overflowed for room {0}")]
    SubscriberOverflow(String),

    /// The subscription was closed (unsubscribed or controller shut down).
    #[error("Subscription closed")]
    SubscriptionClosed,

    /// The heartbeat pump failed; not locally recoverable.
    #[error("Heartbeat pump failure: {0}")]
    PumpFailure(String),

    /// The controller is shutting down and accepts no new work.
    #[error("Room controller is shutting down")]
    ShuttingDown,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Build a `NativeCallFailed` from a native-layer error.
    pub fn native(room_id: &str, err: &NativeError) -> Self {
        RoomError::NativeCallFailed {
            room_id: room_id.to_string(),
            code: err.code(),
        }
    }

    /// Returns the HTTP-style status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            RoomError::RoomNotFound(_) => 404,
            RoomError::AlreadyPaired(_) | RoomError::AlreadyPairing(_) => 409,
            RoomError::SubscriberOverflow(_) | RoomError::SubscriptionClosed => 410,
            RoomError::NativeCallFailed { .. } => 502,
            RoomError::PumpFailure(_) | RoomError::ShuttingDown => 503,
            RoomError::Config(_) | RoomError::Internal(_) => 500,
        }
    }

    /// Returns a caller-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::RoomNotFound(_) => "Room not found".to_string(),
            RoomError::AlreadyPaired(_) => "Room is already paired".to_string(),
            RoomError::AlreadyPairing(_) => "Room pairing is already in progress".to_string(),
            RoomError::NativeCallFailed { code, .. } => {
                format!("Room runtime rejected the request (code {code})")
            }
            RoomError::SubscriberOverflow(_) => {
                "Event stream fell too far behind and was closed".to_string()
            }
            RoomError::SubscriptionClosed => "Event stream closed".to_string(),
            RoomError::PumpFailure(_) | RoomError::ShuttingDown => {
                "Service is shutting down, please retry later".to_string()
            }
            RoomError::Config(_) | RoomError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Whether this error requires process-wide shutdown.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, RoomError::PumpFailure(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::native::result_code;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(RoomError::RoomNotFound("room1".to_string()).status_code(), 404);
        assert_eq!(RoomError::AlreadyPaired("room1".to_string()).status_code(), 409);
        assert_eq!(RoomError::AlreadyPairing("room1".to_string()).status_code(), 409);
        assert_eq!(
            RoomError::NativeCallFailed {
                room_id: "room1".to_string(),
                code: 1
            }
            .status_code(),
            502
        );
        assert_eq!(
            RoomError::SubscriberOverflow("room1".to_string()).status_code(),
            410
        );
        assert_eq!(RoomError::PumpFailure("boom".to_string()).status_code(), 503);
        assert_eq!(RoomError::ShuttingDown.status_code(), 503);
        assert_eq!(RoomError::Internal("x".to_string()).status_code(), 500);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = RoomError::Internal("actor for room1 panicked at src/actors/room.rs".to_string());
        assert!(!err.client_message().contains("room.rs"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = RoomError::PumpFailure("segfault in libvendor.so".to_string());
        assert!(!err.client_message().contains("libvendor"));
    }

    #[test]
    fn test_native_conversion_keeps_code() {
        let err = RoomError::native("room1", &NativeError::Rejected {
            code: result_code::INVALID_STATE,
        });
        assert!(matches!(
            err,
            RoomError::NativeCallFailed { ref room_id, code } if room_id == "room1" && code == result_code::INVALID_STATE
        ));
    }

    #[test]
    fn test_only_pump_failure_is_fatal() {
        assert!(RoomError::PumpFailure("x".to_string()).is_fatal());
        assert!(!RoomError::ShuttingDown.is_fatal());
        assert!(!RoomError::RoomNotFound("r".to_string()).is_fatal());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                RoomError::NativeCallFailed {
                    room_id: "room1".to_string(),
                    code: 2
                }
            ),
            "Native call failed for room room1: code 2"
        );
        assert_eq!(
            format!("{}", RoomError::RoomNotFound("room9".to_string())),
            "Room not found: room9"
        );
    }
}
