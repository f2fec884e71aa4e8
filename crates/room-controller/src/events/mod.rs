//! Room-scoped events derived from native callbacks.
//!
//! Translation from [`NativeCallback`] to [`RoomEvent`] is a pure function:
//! it runs inside the heartbeat tick and must stay allocation-light and
//! non-blocking.
//!
//! Events serialize as:
//!
//! ```json
//! {"room_id": "room1", "kind": "PairResult", "payload": {"result": 0}, "raised_at": "..."}
//! ```
//!
//! Kinds without data (`ConfReady`, `ExitMeetingNotification`) omit `payload`.

pub mod broadcaster;

pub use broadcaster::{CloseReason, EventBroadcaster, EventSubscription, PublishOutcome};

use crate::native::{ConnectionState, MeetingStatus, NativeCallback, UnpairReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kinds, tagged for the wire as `kind` + `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum EventKind {
    /// Outcome of a pairing request. `result == 0` is success.
    PairResult { result: i32 },
    ConnectionStateChanged { state: ConnectionState },
    MeetingStatusChanged { status: MeetingStatus },
    ConfReady,
    ExitMeetingNotification,
    /// The remote side dropped the room's credentials.
    RoomUnpaired { reason: UnpairReason },
}

impl EventKind {
    /// Returns the kind name for metric labels (bounded: 6 values).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::PairResult { .. } => "PairResult",
            EventKind::ConnectionStateChanged { .. } => "ConnectionStateChanged",
            EventKind::MeetingStatusChanged { .. } => "MeetingStatusChanged",
            EventKind::ConfReady => "ConfReady",
            EventKind::ExitMeetingNotification => "ExitMeetingNotification",
            EventKind::RoomUnpaired { .. } => "RoomUnpaired",
        }
    }
}

/// An immutable event for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub raised_at: DateTime<Utc>,
}

impl RoomEvent {
    #[must_use]
    pub fn new(room_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            room_id: room_id.into(),
            kind,
            raised_at: Utc::now(),
        }
    }

    /// Translate a native callback.
    #[must_use]
    pub fn from_callback(callback: NativeCallback) -> Self {
        let (room_id, kind) = match callback {
            NativeCallback::PairRoomResult { room_id, result } => {
                (room_id, EventKind::PairResult { result })
            }
            NativeCallback::RoomUnpaired { room_id, reason } => {
                (room_id, EventKind::RoomUnpaired { reason })
            }
            NativeCallback::ConnectionStateChanged { room_id, state } => {
                (room_id, EventKind::ConnectionStateChanged { state })
            }
            NativeCallback::MeetingStatusUpdated { room_id, status } => {
                (room_id, EventKind::MeetingStatusChanged { status })
            }
            NativeCallback::ConfReady { room_id } => (room_id, EventKind::ConfReady),
            NativeCallback::ExitMeeting { room_id } => {
                (room_id, EventKind::ExitMeetingNotification)
            }
        };
        Self::new(room_id, kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pair_result_wire_format() {
        let event = RoomEvent::from_callback(NativeCallback::PairRoomResult {
            room_id: "room1".to_string(),
            result: 0,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["room_id"], json!("room1"));
        assert_eq!(value["kind"], json!("PairResult"));
        assert_eq!(value["payload"], json!({"result": 0}));
        assert!(value.get("raised_at").is_some());
    }

    #[test]
    fn test_meeting_status_wire_format() {
        let event = RoomEvent::from_callback(NativeCallback::MeetingStatusUpdated {
            room_id: "room1".to_string(),
            status: MeetingStatus::InMeeting,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], json!("MeetingStatusChanged"));
        assert_eq!(value["payload"], json!({"status": "InMeeting"}));
    }

    #[test]
    fn test_unit_kinds_have_no_payload() {
        let event = RoomEvent::from_callback(NativeCallback::ConfReady {
            room_id: "room2".to_string(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], json!("ConfReady"));
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_translation_covers_every_callback() {
        let cases = [
            (
                NativeCallback::RoomUnpaired {
                    room_id: "r".to_string(),
                    reason: UnpairReason::TokenInvalid,
                },
                "RoomUnpaired",
            ),
            (
                NativeCallback::ConnectionStateChanged {
                    room_id: "r".to_string(),
                    state: ConnectionState::Disconnected,
                },
                "ConnectionStateChanged",
            ),
            (
                NativeCallback::ExitMeeting {
                    room_id: "r".to_string(),
                },
                "ExitMeetingNotification",
            ),
        ];

        for (callback, expected) in cases {
            let event = RoomEvent::from_callback(callback);
            assert_eq!(event.room_id, "r");
            assert_eq!(event.kind.as_str(), expected);
        }
    }

    #[test]
    fn test_event_deserializes_from_wire() {
        let value = json!({
            "room_id": "room1",
            "kind": "RoomUnpaired",
            "payload": {"reason": "RefreshTokenFail"},
            "raised_at": "2026-01-01T00:00:00Z"
        });
        let event: RoomEvent = serde_json::from_value(value).unwrap();
        assert_eq!(
            event.kind,
            EventKind::RoomUnpaired {
                reason: UnpairReason::RefreshTokenFail
            }
        );
    }
}
