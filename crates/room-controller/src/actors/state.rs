//! Observable state of a room session.
//!
//! The room actor owns the native handle; the state below is shared with the
//! heartbeat driver, which applies callback-derived events to it without
//! going through the actor's mailbox. All fields are atomic so the heartbeat
//! never waits on a room that is busy with a slow native call.

use crate::events::EventKind;
use crate::native::{result_code, ConnectionState, MeetingStatus};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lock-free room state.
#[derive(Debug, Default)]
pub struct RoomStatus {
    connection: AtomicU8,
    meeting: AtomicU8,
    pairing_in_progress: AtomicBool,
    can_retry: AtomicBool,
    paired: AtomicBool,
}

impl RoomStatus {
    /// State for a room the runtime already holds credentials for.
    #[must_use]
    pub fn previously_paired(can_retry: bool) -> Self {
        let status = Self::default();
        status.paired.store(true, Ordering::SeqCst);
        status.can_retry.store(can_retry, Ordering::SeqCst);
        status
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn meeting_status(&self) -> MeetingStatus {
        MeetingStatus::from_u8(self.meeting.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn pairing_in_progress(&self) -> bool {
        self.pairing_in_progress.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.can_retry.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn paired(&self) -> bool {
        self.paired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub(crate) fn set_pairing(&self, in_progress: bool) {
        self.pairing_in_progress.store(in_progress, Ordering::SeqCst);
    }

    /// Apply an event raised by the runtime for this room.
    pub fn apply(&self, kind: &EventKind) {
        match kind {
            EventKind::PairResult { result } => {
                self.set_pairing(false);
                if *result == result_code::SUCCESS {
                    self.paired.store(true, Ordering::SeqCst);
                    self.can_retry.store(true, Ordering::SeqCst);
                }
            }
            EventKind::ConnectionStateChanged { state } => {
                self.connection.store(state.as_u8(), Ordering::SeqCst);
                if *state == ConnectionState::Connected {
                    self.paired.store(true, Ordering::SeqCst);
                }
            }
            EventKind::MeetingStatusChanged { status } => {
                self.meeting.store(status.as_u8(), Ordering::SeqCst);
            }
            EventKind::RoomUnpaired { .. } => {
                self.connection
                    .store(ConnectionState::None.as_u8(), Ordering::SeqCst);
                self.meeting
                    .store(MeetingStatus::NotInMeeting.as_u8(), Ordering::SeqCst);
                self.paired.store(false, Ordering::SeqCst);
                self.can_retry.store(false, Ordering::SeqCst);
                self.set_pairing(false);
            }
            EventKind::ConfReady | EventKind::ExitMeetingNotification => {}
        }
    }

    /// Point-in-time view for listings.
    #[must_use]
    pub fn snapshot(&self, room_id: &str) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.to_string(),
            connection_state: self.connection_state(),
            meeting_status: self.meeting_status(),
            can_retry: self.can_retry(),
            paired: self.paired(),
            pairing_in_progress: self.pairing_in_progress(),
        }
    }
}

/// Snapshot of one room returned by `list_rooms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub connection_state: ConnectionState,
    pub meeting_status: MeetingStatus,
    pub can_retry: bool,
    pub paired: bool,
    pub pairing_in_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::UnpairReason;

    #[test]
    fn test_default_state() {
        let status = RoomStatus::default();
        assert_eq!(status.connection_state(), ConnectionState::None);
        assert_eq!(status.meeting_status(), MeetingStatus::NotInMeeting);
        assert!(!status.paired());
        assert!(!status.can_retry());
        assert!(!status.pairing_in_progress());
    }

    #[test]
    fn test_successful_pair_result_clears_pairing() {
        let status = RoomStatus::default();
        status.set_pairing(true);

        status.apply(&EventKind::PairResult { result: 0 });

        assert!(!status.pairing_in_progress());
        assert!(status.paired());
        assert!(status.can_retry());
    }

    #[test]
    fn test_failed_pair_result_keeps_unpaired() {
        let status = RoomStatus::default();
        status.set_pairing(true);

        status.apply(&EventKind::PairResult {
            result: result_code::INVALID_PARAMETER,
        });

        assert!(!status.pairing_in_progress());
        assert!(!status.paired());
    }

    #[test]
    fn test_disconnect_keeps_retry_possible() {
        let status = RoomStatus::previously_paired(true);
        status.apply(&EventKind::ConnectionStateChanged {
            state: ConnectionState::Connected,
        });
        assert!(status.is_connected());

        status.apply(&EventKind::ConnectionStateChanged {
            state: ConnectionState::Disconnected,
        });
        assert!(!status.is_connected());
        assert!(status.can_retry());
        assert!(status.paired());
    }

    #[test]
    fn test_remote_unpair_resets_state() {
        let status = RoomStatus::previously_paired(true);
        status.apply(&EventKind::ConnectionStateChanged {
            state: ConnectionState::Connected,
        });
        status.apply(&EventKind::MeetingStatusChanged {
            status: MeetingStatus::InMeeting,
        });

        status.apply(&EventKind::RoomUnpaired {
            reason: UnpairReason::TokenInvalid,
        });

        let snapshot = status.snapshot("room1");
        assert_eq!(
            snapshot,
            RoomSnapshot {
                room_id: "room1".to_string(),
                connection_state: ConnectionState::None,
                meeting_status: MeetingStatus::NotInMeeting,
                can_retry: false,
                paired: false,
                pairing_in_progress: false,
            }
        );
    }
}
