//! Value types shared with the native control runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a room endpoint as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection attempt has been made (or the room was unpaired).
    #[default]
    None,
    /// Transport established, handshake not complete.
    Established,
    /// Fully connected; meeting control is available.
    Connected,
    /// Connection lost. Recoverable via `retry_pair`.
    Disconnected,
}

impl ConnectionState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            ConnectionState::None => 0,
            ConnectionState::Established => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnected => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Established,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnected,
            _ => ConnectionState::None,
        }
    }

    /// Returns the state as a string for log fields and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::None => "None",
            ConnectionState::Established => "Established",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meeting status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MeetingStatus {
    #[default]
    NotInMeeting,
    ConnectingToMeeting,
    InMeeting,
    LoggedOut,
}

impl MeetingStatus {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            MeetingStatus::NotInMeeting => 0,
            MeetingStatus::ConnectingToMeeting => 1,
            MeetingStatus::InMeeting => 2,
            MeetingStatus::LoggedOut => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => MeetingStatus::ConnectingToMeeting,
            2 => MeetingStatus::InMeeting,
            3 => MeetingStatus::LoggedOut,
            _ => MeetingStatus::NotInMeeting,
        }
    }

    /// Returns the status as a string for log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MeetingStatus::NotInMeeting => "NotInMeeting",
            MeetingStatus::ConnectingToMeeting => "ConnectingToMeeting",
            MeetingStatus::InMeeting => "InMeeting",
            MeetingStatus::LoggedOut => "LoggedOut",
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to leave a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExitMeetingCmd {
    /// Leave; the meeting continues for others.
    #[default]
    Leave,
    /// End the meeting for everyone (host only on the remote side).
    End,
}

/// Why the remote side unpaired a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnpairReason {
    TokenInvalid,
    RefreshTokenFail,
}

/// A room the runtime's credential store already knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedRoomInfo {
    /// Room identifier.
    pub room_id: String,
    /// Display name stored alongside the credentials.
    pub display_name: String,
    /// Whether the stored credentials allow re-running the pairing handshake.
    pub can_retry_to_pair: bool,
}

/// Device and application identity reported to the runtime at initialization.
///
/// The runtime also needs a writable directory for its own credential store;
/// its contents are opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub mac_address: String,
    pub ip_address: String,
    pub firmware_version: String,
    pub app_name: String,
    pub app_version: String,
    pub app_developer: String,
    pub app_contact: String,
    /// Writable directory for the runtime's credential/state store.
    pub content_dir: std::path::PathBuf,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            manufacturer: "RoomController".to_string(),
            model: "v1.0".to_string(),
            serial_number: "0000".to_string(),
            mac_address: "00:00:00:00:00:00".to_string(),
            ip_address: "0.0.0.0".to_string(),
            firmware_version: "1.0.0".to_string(),
            app_name: "Room Controller".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            app_developer: "Room Controller Contributors".to_string(),
            app_contact: "support@example.com".to_string(),
            content_dir: std::env::temp_dir().join("room-controller"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_u8_round_trip_is_total() {
        for state in [
            ConnectionState::None,
            ConnectionState::Established,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
        // Unknown values collapse to None rather than panicking.
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::None);
    }

    #[test]
    fn test_meeting_status_unknown_value() {
        assert_eq!(MeetingStatus::from_u8(42), MeetingStatus::NotInMeeting);
        assert_eq!(MeetingStatus::from_u8(2), MeetingStatus::InMeeting);
    }

    #[test]
    fn test_enums_serialize_as_variant_names() {
        assert_eq!(
            serde_json::to_value(MeetingStatus::InMeeting).unwrap_or_default(),
            serde_json::json!("InMeeting")
        );
        assert_eq!(
            serde_json::to_value(ConnectionState::Disconnected).unwrap_or_default(),
            serde_json::json!("Disconnected")
        );
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
    }
}
