//! Pre-configured test data for Room Controller tests.

use room_controller::native::DeviceProfile;
use room_controller::ControllerSettings;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Activation code the loopback runtime accepts.
pub const ACTIVATION_CODE: &str = "4815-1623-42";

/// Activation code tests configure the loopback runtime to reject.
pub const REJECTED_ACTIVATION_CODE: &str = "0000-0000-00";

/// Numeric meeting number accepted by the loopback runtime.
pub const MEETING_NUMBER: &str = "8675309";

pub const MEETING_PASSWORD: &str = "hunter2";

/// Pump interval for tests; short so scenarios finish quickly.
pub const TEST_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on waiting for any single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test room fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRoom {
    pub id: String,
}

impl TestRoom {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Create a test room with a random id.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }
}

/// Device profile pointing at a test-owned content directory.
#[must_use]
pub fn test_device_profile(content_dir: &Path) -> DeviceProfile {
    DeviceProfile {
        app_name: "room-controller-tests".to_string(),
        content_dir: content_dir.to_path_buf(),
        ..DeviceProfile::default()
    }
}

/// Controller settings with a fast heartbeat and short shutdown waits.
#[must_use]
pub fn test_settings(content_dir: &Path) -> ControllerSettings {
    ControllerSettings {
        heartbeat_interval: TEST_HEARTBEAT_INTERVAL,
        subscriber_queue_capacity: 64,
        shutdown_timeout: Duration::from_secs(5),
        device: test_device_profile(content_dir),
        ..ControllerSettings::default()
    }
}
