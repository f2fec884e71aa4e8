//! A started `RoomController` on a loopback runtime.
//!
//! The harness keeps a clone of the loopback runtime (clones share state)
//! so tests can inject faults and inspect the native side while driving
//! the controller.

use crate::events::wait_for_connection;
use crate::fixtures::{test_settings, ACTIVATION_CODE};
use room_controller::events::EventSubscription;
use room_controller::native::loopback::LoopbackRuntime;
use room_controller::native::ConnectionState;
use room_controller::{ControllerSettings, RoomController, RoomError};
use std::sync::Arc;
use tempfile::TempDir;

/// Controller plus the runtime it drives.
pub struct TestController {
    pub runtime: LoopbackRuntime,
    pub controller: RoomController,
    // Dropped with the harness
    _content_dir: TempDir,
}

impl TestController {
    /// Start on an empty loopback runtime with test settings.
    pub async fn start() -> Self {
        Self::start_with(LoopbackRuntime::new()).await
    }

    /// Start on a pre-seeded runtime with test settings.
    pub async fn start_with(runtime: LoopbackRuntime) -> Self {
        Self::start_with_settings(runtime, |_| {}).await
    }

    /// Start with test settings adjusted by `configure`.
    pub async fn start_with_settings(
        runtime: LoopbackRuntime,
        configure: impl FnOnce(&mut ControllerSettings),
    ) -> Self {
        Self::try_start(runtime, configure)
            .await
            .expect("controller should start")
    }

    /// Start, returning the startup error instead of panicking.
    pub async fn try_start(
        runtime: LoopbackRuntime,
        configure: impl FnOnce(&mut ControllerSettings),
    ) -> Result<Self, RoomError> {
        let content_dir = tempfile::tempdir().expect("create content dir");
        let mut settings = test_settings(content_dir.path());
        configure(&mut settings);

        let controller = RoomController::start(Arc::new(runtime.clone()), settings).await?;
        Ok(Self {
            runtime,
            controller,
            _content_dir: content_dir,
        })
    }

    /// Register, subscribe and pair a room, then wait until it is connected.
    ///
    /// Returns the subscription with the pairing events already consumed.
    pub async fn pair_and_connect(&self, room_id: &str) -> EventSubscription {
        self.controller
            .register_room(room_id)
            .await
            .expect("register room");
        let mut events = self
            .controller
            .subscribe(room_id)
            .await
            .expect("subscribe to room");
        self.controller
            .pair(room_id, ACTIVATION_CODE)
            .await
            .expect("pair accepted");
        wait_for_connection(&mut events, ConnectionState::Connected).await;
        events
    }

    /// Shut the controller down, panicking on a failed shutdown.
    pub async fn shutdown(&self) {
        self.controller
            .shutdown()
            .await
            .expect("controller should shut down cleanly");
    }
}
