//! `RoomController` - the command and subscription surface.
//!
//! Startup:
//! 1. Initialize the native runtime with the device profile
//! 2. Query the previously paired rooms and register each one
//! 3. Start the heartbeat on its dedicated thread
//!
//! Only after `start` returns can a caller issue commands, so the registry
//! always reflects the runtime's paired set before the first command.
//!
//! Shutdown (see [`RoomController::shutdown`]):
//! 1. Stop the heartbeat and wait for its last tick
//! 2. Close every subscriber
//! 3. Release every native handle
//! 4. Tear down the runtime

use crate::actors::{ActorMetrics, CommandAck, RoomSession, RoomSettings, RoomSnapshot, SessionRegistry};
use crate::errors::RoomError;
use crate::events::{EventBroadcaster, EventSubscription};
use crate::heartbeat::{HeartbeatDriver, HeartbeatTask};
use crate::native::{ConnectionState, DeviceProfile, ExitMeetingCmd, NativeRuntime};
use crate::observability::metrics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Settings for the room session core.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub heartbeat_interval: Duration,
    pub subscriber_queue_capacity: usize,
    /// Bound on each shutdown wait.
    pub shutdown_timeout: Duration,
    pub room: RoomSettings,
    pub device: DeviceProfile,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(150),
            subscriber_queue_capacity: 256,
            shutdown_timeout: Duration::from_secs(10),
            room: RoomSettings::default(),
            device: DeviceProfile::default(),
        }
    }
}

/// Facade over the registry, broadcaster and heartbeat.
pub struct RoomController {
    runtime: Arc<dyn NativeRuntime>,
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    settings: ControllerSettings,
    /// Parent of every room actor's token.
    cancel_token: CancellationToken,
    heartbeat_cancel: CancellationToken,
    /// Cancelled by the heartbeat when the pump fails.
    fatal: CancellationToken,
    heartbeat: Mutex<Option<HeartbeatTask>>,
    metrics: Arc<ActorMetrics>,
    shutting_down: AtomicBool,
}

impl RoomController {
    /// Initialize the runtime, load the paired rooms and start the heartbeat.
    #[instrument(skip_all, name = "rc.controller.start")]
    pub async fn start(
        runtime: Arc<dyn NativeRuntime>,
        settings: ControllerSettings,
    ) -> Result<Self, RoomError> {
        let profile = settings.device.clone();
        let init_runtime = Arc::clone(&runtime);
        blocking(move || init_runtime.initialize(&profile))
            .await?
            .map_err(|e| RoomError::Internal(format!("native runtime initialization failed: {e}")))?;

        info!(
            target: "rc.controller",
            app_name = %settings.device.app_name,
            content_dir = %settings.device.content_dir.display(),
            "Native runtime initialized"
        );

        let query_runtime = Arc::clone(&runtime);
        let paired = blocking(move || query_runtime.query_previously_paired_rooms())
            .await?
            .map_err(|e| RoomError::Internal(format!("paired room query failed: {e}")))?;

        let cancel_token = CancellationToken::new();
        let metrics = ActorMetrics::new();
        let broadcaster = Arc::new(EventBroadcaster::new(settings.subscriber_queue_capacity));
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&runtime),
            Arc::clone(&broadcaster),
            settings.room,
            cancel_token.clone(),
            Arc::clone(&metrics),
        ));

        for info in &paired {
            if let Err(e) = registry.register_paired(info).await {
                registry.release_all().await;
                return Err(e);
            }
        }

        info!(
            target: "rc.controller",
            rooms = paired.len(),
            "Registered previously paired rooms"
        );

        let heartbeat_cancel = CancellationToken::new();
        let fatal = CancellationToken::new();
        let heartbeat = HeartbeatDriver::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            settings.heartbeat_interval,
            fatal.clone(),
        )
        .spawn_dedicated(heartbeat_cancel.clone())?;

        Ok(Self {
            runtime,
            registry,
            broadcaster,
            settings,
            cancel_token,
            heartbeat_cancel,
            fatal,
            heartbeat: Mutex::new(Some(heartbeat)),
            metrics,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Register a room, opening its native handle if needed.
    pub async fn register_room(&self, room_id: &str) -> Result<RoomSnapshot, RoomError> {
        self.ensure_running()?;
        let session = self.registry.register(room_id).await?;
        Ok(session.snapshot())
    }

    /// Request pairing; the outcome arrives as a `PairResult` event.
    ///
    /// Registers the room first if it is new. When the runtime rejects the
    /// request outright, a room this call created is removed again, unless
    /// another pair request on it was accepted in the meantime.
    pub async fn pair(&self, room_id: &str, activation_code: &str) -> Result<CommandAck, RoomError> {
        let registered = match self.ensure_running() {
            Ok(()) => self.registry.register_tracked(room_id).await,
            Err(e) => Err(e),
        };
        let (session, created) = match registered {
            Ok(registered) => registered,
            Err(e) => {
                metrics::record_command("pair", false);
                return Err(e);
            }
        };

        if let Err(e) = session.pair(activation_code.to_string()).await {
            if created && matches!(e, RoomError::NativeCallFailed { .. }) && session.retire().await {
                debug!(
                    target: "rc.controller",
                    room_id = %room_id,
                    "Removing room whose first pair request was rejected"
                );
                self.registry.remove_session(&session).await;
            }
            return Err(e);
        }
        Ok(CommandAck::accepted(room_id, "pair"))
    }

    /// Unpair and remove the room.
    ///
    /// Once this returns the room is gone from `list_rooms` and further
    /// commands on it fail with `RoomNotFound`.
    pub async fn unpair(&self, room_id: &str) -> Result<CommandAck, RoomError> {
        let session = self.session(room_id, "unpair").await?;
        session.unpair().await?;
        self.registry.remove(room_id).await;
        Ok(CommandAck::accepted(room_id, "unpair"))
    }

    pub async fn retry_pair(&self, room_id: &str) -> Result<CommandAck, RoomError> {
        let session = self.session(room_id, "retry_pair").await?;
        session.retry_pair().await?;
        Ok(CommandAck::accepted(room_id, "retry_pair"))
    }

    pub async fn start_instant_meeting(&self, room_id: &str) -> Result<CommandAck, RoomError> {
        let session = self.session(room_id, "start_instant_meeting").await?;
        session.start_instant_meeting().await?;
        Ok(CommandAck::accepted(room_id, "start_instant_meeting"))
    }

    pub async fn join_meeting(
        &self,
        room_id: &str,
        meeting_number: &str,
        password: &str,
    ) -> Result<CommandAck, RoomError> {
        let session = self.session(room_id, "join_meeting").await?;
        session
            .join_meeting(meeting_number.to_string(), password.to_string())
            .await?;
        Ok(CommandAck::accepted(room_id, "join_meeting"))
    }

    pub async fn exit_meeting(
        &self,
        room_id: &str,
        cmd: ExitMeetingCmd,
    ) -> Result<CommandAck, RoomError> {
        let session = self.session(room_id, "exit_meeting").await?;
        session.exit_meeting(cmd).await?;
        Ok(CommandAck::accepted(room_id, "exit_meeting"))
    }

    pub async fn set_audio_mute(&self, room_id: &str, mute: bool) -> Result<CommandAck, RoomError> {
        let session = self.session(room_id, "set_audio_mute").await?;
        session.set_audio_mute(mute).await?;
        Ok(CommandAck::accepted(room_id, "set_audio_mute"))
    }

    pub async fn set_video_mute(&self, room_id: &str, mute: bool) -> Result<CommandAck, RoomError> {
        let session = self.session(room_id, "set_video_mute").await?;
        session.set_video_mute(mute).await?;
        Ok(CommandAck::accepted(room_id, "set_video_mute"))
    }

    /// Live connection state, asked of the runtime through the room.
    pub async fn connection_state(&self, room_id: &str) -> Result<ConnectionState, RoomError> {
        let session = self.session(room_id, "connection_state").await?;
        session.connection_state().await
    }

    /// Snapshot of every registered room.
    pub async fn list_rooms(&self) -> Vec<RoomSnapshot> {
        self.registry.list().await
    }

    /// Snapshot of one room.
    pub async fn room(&self, room_id: &str) -> Result<RoomSnapshot, RoomError> {
        Ok(self.registry.get(room_id).await?.snapshot())
    }

    /// Open an event stream for a registered room.
    pub async fn subscribe(&self, room_id: &str) -> Result<EventSubscription, RoomError> {
        self.ensure_running()?;
        if !self.registry.contains(room_id).await {
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }

        let subscription = self.broadcaster.subscribe(room_id).await;

        // Room removed between the check and the subscribe
        if !self.registry.contains(room_id).await {
            self.broadcaster.unsubscribe(subscription).await;
            return Err(RoomError::RoomNotFound(room_id.to_string()));
        }
        Ok(subscription)
    }

    pub async fn unsubscribe(&self, subscription: EventSubscription) -> bool {
        self.broadcaster.unsubscribe(subscription).await
    }

    /// Resolves once the heartbeat reported a fatal pump failure.
    pub async fn fatal_failure(&self) {
        self.fatal.cancelled().await;
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.fatal.is_cancelled()
    }

    /// True while the heartbeat runs and shutdown has not begun.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shutting_down.load(Ordering::SeqCst) && !self.fatal.is_cancelled()
    }

    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Counters shared by the room actors.
    #[must_use]
    pub fn actor_metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Stop everything in dependency order.
    ///
    /// Returns the heartbeat's result, so a pump failure surfaces here.
    /// If the heartbeat does not stop within the timeout, handles and the
    /// runtime are left in place and an error is returned.
    /// Calling it again is a no-op.
    #[instrument(skip_all, name = "rc.controller.shutdown")]
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!(target: "rc.controller", "Shutdown already in progress");
            return Ok(());
        }
        let timeout = self.settings.shutdown_timeout;

        info!(target: "rc.controller", "Shutdown: stopping heartbeat");
        self.heartbeat_cancel.cancel();
        let task = self.heartbeat.lock().await.take();
        let (heartbeat_result, pump_stopped) = match task {
            Some(task) => match tokio::time::timeout(timeout, task.join()).await {
                Ok(result) => (result, true),
                Err(_) => {
                    error!(
                        target: "rc.controller",
                        timeout_secs = timeout.as_secs(),
                        "Heartbeat did not stop in time, leaving native handles and runtime in place"
                    );
                    (
                        Err(RoomError::Internal("heartbeat did not stop in time".to_string())),
                        false,
                    )
                }
            },
            None => (Ok(()), true),
        };

        let closed = self.broadcaster.close_all().await;
        info!(
            target: "rc.controller",
            subscribers = closed,
            "Shutdown: subscribers closed"
        );

        // Releasing a handle or the runtime while the pump may still be
        // delivering callbacks is unsafe
        if !pump_stopped {
            return heartbeat_result;
        }

        match tokio::time::timeout(timeout, self.registry.release_all()).await {
            Ok(rooms) => info!(
                target: "rc.controller",
                rooms,
                "Shutdown: native handles released"
            ),
            Err(_) => warn!(
                target: "rc.controller",
                "Shutdown: releasing native handles timed out, cancelling room actors"
            ),
        }
        // Backstop for actors that did not get a Release
        self.cancel_token.cancel();

        let runtime = Arc::clone(&self.runtime);
        if let Err(e) = blocking(move || runtime.shutdown()).await {
            warn!(target: "rc.controller", error = %e, "Runtime teardown failed");
        }
        metrics::set_rooms_active(0);

        info!(target: "rc.controller", "Shutdown complete");
        heartbeat_result
    }

    fn ensure_running(&self) -> Result<(), RoomError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RoomError::ShuttingDown)
        }
    }

    async fn session(&self, room_id: &str, command: &'static str) -> Result<RoomSession, RoomError> {
        let result = match self.ensure_running() {
            Ok(()) => self.registry.get(room_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            metrics::record_command(command, false);
            debug!(
                target: "rc.controller",
                room_id = %room_id,
                command,
                error = %e,
                "Command refused"
            );
        }
        result
    }
}

/// Run a synchronous runtime call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, RoomError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RoomError::Internal(format!("native call panicked: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::native::loopback::LoopbackRuntime;

    fn settings() -> ControllerSettings {
        ControllerSettings {
            heartbeat_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(2),
            ..ControllerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_start_registers_paired_rooms() {
        let runtime = LoopbackRuntime::new()
            .with_paired_room("room1", true)
            .with_paired_room("room2", false);

        let controller = RoomController::start(Arc::new(runtime.clone()), settings())
            .await
            .unwrap();

        let rooms = controller.list_rooms().await;
        let ids: Vec<&str> = rooms.iter().map(|r| r.room_id.as_str()).collect();
        assert_eq!(ids, vec!["room1", "room2"]);
        assert!(rooms.iter().all(|r| r.paired));
        assert!(runtime.profile().is_some());

        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_room_commands_fail() {
        let runtime = LoopbackRuntime::new();
        let controller = RoomController::start(Arc::new(runtime), settings())
            .await
            .unwrap();

        assert!(matches!(
            controller.start_instant_meeting("nope").await,
            Err(RoomError::RoomNotFound(_))
        ));
        assert!(matches!(
            controller.subscribe("nope").await,
            Err(RoomError::RoomNotFound(_))
        ));
        assert!(matches!(
            controller.room("nope").await,
            Err(RoomError::RoomNotFound(_))
        ));

        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pair_registers_new_room() {
        let runtime = LoopbackRuntime::new();
        let controller = RoomController::start(Arc::new(runtime.clone()), settings())
            .await
            .unwrap();

        let ack = controller.pair("room1", "ABC-123").await.unwrap();
        assert!(ack.accepted);
        assert_eq!(controller.list_rooms().await.len(), 1);
        assert!(runtime.calls().contains(&"pair:room1".to_string()));

        controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_pair_does_not_leave_new_room_behind() {
        let runtime = LoopbackRuntime::new();
        let controller = RoomController::start(Arc::new(runtime.clone()), settings())
            .await
            .unwrap();

        let result = controller.pair("room1", "   ").await;
        assert!(matches!(result, Err(RoomError::NativeCallFailed { .. })));
        assert!(controller.list_rooms().await.is_empty());
        assert_eq!(runtime.released_rooms(), vec!["room1".to_string()]);

        controller.shutdown().await.unwrap();
    }

    /// Slow heartbeat so no pairing completes while the requests race.
    fn slow_heartbeat_settings() -> ControllerSettings {
        ControllerSettings {
            heartbeat_interval: Duration::from_millis(500),
            ..settings()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_pairs_keep_the_accepted_one() {
        let runtime = LoopbackRuntime::new();
        let controller =
            RoomController::start(Arc::new(runtime.clone()), slow_heartbeat_settings())
                .await
                .unwrap();

        let (first, second) = tokio::join!(
            controller.pair("room1", "ABC-123"),
            controller.pair("room1", "ABC-123")
        );

        let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1, "{first:?} {second:?}");
        assert!([&first, &second]
            .iter()
            .any(|r| matches!(r, Err(RoomError::AlreadyPairing(_)))));
        let rooms = controller.list_rooms().await;
        assert_eq!(rooms.len(), 1, "accepted pairing lost its room");
        assert!(runtime.released_rooms().is_empty());

        controller.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rejected_first_pair_keeps_room_paired_by_another_request() {
        let runtime = LoopbackRuntime::new();
        let controller =
            RoomController::start(Arc::new(runtime.clone()), slow_heartbeat_settings())
                .await
                .unwrap();

        let (rejected, accepted) = tokio::join!(
            controller.pair("room1", "   "),
            controller.pair("room1", "ABC-123")
        );
        assert!(matches!(
            rejected,
            Err(RoomError::NativeCallFailed { .. } | RoomError::AlreadyPairing(_))
        ));

        // The valid request either won the room or found it already retired
        match accepted {
            Ok(_) => {
                assert_eq!(controller.list_rooms().await.len(), 1);
                assert!(runtime.released_rooms().is_empty());
            }
            Err(e) => {
                assert!(matches!(e, RoomError::RoomNotFound(_)), "unexpected error {e}");
                assert!(controller.list_rooms().await.is_empty());
            }
        }

        controller.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_keeps_handles_when_heartbeat_is_stuck() {
        struct StuckPump {
            inner: LoopbackRuntime,
            stuck: Arc<AtomicBool>,
        }

        impl NativeRuntime for StuckPump {
            fn initialize(&self, profile: &DeviceProfile) -> Result<(), crate::native::NativeError> {
                self.inner.initialize(profile)
            }
            fn query_previously_paired_rooms(
                &self,
            ) -> Result<Vec<crate::native::PairedRoomInfo>, crate::native::NativeError> {
                self.inner.query_previously_paired_rooms()
            }
            fn create_room_handle(
                &self,
                room_id: &str,
            ) -> Result<Box<dyn crate::native::NativeRoomHandle>, crate::native::NativeError> {
                self.inner.create_room_handle(room_id)
            }
            fn heartbeat(
                &self,
                sink: &mut dyn crate::native::CallbackSink,
            ) -> Result<(), crate::native::NativeError> {
                if self.stuck.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_secs(1));
                }
                self.inner.heartbeat(sink)
            }
            fn shutdown(&self) {
                self.inner.shutdown();
            }
        }

        let runtime = LoopbackRuntime::new();
        let stuck = Arc::new(AtomicBool::new(false));
        let settings = ControllerSettings {
            shutdown_timeout: Duration::from_millis(200),
            ..settings()
        };
        let controller = RoomController::start(
            Arc::new(StuckPump {
                inner: runtime.clone(),
                stuck: Arc::clone(&stuck),
            }),
            settings,
        )
        .await
        .unwrap();
        controller.register_room("room1").await.unwrap();

        stuck.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = controller.shutdown().await;
        assert!(matches!(result, Err(RoomError::Internal(_))));
        assert!(!runtime.is_shut_down());
        assert!(runtime.released_rooms().is_empty());
        assert_eq!(runtime.open_rooms(), vec!["room1".to_string()]);
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_refused() {
        let runtime = LoopbackRuntime::new();
        let controller = RoomController::start(Arc::new(runtime.clone()), settings())
            .await
            .unwrap();
        controller.register_room("room1").await.unwrap();

        controller.shutdown().await.unwrap();
        // Second shutdown is a no-op
        controller.shutdown().await.unwrap();

        assert!(!controller.is_running());
        assert!(runtime.is_shut_down());
        assert!(matches!(
            controller.start_instant_meeting("room1").await,
            Err(RoomError::ShuttingDown)
        ));
        assert!(matches!(
            controller.register_room("room2").await,
            Err(RoomError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_start_fails_when_query_fails() {
        struct BrokenQuery(LoopbackRuntime);

        impl NativeRuntime for BrokenQuery {
            fn initialize(&self, profile: &DeviceProfile) -> Result<(), crate::native::NativeError> {
                self.0.initialize(profile)
            }
            fn query_previously_paired_rooms(
                &self,
            ) -> Result<Vec<crate::native::PairedRoomInfo>, crate::native::NativeError> {
                Err(crate::native::NativeError::Unavailable("store locked".to_string()))
            }
            fn create_room_handle(
                &self,
                room_id: &str,
            ) -> Result<Box<dyn crate::native::NativeRoomHandle>, crate::native::NativeError> {
                self.0.create_room_handle(room_id)
            }
            fn heartbeat(
                &self,
                sink: &mut dyn crate::native::CallbackSink,
            ) -> Result<(), crate::native::NativeError> {
                self.0.heartbeat(sink)
            }
            fn shutdown(&self) {
                self.0.shutdown();
            }
        }

        let result =
            RoomController::start(Arc::new(BrokenQuery(LoopbackRuntime::new())), settings()).await;
        assert!(matches!(result, Err(RoomError::Internal(msg)) if msg.contains("store locked")));
    }
}
