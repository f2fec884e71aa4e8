//! `RoomActor` - per-room actor that owns the native room handle.
//!
//! Each `RoomActor`:
//! - Owns the room's `NativeRoomHandle`; nothing else ever touches it
//! - Serializes commands for its room through its mailbox
//! - Runs native calls on the blocking pool so a slow call never stalls
//!   the async runtime or any other room
//! - Releases the handle exactly once, on `Release` or cancellation
//!
//! # Command acceptance
//!
//! A successful reply means the runtime accepted the request. Pairing,
//! connection and meeting outcomes arrive later as events and are applied to
//! the shared [`RoomStatus`] by the heartbeat.

use crate::errors::RoomError;
use crate::native::{result_code, ConnectionState, ExitMeetingCmd, NativeError, NativeRoomHandle};
use crate::observability::metrics;

use super::messages::RoomMessage;
use super::metrics::{ActorMetrics, MailboxMonitor};
use super::state::{RoomSnapshot, RoomStatus};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the room mailbox.
///
/// Larger than `ROOM_MAILBOX_WARNING` so a stuck room reaches the critical
/// level before senders start waiting for space.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Per-room tunables, taken from `Config`.
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    /// How long an unanswered pairing blocks a new pair request.
    pub pairing_timeout: Duration,
    /// Native calls slower than this are logged.
    pub slow_call_threshold: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            pairing_timeout: Duration::from_secs(60),
            slow_call_threshold: Duration::from_secs(10),
        }
    }
}

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomSession {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    status: Arc<RoomStatus>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomSession {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Shared state, updated by the heartbeat.
    #[must_use]
    pub fn status(&self) -> &RoomStatus {
        &self.status
    }

    /// Depth of the room's command mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }

    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        self.status.snapshot(&self.room_id)
    }

    /// True if both handles address the same actor.
    #[must_use]
    pub fn same_session(&self, other: &RoomSession) -> bool {
        Arc::ptr_eq(&self.status, &other.status)
    }

    /// Request pairing with an activation code.
    ///
    /// The pairing outcome arrives as a `PairResult` event.
    pub async fn pair(&self, activation_code: String) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::Pair {
            activation_code,
            respond_to,
        })
        .await
    }

    pub async fn unpair(&self) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::Unpair { respond_to })
            .await
    }

    pub async fn retry_pair(&self) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::RetryPair { respond_to })
            .await
    }

    pub async fn start_instant_meeting(&self) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::StartInstantMeeting { respond_to })
            .await
    }

    pub async fn join_meeting(
        &self,
        meeting_number: String,
        password: String,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::JoinMeeting {
            meeting_number,
            password,
            respond_to,
        })
        .await
    }

    pub async fn exit_meeting(&self, cmd: ExitMeetingCmd) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::ExitMeeting { cmd, respond_to })
            .await
    }

    pub async fn set_audio_mute(&self, mute: bool) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::SetAudioMute { mute, respond_to })
            .await
    }

    pub async fn set_video_mute(&self, mute: bool) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::SetVideoMute { mute, respond_to })
            .await
    }

    /// Ask the runtime for the live connection state.
    pub async fn connection_state(&self) -> Result<ConnectionState, RoomError> {
        self.request(|respond_to| RoomMessage::QueryConnectionState { respond_to })
            .await
    }

    /// Retire the room if it never started pairing.
    ///
    /// Decided in mailbox order, so a pair queued ahead of this either
    /// started pairing (and the room stays) or was rejected. Returns false if
    /// the room is in use or the actor already stopped.
    pub async fn retire(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::Retire { respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Release the native handle and stop the actor.
    ///
    /// Commands queued behind the release fail with `RoomNotFound`.
    /// Returns false if the actor had already stopped.
    pub async fn release(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::Release { respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.is_ok()
    }

    /// Cancel the room actor. The handle is released on the way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, RoomError>>) -> RoomMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        // A closed mailbox means the room was released
        if self.sender.send(build(tx)).await.is_err() {
            self.mailbox.record_send_failed();
            return Err(RoomError::RoomNotFound(self.room_id.clone()));
        }

        rx.await.map_err(|_| {
            // Dropped unprocessed when the actor stopped
            self.mailbox.record_send_failed();
            RoomError::RoomNotFound(self.room_id.clone())
        })?
    }
}

/// The room actor implementation.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    /// `None` while a native call is in flight on the blocking pool, and after release.
    handle: Option<Box<dyn NativeRoomHandle>>,
    status: Arc<RoomStatus>,
    settings: RoomSettings,
    pairing_started: Option<Instant>,
    /// Set by `Retire`; every later command is refused.
    retired: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomActor {
    /// Spawn a new room actor owning `handle`.
    pub fn spawn(
        room_id: String,
        handle: Box<dyn NativeRoomHandle>,
        status: RoomStatus,
        settings: RoomSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomSession, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let status = Arc::new(status);
        let mailbox = Arc::new(MailboxMonitor::new(&room_id));

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            handle: Some(handle),
            status: Arc::clone(&status),
            settings,
            pairing_started: None,
            retired: false,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let session = RoomSession {
            sender,
            cancel_token,
            room_id,
            status,
            mailbox,
        };

        (session, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(RoomMessage::Release { respond_to }) => {
                            self.release_handle().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(RoomMessage::Retire { respond_to }) => {
                            let _ = respond_to.send(self.retire());
                        }
                        Some(message) if self.retired => {
                            message.reject(RoomError::RoomNotFound(self.room_id.clone()));
                            self.mailbox.record_dequeue();
                        }
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.release_handle().await;
        // Pending requests see a dropped reply channel
        self.receiver.close();

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        let command = message.name();
        match message {
            RoomMessage::Pair {
                activation_code,
                respond_to,
            } => {
                let result = self.pair(activation_code).await;
                self.reply(command, respond_to, result);
            }
            RoomMessage::Unpair { respond_to } => {
                let result = self.native_call("unpair", |h| h.unpair()).await;
                if result.is_ok() {
                    self.status.set_pairing(false);
                    self.pairing_started = None;
                }
                self.reply(command, respond_to, result);
            }
            RoomMessage::RetryPair { respond_to } => {
                let result = match self.require(self.status.can_retry()) {
                    Ok(()) => self.native_call("retry_pair", |h| h.retry_pair()).await,
                    Err(e) => Err(e),
                };
                self.reply(command, respond_to, result);
            }
            RoomMessage::StartInstantMeeting { respond_to } => {
                let result = match self.require(self.status.is_connected()) {
                    Ok(()) => {
                        self.native_call("start_instant_meeting", |h| h.start_instant_meeting())
                            .await
                    }
                    Err(e) => Err(e),
                };
                self.reply(command, respond_to, result);
            }
            RoomMessage::JoinMeeting {
                meeting_number,
                password,
                respond_to,
            } => {
                let result = match self.require(self.status.is_connected()) {
                    Ok(()) => {
                        self.native_call("join_meeting", move |h| {
                            h.join_meeting(&meeting_number, &password)
                        })
                        .await
                    }
                    Err(e) => Err(e),
                };
                self.reply(command, respond_to, result);
            }
            RoomMessage::ExitMeeting { cmd, respond_to } => {
                let result = match self.require(self.status.is_connected()) {
                    Ok(()) => self.native_call("exit_meeting", move |h| h.exit_meeting(cmd)).await,
                    Err(e) => Err(e),
                };
                self.reply(command, respond_to, result);
            }
            RoomMessage::SetAudioMute { mute, respond_to } => {
                let result = match self.require(self.status.is_connected()) {
                    Ok(()) => self.native_call("mute_audio", move |h| h.mute_audio(mute)).await,
                    Err(e) => Err(e),
                };
                self.reply(command, respond_to, result);
            }
            RoomMessage::SetVideoMute { mute, respond_to } => {
                let result = match self.require(self.status.is_connected()) {
                    Ok(()) => self.native_call("mute_video", move |h| h.mute_video(mute)).await,
                    Err(e) => Err(e),
                };
                self.reply(command, respond_to, result);
            }
            RoomMessage::QueryConnectionState { respond_to } => {
                let result = self
                    .native_call("connection_state", |h| h.connection_state())
                    .await;
                self.reply(command, respond_to, result);
            }
            RoomMessage::Retire { respond_to } => {
                let _ = respond_to.send(self.retire());
            }
            RoomMessage::Release { respond_to } => {
                // Handled by the run loop; kept total for safety
                self.release_handle().await;
                let _ = respond_to.send(());
            }
        }
    }

    fn retire(&mut self) -> bool {
        let untouched = !self.status.pairing_in_progress()
            && !self.status.paired()
            && !self.status.is_connected();
        if untouched {
            self.retired = true;
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                "Room retired"
            );
        }
        untouched
    }

    async fn pair(&mut self, activation_code: String) -> Result<(), RoomError> {
        if self.status.is_connected() {
            return Err(RoomError::AlreadyPaired(self.room_id.clone()));
        }

        if self.status.pairing_in_progress() {
            let expired = self
                .pairing_started
                .is_some_and(|started| started.elapsed() >= self.settings.pairing_timeout);
            if !expired {
                return Err(RoomError::AlreadyPairing(self.room_id.clone()));
            }
            warn!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                timeout_secs = self.settings.pairing_timeout.as_secs(),
                "Previous pairing produced no result in time, accepting new request"
            );
        }

        self.status.set_pairing(true);
        self.pairing_started = Some(Instant::now());

        let result = self
            .native_call("pair", move |h| h.pair_with_activation_code(&activation_code))
            .await;

        if result.is_err() {
            self.status.set_pairing(false);
            self.pairing_started = None;
        }
        result
    }

    /// Reject a command up front when its room-state precondition fails.
    fn require(&self, precondition: bool) -> Result<(), RoomError> {
        if precondition {
            Ok(())
        } else {
            Err(RoomError::NativeCallFailed {
                room_id: self.room_id.clone(),
                code: result_code::INVALID_STATE,
            })
        }
    }

    fn reply<T>(
        &self,
        command: &'static str,
        respond_to: oneshot::Sender<Result<T, RoomError>>,
        result: Result<T, RoomError>,
    ) {
        metrics::record_command(command, result.is_ok());
        match &result {
            Ok(_) => debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                command,
                "Command accepted"
            ),
            Err(e) => debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                command,
                error = %e,
                "Command rejected"
            ),
        }
        // Caller may have gone away
        let _ = respond_to.send(result);
    }

    /// Run one native call on the blocking pool.
    ///
    /// The handle moves into the blocking task and back, so it is never
    /// shared and calls on this room can never overlap.
    async fn native_call<T, F>(&mut self, operation: &'static str, call: F) -> Result<T, RoomError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn NativeRoomHandle>) -> Result<T, NativeError> + Send + 'static,
    {
        let Some(mut handle) = self.handle.take() else {
            return Err(RoomError::Internal(format!(
                "native handle for room {} is gone",
                self.room_id
            )));
        };

        let started = Instant::now();
        let joined = tokio::task::spawn_blocking(move || {
            let result = call(&mut handle);
            (handle, result)
        })
        .await;
        let elapsed = started.elapsed();

        metrics::record_native_call(operation, elapsed);
        if elapsed >= self.settings.slow_call_threshold {
            warn!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                operation,
                elapsed_ms = elapsed.as_millis(),
                "Slow native call"
            );
        }

        match joined {
            Ok((handle, result)) => {
                self.handle = Some(handle);
                result.map_err(|e| {
                    self.metrics.record_native_failure();
                    warn!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        operation,
                        code = e.code(),
                        error = %e,
                        "Native call failed"
                    );
                    RoomError::native(&self.room_id, &e)
                })
            }
            Err(e) => {
                self.metrics.record_panic(&self.room_id);
                Err(RoomError::Internal(format!(
                    "native call {operation} panicked: {e}"
                )))
            }
        }
    }

    async fn release_handle(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match tokio::task::spawn_blocking(move || handle.release()).await {
            Ok(()) => debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                "Native handle released"
            ),
            Err(e) => {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Native handle release panicked"
                );
                self.metrics.record_panic(&self.room_id);
            }
        }
    }
}
