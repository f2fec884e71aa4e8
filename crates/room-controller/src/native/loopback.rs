//! In-process loopback implementation of the native runtime.
//!
//! Emulates the remote side of every room: pairing, connection and meeting
//! transitions are queued as callbacks and delivered on the next heartbeat,
//! in the order the operations happened. Used by the binary when no vendor
//! library is linked, and by the test suites, which also use the fault and
//! latency knobs (`set_call_latency`, `fail_next_call`, `fail_pump`, `raise`).
//!
//! Every handle call checks that no other call on the same room is in flight
//! and counts violations, so tests can assert per-room serialization.

use super::{
    result_code, CallbackSink, ConnectionState, DeviceProfile, ExitMeetingCmd, MeetingStatus,
    NativeCallback, NativeError, NativeRoomHandle, NativeRuntime, PairedRoomInfo,
};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Entries kept in the heartbeat and call logs; older ones are dropped.
pub const HISTORY_CAPACITY: usize = 1024;

/// Stored credentials for a paired room.
#[derive(Debug, Clone)]
struct StoredRoom {
    display_name: String,
    can_retry: bool,
}

/// Live emulated state of an opened room.
#[derive(Debug, Default)]
struct LoopbackRoom {
    connection: ConnectionState,
    meeting: MeetingStatus,
    audio_muted: bool,
    video_muted: bool,
    in_call: bool,
    latency: Duration,
    fail_next: Option<i32>,
}

#[derive(Debug, Default)]
struct LoopbackState {
    profile: Option<DeviceProfile>,
    stored: BTreeMap<String, StoredRoom>,
    rooms: HashMap<String, LoopbackRoom>,
    pending: VecDeque<NativeCallback>,
    rejected_codes: Vec<String>,
    pump_failure: Option<String>,
    auto_reconnect: bool,
    heartbeat_count: usize,
    heartbeats: VecDeque<Instant>,
    calls: VecDeque<String>,
    reentrancy_violations: u64,
    released: Vec<(String, Instant)>,
    shut_down: Option<Instant>,
}

/// Append to a log, keeping only the latest `HISTORY_CAPACITY` entries.
fn push_bounded<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() == HISTORY_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

impl LoopbackState {
    fn queue(&mut self, callback: NativeCallback) {
        self.pending.push_back(callback);
    }

    fn queue_connection(&mut self, room_id: &str, state: ConnectionState) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.connection = state;
        }
        self.queue(NativeCallback::ConnectionStateChanged {
            room_id: room_id.to_string(),
            state,
        });
    }

    fn queue_meeting(&mut self, room_id: &str, status: MeetingStatus) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.meeting = status;
        }
        self.queue(NativeCallback::MeetingStatusUpdated {
            room_id: room_id.to_string(),
            status,
        });
    }

    fn enter_meeting(&mut self, room_id: &str) {
        self.queue_meeting(room_id, MeetingStatus::ConnectingToMeeting);
        self.queue_meeting(room_id, MeetingStatus::InMeeting);
        self.queue(NativeCallback::ConfReady {
            room_id: room_id.to_string(),
        });
    }
}

/// Loopback runtime. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct LoopbackRuntime {
    state: Arc<Mutex<LoopbackState>>,
}

impl Default for LoopbackRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackRuntime {
    /// Create an empty runtime (no stored credentials).
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState {
                auto_reconnect: true,
                ..LoopbackState::default()
            })),
        }
    }

    /// Seed the credential store with a previously paired room.
    #[must_use]
    pub fn with_paired_room(self, room_id: impl Into<String>, can_retry: bool) -> Self {
        let room_id = room_id.into();
        self.lock().stored.insert(
            room_id.clone(),
            StoredRoom {
                display_name: room_id,
                can_retry,
            },
        );
        self
    }

    /// Activation codes the emulated remote side refuses.
    #[must_use]
    pub fn with_rejected_code(self, code: impl Into<String>) -> Self {
        self.lock().rejected_codes.push(code.into());
        self
    }

    /// Whether opening a stored room reconnects it automatically (default: true).
    #[must_use]
    pub fn with_auto_reconnect(self, enabled: bool) -> Self {
        self.lock().auto_reconnect = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call on `room_id` take at least `latency`.
    pub fn set_call_latency(&self, room_id: &str, latency: Duration) {
        if let Some(room) = self.lock().rooms.get_mut(room_id) {
            room.latency = latency;
        }
    }

    /// Make the next handle call on `room_id` fail with `code`.
    pub fn fail_next_call(&self, room_id: &str, code: i32) {
        if let Some(room) = self.lock().rooms.get_mut(room_id) {
            room.fail_next = Some(code);
        }
    }

    /// Make every following heartbeat fail.
    pub fn fail_pump(&self, message: impl Into<String>) {
        self.lock().pump_failure = Some(message.into());
    }

    /// Queue a callback as if the remote side raised it.
    pub fn raise(&self, callback: NativeCallback) {
        let mut state = self.lock();
        match &callback {
            NativeCallback::ConnectionStateChanged { room_id, state: s } => {
                if let Some(room) = state.rooms.get_mut(room_id) {
                    room.connection = *s;
                }
            }
            NativeCallback::MeetingStatusUpdated { room_id, status } => {
                if let Some(room) = state.rooms.get_mut(room_id) {
                    room.meeting = *status;
                }
            }
            _ => {}
        }
        state.queue(callback);
    }

    /// Number of heartbeats pumped so far.
    #[must_use]
    pub fn heartbeat_count(&self) -> usize {
        self.lock().heartbeat_count
    }

    /// Wall-clock instants of the most recent heartbeats, oldest first.
    #[must_use]
    pub fn heartbeat_instants(&self) -> Vec<Instant> {
        self.lock().heartbeats.iter().copied().collect()
    }

    /// Most recent handle calls as `"<operation>:<room_id>"`, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.iter().cloned().collect()
    }

    /// Times a call started on a room while another call on it was in flight.
    #[must_use]
    pub fn reentrancy_violations(&self) -> u64 {
        self.lock().reentrancy_violations
    }

    /// Rooms whose handle was released, in release order.
    #[must_use]
    pub fn released_rooms(&self) -> Vec<String> {
        self.lock()
            .released
            .iter()
            .map(|(room_id, _)| room_id.clone())
            .collect()
    }

    /// Instant of the earliest handle release, if any.
    #[must_use]
    pub fn first_release_at(&self) -> Option<Instant> {
        self.lock().released.iter().map(|(_, at)| *at).min()
    }

    /// Instant `shutdown` was called.
    #[must_use]
    pub fn shut_down_at(&self) -> Option<Instant> {
        self.lock().shut_down
    }

    /// Rooms with an open handle.
    #[must_use]
    pub fn open_rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.lock().rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Whether credentials for `room_id` are stored.
    #[must_use]
    pub fn is_stored(&self, room_id: &str) -> bool {
        self.lock().stored.contains_key(room_id)
    }

    /// Profile passed to `initialize`, if any.
    #[must_use]
    pub fn profile(&self) -> Option<DeviceProfile> {
        self.lock().profile.clone()
    }

    /// Whether `shutdown` was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down.is_some()
    }

    /// Audio/video mute flags of an open room.
    #[must_use]
    pub fn mute_state(&self, room_id: &str) -> Option<(bool, bool)> {
        self.lock()
            .rooms
            .get(room_id)
            .map(|room| (room.audio_muted, room.video_muted))
    }

    /// Run one handle operation with the reentrancy check and injected latency.
    fn call<T>(
        &self,
        room_id: &str,
        operation: &str,
        f: impl FnOnce(&mut LoopbackState) -> Result<T, NativeError>,
    ) -> Result<T, NativeError> {
        let latency = {
            let mut state = self.lock();
            push_bounded(&mut state.calls, format!("{operation}:{room_id}"));
            let Some(room) = state.rooms.get_mut(room_id) else {
                return Err(NativeError::Rejected {
                    code: result_code::INVALID_STATE,
                });
            };
            let reentered = room.in_call;
            room.in_call = true;
            let latency = room.latency;
            if reentered {
                state.reentrancy_violations += 1;
            }
            latency
        };

        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut state = self.lock();
        let injected = match state.rooms.get_mut(room_id) {
            Some(room) => {
                room.in_call = false;
                room.fail_next.take()
            }
            None => None,
        };
        if let Some(code) = injected {
            return Err(NativeError::Rejected { code });
        }
        f(&mut state)
    }
}

impl NativeRuntime for LoopbackRuntime {
    fn initialize(&self, profile: &DeviceProfile) -> Result<(), NativeError> {
        let mut state = self.lock();
        debug!(
            target: "rc.native.loopback",
            app_name = %profile.app_name,
            content_dir = %profile.content_dir.display(),
            "Loopback runtime initialized"
        );
        state.profile = Some(profile.clone());
        state.shut_down = None;
        Ok(())
    }

    fn query_previously_paired_rooms(&self) -> Result<Vec<PairedRoomInfo>, NativeError> {
        let state = self.lock();
        if state.profile.is_none() {
            return Err(NativeError::Unavailable("runtime not initialized".to_string()));
        }
        Ok(state
            .stored
            .iter()
            .map(|(room_id, stored)| PairedRoomInfo {
                room_id: room_id.clone(),
                display_name: stored.display_name.clone(),
                can_retry_to_pair: stored.can_retry,
            })
            .collect())
    }

    fn create_room_handle(&self, room_id: &str) -> Result<Box<dyn NativeRoomHandle>, NativeError> {
        let mut state = self.lock();
        if state.profile.is_none() || state.shut_down.is_some() {
            return Err(NativeError::Unavailable("runtime not initialized".to_string()));
        }

        if !state.rooms.contains_key(room_id) {
            state.rooms.insert(room_id.to_string(), LoopbackRoom::default());
            if state.auto_reconnect && state.stored.contains_key(room_id) {
                state.queue_connection(room_id, ConnectionState::Established);
                state.queue_connection(room_id, ConnectionState::Connected);
            }
        }

        Ok(Box::new(LoopbackRoomHandle {
            room_id: room_id.to_string(),
            runtime: self.clone(),
        }))
    }

    fn heartbeat(&self, sink: &mut dyn CallbackSink) -> Result<(), NativeError> {
        let pending: Vec<NativeCallback> = {
            let mut state = self.lock();
            if let Some(message) = &state.pump_failure {
                return Err(NativeError::Unavailable(message.clone()));
            }
            state.heartbeat_count += 1;
            push_bounded(&mut state.heartbeats, Instant::now());
            state.pending.drain(..).collect()
        };

        for callback in pending {
            sink.on_callback(callback);
        }
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = Some(Instant::now());
        state.pending.clear();
    }
}

/// Handle to one emulated room.
#[derive(Debug)]
pub struct LoopbackRoomHandle {
    room_id: String,
    runtime: LoopbackRuntime,
}

impl NativeRoomHandle for LoopbackRoomHandle {
    fn room_id(&self) -> &str {
        &self.room_id
    }

    fn pair_with_activation_code(&mut self, activation_code: &str) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        let code = activation_code.trim().to_string();
        self.runtime.call(&self.room_id, "pair", move |state| {
            if code.is_empty() {
                return Err(NativeError::Rejected {
                    code: result_code::INVALID_PARAMETER,
                });
            }

            if state.rejected_codes.contains(&code) {
                state.queue(NativeCallback::PairRoomResult {
                    room_id,
                    result: result_code::INVALID_PARAMETER,
                });
                return Ok(());
            }

            state.stored.insert(
                room_id.clone(),
                StoredRoom {
                    display_name: room_id.clone(),
                    can_retry: true,
                },
            );
            state.queue(NativeCallback::PairRoomResult {
                room_id: room_id.clone(),
                result: result_code::SUCCESS,
            });
            state.queue_connection(&room_id, ConnectionState::Established);
            state.queue_connection(&room_id, ConnectionState::Connected);
            Ok(())
        })
    }

    fn unpair(&mut self) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        self.runtime.call(&self.room_id, "unpair", move |state| {
            state.stored.remove(&room_id);
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.connection = ConnectionState::None;
                room.meeting = MeetingStatus::NotInMeeting;
            }
            Ok(())
        })
    }

    fn retry_pair(&mut self) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        self.runtime.call(&self.room_id, "retry_pair", move |state| {
            match state.stored.get(&room_id) {
                Some(stored) if stored.can_retry => {
                    state.queue_connection(&room_id, ConnectionState::Established);
                    state.queue_connection(&room_id, ConnectionState::Connected);
                    Ok(())
                }
                _ => Err(NativeError::Rejected {
                    code: result_code::NOT_PAIRED,
                }),
            }
        })
    }

    fn connection_state(&mut self) -> Result<ConnectionState, NativeError> {
        let room_id = self.room_id.clone();
        self.runtime
            .call(&self.room_id, "connection_state", move |state| {
                Ok(state
                    .rooms
                    .get(&room_id)
                    .map(|room| room.connection)
                    .unwrap_or_default())
            })
    }

    fn start_instant_meeting(&mut self) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        self.runtime
            .call(&self.room_id, "start_instant_meeting", move |state| {
                require_connected(state, &room_id)?;
                state.enter_meeting(&room_id);
                Ok(())
            })
    }

    fn join_meeting(&mut self, meeting_number: &str, _password: &str) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        let valid = !meeting_number.is_empty() && meeting_number.chars().all(|c| c.is_ascii_digit());
        self.runtime.call(&self.room_id, "join_meeting", move |state| {
            if !valid {
                return Err(NativeError::Rejected {
                    code: result_code::INVALID_PARAMETER,
                });
            }
            require_connected(state, &room_id)?;
            state.enter_meeting(&room_id);
            Ok(())
        })
    }

    fn exit_meeting(&mut self, cmd: ExitMeetingCmd) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        let operation = match cmd {
            ExitMeetingCmd::Leave => "exit_meeting_leave",
            ExitMeetingCmd::End => "exit_meeting_end",
        };
        self.runtime.call(&self.room_id, operation, move |state| {
            let in_meeting = state
                .rooms
                .get(&room_id)
                .is_some_and(|room| room.meeting == MeetingStatus::InMeeting);
            if !in_meeting {
                return Err(NativeError::Rejected {
                    code: result_code::INVALID_STATE,
                });
            }
            state.queue(NativeCallback::ExitMeeting {
                room_id: room_id.clone(),
            });
            state.queue_meeting(&room_id, MeetingStatus::NotInMeeting);
            Ok(())
        })
    }

    fn mute_audio(&mut self, mute: bool) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        self.runtime.call(&self.room_id, "mute_audio", move |state| {
            require_connected(state, &room_id)?;
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.audio_muted = mute;
            }
            Ok(())
        })
    }

    fn mute_video(&mut self, mute: bool) -> Result<(), NativeError> {
        let room_id = self.room_id.clone();
        self.runtime.call(&self.room_id, "mute_video", move |state| {
            require_connected(state, &room_id)?;
            if let Some(room) = state.rooms.get_mut(&room_id) {
                room.video_muted = mute;
            }
            Ok(())
        })
    }

    fn release(self: Box<Self>) {
        let mut state = self.runtime.lock();
        state.rooms.remove(&self.room_id);
        let room_id = self.room_id.clone();
        state.pending.retain(|callback| callback.room_id() != room_id);
        state.released.push((room_id, Instant::now()));
    }
}

fn require_connected(state: &LoopbackState, room_id: &str) -> Result<(), NativeError> {
    let connected = state
        .rooms
        .get(room_id)
        .is_some_and(|room| room.connection == ConnectionState::Connected);
    if connected {
        Ok(())
    } else {
        Err(NativeError::Rejected {
            code: result_code::INVALID_STATE,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn initialized() -> LoopbackRuntime {
        let runtime = LoopbackRuntime::new();
        runtime.initialize(&DeviceProfile::default()).unwrap();
        runtime
    }

    fn pump(runtime: &LoopbackRuntime) -> Vec<NativeCallback> {
        let mut sink = Vec::new();
        runtime.heartbeat(&mut sink).unwrap();
        sink
    }

    #[test]
    fn test_query_requires_initialize() {
        let runtime = LoopbackRuntime::new().with_paired_room("room1", true);
        assert!(matches!(
            runtime.query_previously_paired_rooms(),
            Err(NativeError::Unavailable(_))
        ));

        runtime.initialize(&DeviceProfile::default()).unwrap();
        let rooms = runtime.query_previously_paired_rooms().unwrap();
        assert_eq!(rooms.len(), 1);
        let room = rooms.first().unwrap();
        assert_eq!(room.room_id, "room1");
        assert!(room.can_retry_to_pair);
    }

    #[test]
    fn test_pair_result_delivered_on_next_heartbeat() {
        let runtime = initialized();
        let mut handle = runtime.create_room_handle("room1").unwrap();

        handle.pair_with_activation_code("ABC-123").unwrap();
        assert!(runtime.is_stored("room1"));

        let callbacks = pump(&runtime);
        assert_eq!(
            callbacks,
            vec![
                NativeCallback::PairRoomResult {
                    room_id: "room1".to_string(),
                    result: 0
                },
                NativeCallback::ConnectionStateChanged {
                    room_id: "room1".to_string(),
                    state: ConnectionState::Established
                },
                NativeCallback::ConnectionStateChanged {
                    room_id: "room1".to_string(),
                    state: ConnectionState::Connected
                },
            ]
        );
        assert!(pump(&runtime).is_empty());
    }

    #[test]
    fn test_rejected_code_reports_failure_asynchronously() {
        let runtime = initialized().with_rejected_code("BAD-000");
        let mut handle = runtime.create_room_handle("room1").unwrap();

        // The call itself is accepted
        handle.pair_with_activation_code("BAD-000").unwrap();

        let callbacks = pump(&runtime);
        assert_eq!(
            callbacks,
            vec![NativeCallback::PairRoomResult {
                room_id: "room1".to_string(),
                result: result_code::INVALID_PARAMETER
            }]
        );
        assert!(!runtime.is_stored("room1"));
    }

    #[test]
    fn test_empty_activation_code_rejected_synchronously() {
        let runtime = initialized();
        let mut handle = runtime.create_room_handle("room1").unwrap();
        assert_eq!(
            handle.pair_with_activation_code("  "),
            Err(NativeError::Rejected {
                code: result_code::INVALID_PARAMETER
            })
        );
    }

    #[test]
    fn test_meeting_requires_connection() {
        let runtime = initialized();
        let mut handle = runtime.create_room_handle("room1").unwrap();
        assert!(handle.start_instant_meeting().is_err());

        handle.pair_with_activation_code("ABC-123").unwrap();
        pump(&runtime);

        handle.start_instant_meeting().unwrap();
        let callbacks = pump(&runtime);
        assert!(callbacks.contains(&NativeCallback::MeetingStatusUpdated {
            room_id: "room1".to_string(),
            status: MeetingStatus::InMeeting
        }));

        handle.exit_meeting(ExitMeetingCmd::Leave).unwrap();
        let callbacks = pump(&runtime);
        assert_eq!(
            callbacks.last(),
            Some(&NativeCallback::MeetingStatusUpdated {
                room_id: "room1".to_string(),
                status: MeetingStatus::NotInMeeting
            })
        );
    }

    #[test]
    fn test_release_drops_pending_callbacks() {
        let runtime = initialized();
        let mut handle = runtime.create_room_handle("room1").unwrap();
        handle.pair_with_activation_code("ABC-123").unwrap();

        handle.release();

        assert!(pump(&runtime).is_empty());
        assert_eq!(runtime.released_rooms(), vec!["room1".to_string()]);
        assert!(runtime.open_rooms().is_empty());
    }

    #[test]
    fn test_stored_room_reconnects_when_opened() {
        let runtime = LoopbackRuntime::new().with_paired_room("room1", true);
        runtime.initialize(&DeviceProfile::default()).unwrap();
        let _handle = runtime.create_room_handle("room1").unwrap();

        let callbacks = pump(&runtime);
        assert_eq!(callbacks.len(), 2);
    }

    #[test]
    fn test_fail_next_call_and_pump_failure() {
        let runtime = initialized();
        let mut handle = runtime.create_room_handle("room1").unwrap();

        runtime.fail_next_call("room1", result_code::INTERNAL_ERROR);
        assert_eq!(
            handle.unpair(),
            Err(NativeError::Rejected {
                code: result_code::INTERNAL_ERROR
            })
        );
        assert!(handle.unpair().is_ok());

        runtime.fail_pump("device lost");
        let mut sink = Vec::new();
        assert!(matches!(
            runtime.heartbeat(&mut sink),
            Err(NativeError::Unavailable(msg)) if msg == "device lost"
        ));
    }

    #[test]
    fn test_call_log_and_no_violations_when_sequential() {
        let runtime = initialized();
        let mut handle = runtime.create_room_handle("room1").unwrap();
        let _ = handle.connection_state();
        let _ = handle.mute_audio(true);

        assert_eq!(
            runtime.calls(),
            vec!["connection_state:room1".to_string(), "mute_audio:room1".to_string()]
        );
        assert_eq!(runtime.reentrancy_violations(), 0);
    }

    #[test]
    fn test_logs_keep_only_recent_entries() {
        let runtime = initialized();
        let mut handle = runtime.create_room_handle("room1").unwrap();
        for _ in 0..HISTORY_CAPACITY + 10 {
            let _ = handle.connection_state();
            pump(&runtime);
        }
        let _ = handle.mute_audio(true);

        assert_eq!(runtime.heartbeat_count(), HISTORY_CAPACITY + 10);
        assert_eq!(runtime.heartbeat_instants().len(), HISTORY_CAPACITY);
        let calls = runtime.calls();
        assert_eq!(calls.len(), HISTORY_CAPACITY);
        assert_eq!(calls.last().map(String::as_str), Some("mute_audio:room1"));
    }
}
