//! `SessionRegistry` - the map from room id to live room session.
//!
//! The map lock is held only across the map operation itself. Native handle
//! creation happens outside it, under a per-room creation slot: two
//! concurrent `register` calls for one room never create two handles, and a
//! slow creation never blocks registering another room.
//! Removal closes the room's subscribers before the handle is released.

use crate::errors::RoomError;
use crate::events::EventBroadcaster;
use crate::native::{NativeRuntime, PairedRoomInfo};

use super::metrics::ActorMetrics;
use super::room::{RoomActor, RoomSession, RoomSettings};
use super::state::{RoomSnapshot, RoomStatus};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Bound on waiting for a room actor to exit after release.
const ACTOR_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Managed room with its actor task.
struct ManagedRoom {
    session: RoomSession,
    task_handle: JoinHandle<()>,
}

/// Registry of live room sessions.
pub struct SessionRegistry {
    runtime: Arc<dyn NativeRuntime>,
    broadcaster: Arc<EventBroadcaster>,
    sessions: RwLock<HashMap<String, ManagedRoom>>,
    /// One slot per room being created.
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    settings: RoomSettings,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        runtime: Arc<dyn NativeRuntime>,
        broadcaster: Arc<EventBroadcaster>,
        settings: RoomSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            runtime,
            broadcaster,
            sessions: RwLock::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
            settings,
            cancel_token,
            metrics,
        }
    }

    /// Return the session for `room_id`, creating it if absent.
    ///
    /// A new session starts with unknown connection and meeting state.
    pub async fn register(&self, room_id: &str) -> Result<RoomSession, RoomError> {
        let (session, _) = self.register_with(room_id, RoomStatus::default).await?;
        Ok(session)
    }

    /// Like [`register`](Self::register), also reporting whether this call
    /// created the session.
    pub async fn register_tracked(&self, room_id: &str) -> Result<(RoomSession, bool), RoomError> {
        self.register_with(room_id, RoomStatus::default).await
    }

    /// Register a room reported by the runtime as previously paired.
    pub async fn register_paired(&self, info: &PairedRoomInfo) -> Result<RoomSession, RoomError> {
        let can_retry = info.can_retry_to_pair;
        let (session, _) = self
            .register_with(&info.room_id, || RoomStatus::previously_paired(can_retry))
            .await?;
        Ok(session)
    }

    #[instrument(skip_all, name = "rc.registry.register", fields(room_id = %room_id))]
    async fn register_with(
        &self,
        room_id: &str,
        initial: impl FnOnce() -> RoomStatus,
    ) -> Result<(RoomSession, bool), RoomError> {
        if let Some(session) = self.lookup(room_id).await {
            return Ok((session, false));
        }

        let slot = Arc::clone(
            self.creating
                .lock()
                .await
                .entry(room_id.to_string())
                .or_default(),
        );
        let result = {
            let _creating = slot.lock().await;
            self.create_session(room_id, initial).await
        };

        // The last holder drops the slot; waiters still queued on it would
        // otherwise race a fresh slot after a failed creation
        let mut creating = self.creating.lock().await;
        if Arc::strong_count(&slot) == 2
            && creating
                .get(room_id)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            creating.remove(room_id);
        }
        result
    }

    /// Open the handle and spawn the actor. Runs under the room's creation slot.
    async fn create_session(
        &self,
        room_id: &str,
        initial: impl FnOnce() -> RoomStatus,
    ) -> Result<(RoomSession, bool), RoomError> {
        // Lost the race to another register
        if let Some(session) = self.lookup(room_id).await {
            return Ok((session, false));
        }
        if self.cancel_token.is_cancelled() {
            return Err(RoomError::ShuttingDown);
        }

        let runtime = Arc::clone(&self.runtime);
        let id = room_id.to_string();
        let handle = tokio::task::spawn_blocking(move || runtime.create_room_handle(&id))
            .await
            .map_err(|e| RoomError::Internal(format!("room handle creation panicked: {e}")))?
            .map_err(|e| {
                warn!(
                    target: "rc.registry",
                    room_id = %room_id,
                    error = %e,
                    "Native runtime refused to open room"
                );
                RoomError::native(room_id, &e)
            })?;

        let (session, task_handle) = RoomActor::spawn(
            room_id.to_string(),
            handle,
            initial(),
            self.settings,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.sessions.write().await.insert(
            room_id.to_string(),
            ManagedRoom {
                session: session.clone(),
                task_handle,
            },
        );
        self.metrics.room_created();

        info!(
            target: "rc.registry",
            room_id = %room_id,
            "Room registered"
        );

        Ok((session, true))
    }

    /// Look up a session.
    pub async fn get(&self, room_id: &str) -> Result<RoomSession, RoomError> {
        self.lookup(room_id)
            .await
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))
    }

    /// Remove a room: close its subscribers, then release its handle.
    ///
    /// No-op if the room is absent.
    #[instrument(skip_all, name = "rc.registry.remove", fields(room_id = %room_id))]
    pub async fn remove(&self, room_id: &str) {
        let removed = self.sessions.write().await.remove(room_id);
        self.finish_removal(room_id, removed).await;
    }

    /// Remove `session` if it is still the registered session for its room.
    #[instrument(skip_all, name = "rc.registry.remove", fields(room_id = %session.room_id()))]
    pub async fn remove_session(&self, session: &RoomSession) {
        let room_id = session.room_id();
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(room_id) {
                Some(managed) if managed.session.same_session(session) => sessions.remove(room_id),
                _ => None,
            }
        };
        self.finish_removal(room_id, removed).await;
    }

    async fn finish_removal(&self, room_id: &str, removed: Option<ManagedRoom>) {
        let Some(managed) = removed else {
            debug!(
                target: "rc.registry",
                room_id = %room_id,
                "Remove for absent room ignored"
            );
            return;
        };
        self.metrics.room_removed();

        self.broadcaster.close_room(room_id).await;
        managed.session.release().await;
        Self::await_actor(room_id, managed.task_handle).await;

        info!(
            target: "rc.registry",
            room_id = %room_id,
            "Room removed"
        );
    }

    /// Snapshots of all rooms, ordered by room id.
    pub async fn list(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<RoomSnapshot> = self
            .sessions
            .read()
            .await
            .values()
            .map(|managed| managed.session.snapshot())
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.sessions.read().await.contains_key(room_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Release every handle and stop every actor.
    ///
    /// Subscribers must already be closed.
    pub async fn release_all(&self) -> usize {
        let drained: Vec<(String, ManagedRoom)> = self.sessions.write().await.drain().collect();
        let count = drained.len();

        for (room_id, managed) in drained {
            managed.session.release().await;
            Self::await_actor(&room_id, managed.task_handle).await;
            self.metrics.room_removed();
        }

        info!(
            target: "rc.registry",
            rooms = count,
            "Released all room handles"
        );
        count
    }

    async fn lookup(&self, room_id: &str) -> Option<RoomSession> {
        self.sessions
            .read()
            .await
            .get(room_id)
            .map(|managed| managed.session.clone())
    }

    async fn await_actor(room_id: &str, task_handle: JoinHandle<()>) {
        match tokio::time::timeout(ACTOR_EXIT_TIMEOUT, task_handle).await {
            Ok(Ok(())) => {
                debug!(
                    target: "rc.registry",
                    room_id = %room_id,
                    "Room actor completed cleanly"
                );
            }
            Ok(Err(e)) => {
                warn!(
                    target: "rc.registry",
                    room_id = %room_id,
                    error = ?e,
                    "Room actor task panicked during removal"
                );
            }
            Err(_) => {
                warn!(
                    target: "rc.registry",
                    room_id = %room_id,
                    "Room actor removal timed out"
                );
            }
        }
    }
}
