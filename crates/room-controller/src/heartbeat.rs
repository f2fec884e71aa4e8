//! Heartbeat driver: the only caller of the native pump.
//!
//! Every interval the driver pumps the runtime once, translates the delivered
//! callbacks into [`RoomEvent`]s, applies each to its room's shared state and
//! publishes it. Nothing in a tick waits on a room actor or a subscriber:
//! room state is atomic and delivery is `try_send`.
//!
//! Production runs the loop on a dedicated OS thread with its own
//! current-thread runtime ([`HeartbeatDriver::spawn_dedicated`]), so command
//! load on the main runtime cannot delay a tick. Tests drive
//! [`HeartbeatDriver::run`] directly under paused time.
//!
//! A pump error is fatal: the driver stops, cancels the fatal token it was
//! given and reports [`RoomError::PumpFailure`].

use crate::actors::SessionRegistry;
use crate::errors::RoomError;
use crate::events::{EventBroadcaster, RoomEvent};
use crate::native::{NativeCallback, NativeRuntime};
use crate::observability::metrics;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Name of the dedicated heartbeat thread.
const HEARTBEAT_THREAD_NAME: &str = "rc-heartbeat";

/// Drives the native pump at a fixed interval.
pub struct HeartbeatDriver {
    runtime: Arc<dyn NativeRuntime>,
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    interval: Duration,
    fatal: CancellationToken,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Callbacks delivered by the pump.
    pub callbacks: usize,
    /// Events published to a registered room.
    pub published: usize,
    /// Callbacks for rooms not in the registry.
    pub dropped: usize,
}

impl HeartbeatDriver {
    /// `fatal` is cancelled if the pump fails.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn NativeRuntime>,
        registry: Arc<SessionRegistry>,
        broadcaster: Arc<EventBroadcaster>,
        interval: Duration,
        fatal: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            registry,
            broadcaster,
            interval,
            fatal,
        }
    }

    /// Run ticks until `cancel` fires or the pump fails.
    ///
    /// Cancellation is observed between ticks; a tick in progress finishes.
    #[instrument(skip_all, name = "rc.heartbeat", fields(interval_ms = self.interval.as_millis()))]
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RoomError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target: "rc.heartbeat",
            interval_ms = self.interval.as_millis(),
            "Heartbeat started"
        );

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(
                        target: "rc.heartbeat",
                        ticks,
                        "Heartbeat received shutdown signal"
                    );
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.fatal.cancel();
                        return Err(e);
                    }
                    ticks += 1;
                }
            }
        }

        info!(target: "rc.heartbeat", ticks, "Heartbeat stopped");
        Ok(())
    }

    /// Pump once and fan the callbacks out.
    pub async fn tick(&self) -> Result<TickReport, RoomError> {
        let started = Instant::now();

        let mut callbacks: Vec<NativeCallback> = Vec::new();
        if let Err(e) = self.runtime.heartbeat(&mut callbacks) {
            metrics::record_heartbeat_failure();
            error!(
                target: "rc.heartbeat",
                error = %e,
                "Native pump failed, shutting down"
            );
            return Err(RoomError::PumpFailure(e.to_string()));
        }

        let mut report = TickReport {
            callbacks: callbacks.len(),
            ..TickReport::default()
        };

        for callback in callbacks {
            let event = RoomEvent::from_callback(callback);
            match self.registry.get(&event.room_id).await {
                Ok(session) => session.status().apply(&event.kind),
                Err(_) => {
                    debug!(
                        target: "rc.heartbeat",
                        room_id = %event.room_id,
                        kind = event.kind.as_str(),
                        "Dropping event for unregistered room"
                    );
                    report.dropped += 1;
                    continue;
                }
            }
            self.broadcaster.publish(&event).await;
            report.published += 1;
        }

        let elapsed = started.elapsed();
        metrics::record_heartbeat_tick(elapsed, report.callbacks);
        if elapsed > self.interval {
            metrics::record_heartbeat_overrun();
            warn!(
                target: "rc.heartbeat",
                elapsed_ms = elapsed.as_millis(),
                interval_ms = self.interval.as_millis(),
                "Heartbeat tick overran its interval"
            );
        }

        Ok(report)
    }

    /// Run the loop on a dedicated thread with its own current-thread runtime.
    pub fn spawn_dedicated(self, cancel: CancellationToken) -> Result<HeartbeatTask, RoomError> {
        let (done_tx, done_rx) = oneshot::channel();
        let fatal = self.fatal.clone();

        let thread = std::thread::Builder::new()
            .name(HEARTBEAT_THREAD_NAME.to_string())
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.run(cancel)),
                    Err(e) => {
                        fatal.cancel();
                        Err(RoomError::Internal(format!(
                            "failed to build heartbeat runtime: {e}"
                        )))
                    }
                };
                // Receiver gone means nobody waits for us
                let _ = done_tx.send(result);
            })
            .map_err(|e| RoomError::Internal(format!("failed to spawn heartbeat thread: {e}")))?;

        Ok(HeartbeatTask {
            done: done_rx,
            thread,
        })
    }
}

/// A heartbeat loop running on its own thread.
#[derive(Debug)]
pub struct HeartbeatTask {
    done: oneshot::Receiver<Result<(), RoomError>>,
    thread: std::thread::JoinHandle<()>,
}

impl HeartbeatTask {
    /// Wait for the loop to exit and return its result.
    pub async fn join(self) -> Result<(), RoomError> {
        let result = self
            .done
            .await
            .map_err(|_| RoomError::Internal("heartbeat thread exited without a result".into()))?;

        let thread = self.thread;
        if let Ok(Err(_)) = tokio::task::spawn_blocking(move || thread.join()).await {
            warn!(target: "rc.heartbeat", "Heartbeat thread panicked after reporting");
        }
        result
    }

    /// True once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}
