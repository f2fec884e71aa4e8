//! Actor metrics and mailbox monitoring.
//!
//! | Depth    | Level    |
//! |----------|----------|
//! | <= 32    | Normal   |
//! | 33-128   | Warning  |
//! | > 128    | Critical |
//!
//! Depth counts commands sent to a room and not yet finished, including
//! callers still waiting for mailbox space. Commands come from callers waiting
//! on a reply, so a deep mailbox means a native call is stuck.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 32;
pub const ROOM_MAILBOX_WARNING: usize = 128;

/// How backed up a room mailbox is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// At or below the normal threshold.
    Normal,
    /// Commands are piling up behind a slow native call.
    Warning,
    /// The native handle is most likely stuck.
    Critical,
}

/// Tracks queue depth for one room actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    room_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// A command is being sent to the room.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        match Self::level_for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "rc.actor.mailbox",
                    room_id = %self.room_id,
                    depth = new_depth,
                    threshold = ROOM_MAILBOX_WARNING,
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == ROOM_MAILBOX_NORMAL + 1 => {
                // Log once when crossing into warning
                debug!(
                    target: "rc.actor.mailbox",
                    room_id = %self.room_id,
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// The command finished.
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// The send failed; the command never reached the actor.
    pub fn record_send_failed(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        Self::level_for_depth(self.current_depth())
    }

    fn level_for_depth(depth: usize) -> MailboxLevel {
        if depth > ROOM_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > ROOM_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the room actors.
///
/// Shared by the registry (which creates and removes rooms) and every room
/// actor. All fields are atomic for lock-free access from the health router.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Rooms currently registered.
    pub active_rooms: AtomicUsize,
    /// Actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Messages processed across all room actors.
    pub total_messages_processed: AtomicU64,
    /// Native calls that returned an error.
    pub native_call_failures: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let count = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        crate::observability::metrics::set_rooms_active(count);
    }

    pub fn room_removed(&self) {
        let count = self.active_rooms.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        crate::observability::metrics::set_rooms_active(count);
    }

    /// A room actor or its native call panicked.
    pub fn record_panic(&self, room_id: &str) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "rc.actor.panic",
            room_id = %room_id,
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Room actor panic detected, native handle lost"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_native_failure(&self) {
        self.native_call_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new("room-123");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.messages_processed(), 1);

        monitor.record_send_failed();
        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("room-123");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..40 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..100 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_actor_metrics_room_counts() {
        let metrics = ActorMetrics::new();
        metrics.room_created();
        metrics.room_created();
        assert_eq!(metrics.room_count(), 2);

        metrics.room_removed();
        assert_eq!(metrics.room_count(), 1);

        metrics.record_panic("room-1");
        assert_eq!(metrics.panic_count(), 1);
    }
}
