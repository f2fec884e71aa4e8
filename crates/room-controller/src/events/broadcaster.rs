//! Per-room fan-out of events to independent subscribers.
//!
//! Each subscriber owns a bounded `mpsc` queue. Publishing never awaits a
//! subscriber: delivery is `try_send`, so one slow or dead subscriber cannot
//! delay the others or the heartbeat that publishes.
//!
//! # Overflow policy
//!
//! Disconnect-on-overflow. When a subscriber's queue is full the subscriber
//! is closed with [`CloseReason::Overflow`]: it still drains the events that
//! were queued, then `recv` returns [`RoomError::SubscriberOverflow`]. A
//! subscriber that stopped reading therefore holds at most `queue_capacity`
//! events before it is dropped.
//!
//! # Pruning
//!
//! Subscribers whose receiver was dropped are detected lazily, on the next
//! publish to their room, and removed then.

use crate::errors::RoomError;
use crate::observability::metrics;

use super::RoomEvent;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a subscription stopped receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The delivery queue was full.
    Overflow,
    /// The room was removed from the registry.
    RoomRemoved,
    /// The subscriber was explicitly unsubscribed.
    Unsubscribed,
    /// The controller shut down.
    Shutdown,
}

/// Sending side of one subscription, owned by the broadcaster.
#[derive(Debug)]
struct SubscriberSlot {
    id: Uuid,
    sender: mpsc::Sender<RoomEvent>,
    closed: Arc<OnceLock<CloseReason>>,
}

impl SubscriberSlot {
    fn close(&self, reason: CloseReason) {
        // First reason wins
        let _ = self.closed.set(reason);
    }
}

/// Receiving side of one subscription.
#[derive(Debug)]
pub struct EventSubscription {
    id: Uuid,
    room_id: String,
    receiver: mpsc::Receiver<RoomEvent>,
    closed: Arc<OnceLock<CloseReason>>,
}

impl EventSubscription {
    /// Subscription id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Room this subscription listens to.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Why the subscription was closed, if it was.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.get().copied()
    }

    /// Receive the next event.
    ///
    /// Queued events are always delivered before the close error.
    pub async fn recv(&mut self) -> Result<RoomEvent, RoomError> {
        match self.receiver.recv().await {
            Some(event) => Ok(event),
            None => Err(self.close_error()),
        }
    }

    /// Receive an event if one is queued.
    pub fn try_recv(&mut self) -> Result<Option<RoomEvent>, RoomError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.close_error()),
        }
    }

    fn close_error(&self) -> RoomError {
        match self.close_reason() {
            Some(CloseReason::Overflow) => RoomError::SubscriberOverflow(self.room_id.clone()),
            Some(CloseReason::RoomRemoved) => RoomError::RoomNotFound(self.room_id.clone()),
            Some(CloseReason::Unsubscribed | CloseReason::Shutdown) | None => {
                RoomError::SubscriptionClosed
            }
        }
    }
}

/// Result of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Subscribers the event was queued for.
    pub delivered: usize,
    /// Subscribers disconnected because their queue was full.
    pub overflowed: usize,
    /// Subscribers pruned because their receiver was gone.
    pub pruned: usize,
}

/// Fan-out of room events to subscribers.
#[derive(Debug)]
pub struct EventBroadcaster {
    rooms: RwLock<HashMap<String, Vec<SubscriberSlot>>>,
    queue_capacity: usize,
    active: AtomicUsize,
}

impl EventBroadcaster {
    /// Create a broadcaster whose subscribers each get `queue_capacity` slots.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            active: AtomicUsize::new(0),
        }
    }

    /// Per-subscriber queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Register a new subscriber for `room_id`.
    pub async fn subscribe(&self, room_id: &str) -> EventSubscription {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let closed = Arc::new(OnceLock::new());
        let id = Uuid::new_v4();

        self.rooms
            .write()
            .await
            .entry(room_id.to_string())
            .or_default()
            .push(SubscriberSlot {
                id,
                sender,
                closed: Arc::clone(&closed),
            });
        self.adjust_active(1, 0);

        debug!(
            target: "rc.events",
            room_id = %room_id,
            subscriber_id = %id,
            "Subscriber registered"
        );

        EventSubscription {
            id,
            room_id: room_id.to_string(),
            receiver,
            closed,
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub async fn unsubscribe(&self, subscription: EventSubscription) -> bool {
        let removed = self
            .remove_where(&subscription.room_id, |slot| slot.id == subscription.id)
            .await;
        for slot in &removed {
            slot.close(CloseReason::Unsubscribed);
        }
        !removed.is_empty()
    }

    /// Deliver `event` to every current subscriber of its room.
    ///
    /// A room with no subscribers is a no-op.
    pub async fn publish(&self, event: &RoomEvent) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        let mut stale: Vec<Uuid> = Vec::new();

        {
            let rooms = self.rooms.read().await;
            let Some(slots) = rooms.get(&event.room_id) else {
                return outcome;
            };

            for slot in slots {
                match slot.sender.try_send(event.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        slot.close(CloseReason::Overflow);
                        warn!(
                            target: "rc.events",
                            room_id = %event.room_id,
                            subscriber_id = %slot.id,
                            capacity = self.queue_capacity,
                            "Subscriber queue full, disconnecting subscriber"
                        );
                        metrics::record_subscriber_overflow();
                        outcome.overflowed += 1;
                        stale.push(slot.id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(
                            target: "rc.events",
                            room_id = %event.room_id,
                            subscriber_id = %slot.id,
                            "Subscriber gone, pruning"
                        );
                        outcome.pruned += 1;
                        stale.push(slot.id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            self.remove_where(&event.room_id, |slot| stale.contains(&slot.id))
                .await;
        }

        metrics::record_event_published(event.kind.as_str());
        outcome
    }

    /// Close every subscriber of `room_id`. Returns how many were closed.
    pub async fn close_room(&self, room_id: &str) -> usize {
        let removed = self.remove_where(room_id, |_| true).await;
        for slot in &removed {
            slot.close(CloseReason::RoomRemoved);
        }
        if !removed.is_empty() {
            info!(
                target: "rc.events",
                room_id = %room_id,
                subscribers = removed.len(),
                "Closed room subscribers"
            );
        }
        removed.len()
    }

    /// Close every subscriber of every room.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<SubscriberSlot> = {
            let mut rooms = self.rooms.write().await;
            rooms.drain().flat_map(|(_, slots)| slots).collect()
        };
        for slot in &drained {
            slot.close(CloseReason::Shutdown);
        }
        self.adjust_active(0, drained.len());
        drained.len()
    }

    /// Number of registered subscribers for `room_id` (including ones not yet pruned).
    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms.read().await.get(room_id).map_or(0, Vec::len)
    }

    /// Number of registered subscribers across all rooms.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove matching slots of one room; drops their senders.
    async fn remove_where(
        &self,
        room_id: &str,
        predicate: impl Fn(&SubscriberSlot) -> bool,
    ) -> Vec<SubscriberSlot> {
        let removed = {
            let mut rooms = self.rooms.write().await;
            let Some(slots) = rooms.get_mut(room_id) else {
                return Vec::new();
            };
            let (removed, kept): (Vec<_>, Vec<_>) =
                std::mem::take(slots).into_iter().partition(|slot| predicate(slot));
            if kept.is_empty() {
                rooms.remove(room_id);
            } else {
                *slots = kept;
            }
            removed
        };
        self.adjust_active(0, removed.len());
        removed
    }

    fn adjust_active(&self, added: usize, removed: usize) {
        let count = if added > 0 {
            self.active.fetch_add(added, Ordering::SeqCst) + added
        } else {
            self.active.fetch_sub(removed, Ordering::SeqCst) - removed
        };
        metrics::set_subscribers_active(count);
    }
}
