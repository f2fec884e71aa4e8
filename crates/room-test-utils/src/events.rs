//! Helpers for consuming event subscriptions in tests.
//!
//! Every wait is bounded by [`EVENT_TIMEOUT`] and panics when it expires, so
//! a missing event fails the test instead of hanging it.

use crate::fixtures::EVENT_TIMEOUT;
use room_controller::events::{EventKind, EventSubscription, RoomEvent};
use room_controller::native::{ConnectionState, MeetingStatus};
use room_controller::RoomError;
use std::time::Duration;

/// Receive the next event.
pub async fn next_event(events: &mut EventSubscription) -> RoomEvent {
    match tokio::time::timeout(EVENT_TIMEOUT, events.recv()).await {
        Ok(Ok(event)) => event,
        Ok(Err(e)) => panic!("subscription for {} closed: {e}", events.room_id()),
        Err(_) => panic!("no event for {} within {EVENT_TIMEOUT:?}", events.room_id()),
    }
}

/// Receive events until one matches, returning it. Earlier events are discarded.
pub async fn wait_for_event(
    events: &mut EventSubscription,
    mut matches: impl FnMut(&EventKind) -> bool,
) -> RoomEvent {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if matches(&event.kind) => return event,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("subscription for {} closed: {e}", events.room_id()),
            Err(_) => panic!(
                "expected event for {} not seen within {EVENT_TIMEOUT:?}",
                events.room_id()
            ),
        }
    }
}

pub async fn wait_for_connection(events: &mut EventSubscription, state: ConnectionState) -> RoomEvent {
    wait_for_event(events, |kind| {
        matches!(kind, EventKind::ConnectionStateChanged { state: s } if *s == state)
    })
    .await
}

pub async fn wait_for_meeting_status(
    events: &mut EventSubscription,
    status: MeetingStatus,
) -> RoomEvent {
    wait_for_event(events, |kind| {
        matches!(kind, EventKind::MeetingStatusChanged { status: s } if *s == status)
    })
    .await
}

/// Collect `count` events in arrival order.
pub async fn collect_events(events: &mut EventSubscription, count: usize) -> Vec<EventKind> {
    let mut kinds = Vec::with_capacity(count);
    for _ in 0..count {
        kinds.push(next_event(events).await.kind);
    }
    kinds
}

/// Take everything already queued without waiting.
///
/// Returns the events and, if the subscription was closed, the close error.
pub fn drain_events(events: &mut EventSubscription) -> (Vec<RoomEvent>, Option<RoomError>) {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(Some(event)) => drained.push(event),
            Ok(None) => return (drained, None),
            Err(e) => return (drained, Some(e)),
        }
    }
}

/// Receive until the subscription closes, returning the close error.
pub async fn wait_for_close(events: &mut EventSubscription) -> RoomError {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return e,
            Err(_) => panic!(
                "subscription for {} still open after {EVENT_TIMEOUT:?}",
                events.room_id()
            ),
        }
    }
}

/// Poll `condition` every few milliseconds until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting until {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
