//! Registry properties: startup population, idempotent registration,
//! removal on unpair and remote-side unpair.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use room_controller::native::{result_code, UnpairReason};
use room_controller::RoomError;
use room_test_utils::*;

async fn wait_for_room_state(harness: &TestController, room_id: &str, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let snapshot = harness.controller.room(room_id).await.unwrap();
        if snapshot.connection_state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{room_id} never reached {state:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_startup_registry_equals_paired_set() {
    let runtime = LoopbackRuntime::new()
        .with_paired_room("lobby", true)
        .with_paired_room("boardroom", false)
        .with_paired_room("huddle-3", true);

    let harness = TestController::start_with(runtime).await;

    let rooms = harness.controller.list_rooms().await;
    let ids: Vec<&str> = rooms.iter().map(|r| r.room_id.as_str()).collect();
    assert_eq!(ids, vec!["boardroom", "huddle-3", "lobby"]);
    assert!(rooms.iter().all(|r| r.paired));
    let boardroom = rooms.iter().find(|r| r.room_id == "boardroom").unwrap();
    assert!(!boardroom.can_retry);

    let mut open = harness.runtime.open_rooms();
    open.sort();
    assert_eq!(open, vec!["boardroom", "huddle-3", "lobby"]);

    // Stored credentials reconnect on the first heartbeats
    wait_for_room_state(&harness, "lobby", ConnectionState::Connected).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_startup_with_empty_store_has_no_rooms() {
    let harness = TestController::start().await;
    assert!(harness.controller.list_rooms().await.is_empty());
    assert!(harness.runtime.open_rooms().is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let harness = TestController::start().await;
    let room = TestRoom::random();

    let first = harness.controller.register_room(&room.id).await.unwrap();
    let second = harness.controller.register_room(&room.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.controller.list_rooms().await.len(), 1);
    assert_eq!(harness.runtime.open_rooms(), vec![room.id.clone()]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_register_creates_one_session() {
    let harness = TestController::start().await;
    let controller = &harness.controller;

    let (a, b, c) = tokio::join!(
        controller.register_room("room1"),
        controller.register_room("room1"),
        controller.register_room("room1"),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert!(c.is_ok());
    assert_eq!(controller.list_rooms().await.len(), 1);
    assert_eq!(harness.runtime.open_rooms(), vec!["room1".to_string()]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unpair_removes_room() {
    let harness = TestController::start().await;
    let mut events = harness.pair_and_connect("room1").await;
    let _other = harness.pair_and_connect("room2").await;

    let ack = harness.controller.unpair("room1").await.unwrap();
    assert!(ack.accepted);

    let ids: Vec<String> = harness
        .controller
        .list_rooms()
        .await
        .into_iter()
        .map(|r| r.room_id)
        .collect();
    assert_eq!(ids, vec!["room2".to_string()]);

    assert!(matches!(
        harness.controller.start_instant_meeting("room1").await,
        Err(RoomError::RoomNotFound(_))
    ));
    assert!(matches!(
        harness.controller.set_audio_mute("room1", true).await,
        Err(RoomError::RoomNotFound(_))
    ));
    assert!(matches!(
        harness.controller.retry_pair("room1").await,
        Err(RoomError::RoomNotFound(_))
    ));
    assert!(matches!(
        harness.controller.unpair("room1").await,
        Err(RoomError::RoomNotFound(_))
    ));
    assert!(matches!(
        harness.controller.subscribe("room1").await,
        Err(RoomError::RoomNotFound(_))
    ));

    // Existing subscribers are invalidated and the handle released
    assert!(matches!(
        wait_for_close(&mut events).await,
        RoomError::RoomNotFound(id) if id == "room1"
    ));
    assert_eq!(harness.runtime.released_rooms(), vec!["room1".to_string()]);
    assert!(!harness.runtime.is_stored("room1"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_pair_after_unpair_recreates_session() {
    let harness = TestController::start().await;
    let _events = harness.pair_and_connect("room1").await;
    harness.controller.unpair("room1").await.unwrap();

    harness.controller.pair("room1", ACTIVATION_CODE).await.unwrap();

    let snapshot = harness.controller.room("room1").await.unwrap();
    assert_eq!(snapshot.room_id, "room1");
    assert_eq!(harness.runtime.open_rooms(), vec!["room1".to_string()]);
    assert_eq!(harness.runtime.released_rooms(), vec!["room1".to_string()]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_second_pair_is_rejected() {
    let harness = TestController::start_with_settings(LoopbackRuntime::new(), |settings| {
        settings.heartbeat_interval = Duration::from_millis(500);
    })
    .await;
    harness.controller.register_room("room1").await.unwrap();

    harness.controller.pair("room1", ACTIVATION_CODE).await.unwrap();
    assert!(matches!(
        harness.controller.pair("room1", ACTIVATION_CODE).await,
        Err(RoomError::AlreadyPairing(_))
    ));

    let mut events = harness.controller.subscribe("room1").await.unwrap();
    wait_for_connection(&mut events, ConnectionState::Connected).await;
    let result = harness.controller.pair("room1", ACTIVATION_CODE).await;
    assert!(matches!(result, Err(RoomError::AlreadyPaired(_))));
    assert_eq!(result.unwrap_err().status_code(), 409);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rejected_activation_code_arrives_as_event() {
    let runtime = LoopbackRuntime::new().with_rejected_code(REJECTED_ACTIVATION_CODE);
    let harness = TestController::start_with(runtime).await;
    harness.controller.register_room("room1").await.unwrap();
    let mut events = harness.controller.subscribe("room1").await.unwrap();

    let ack = harness
        .controller
        .pair("room1", REJECTED_ACTIVATION_CODE)
        .await
        .unwrap();
    assert!(ack.accepted, "rejection is asynchronous");

    let event = next_event(&mut events).await;
    assert_eq!(
        event.kind,
        EventKind::PairResult {
            result: result_code::INVALID_PARAMETER
        }
    );
    let snapshot = harness.controller.room("room1").await.unwrap();
    assert!(!snapshot.paired);
    assert!(!snapshot.pairing_in_progress);

    // A fresh attempt is allowed after the failure
    harness.controller.pair("room1", ACTIVATION_CODE).await.unwrap();
    wait_for_connection(&mut events, ConnectionState::Connected).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_remote_unpair_keeps_session() {
    let harness = TestController::start().await;
    let mut events = harness.pair_and_connect("room1").await;

    harness.runtime.raise(NativeCallback::RoomUnpaired {
        room_id: "room1".to_string(),
        reason: UnpairReason::TokenInvalid,
    });
    let event = wait_for_event(&mut events, |kind| {
        matches!(kind, EventKind::RoomUnpaired { .. })
    })
    .await;
    assert_eq!(
        event.kind,
        EventKind::RoomUnpaired {
            reason: UnpairReason::TokenInvalid
        }
    );

    let snapshot = harness.controller.room("room1").await.unwrap();
    assert!(!snapshot.paired);
    assert!(!snapshot.can_retry);
    assert_eq!(snapshot.connection_state, ConnectionState::None);

    assert!(matches!(
        harness.controller.retry_pair("room1").await,
        Err(RoomError::NativeCallFailed { code, .. }) if code == result_code::INVALID_STATE
    ));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_retry_pair_reconnects_stored_room() {
    let runtime = LoopbackRuntime::new()
        .with_paired_room("room1", true)
        .with_auto_reconnect(false);
    let harness = TestController::start_with(runtime).await;
    let mut events = harness.controller.subscribe("room1").await.unwrap();

    let ack = harness.controller.retry_pair("room1").await.unwrap();
    assert!(ack.accepted);
    wait_for_connection(&mut events, ConnectionState::Connected).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_retry_pair_without_retry_credentials_fails() {
    let runtime = LoopbackRuntime::new()
        .with_paired_room("room1", false)
        .with_auto_reconnect(false);
    let harness = TestController::start_with(runtime).await;

    assert!(matches!(
        harness.controller.retry_pair("room1").await,
        Err(RoomError::NativeCallFailed { .. })
    ));
    assert!(!harness
        .runtime
        .calls()
        .iter()
        .any(|call| call.starts_with("retry_pair")));

    harness.shutdown().await;
}
