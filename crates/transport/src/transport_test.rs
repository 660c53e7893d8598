//! Tests for the transport state machine and in-flight ceiling

use super::*;
use crate::testing::Fixture;
use serde_json::json;

// =============================================================================
// In-flight counter
// =============================================================================

#[test]
fn test_ceiling_blocks_unforced_only() {
    let in_flight = InFlight::new(2);
    assert!(in_flight.try_acquire(false));
    assert!(in_flight.try_acquire(false));
    assert!(!in_flight.try_acquire(false));
    assert!(in_flight.is_saturated());

    assert!(in_flight.try_acquire(true));
    assert_eq!(in_flight.count(), 3);

    in_flight.release();
    in_flight.release();
    assert!(in_flight.try_acquire(false));
}

#[test]
fn test_release_never_underflows() {
    let in_flight = InFlight::new(10);
    in_flight.release();
    assert_eq!(in_flight.count(), 0);
}

#[tokio::test]
async fn test_wait_idle() {
    let in_flight = Arc::new(InFlight::new(10));
    assert!(in_flight.wait_idle(Duration::from_millis(10)).await);

    in_flight.try_acquire(false);
    assert!(!in_flight.wait_idle(Duration::from_millis(20)).await);

    let releaser = {
        let in_flight = Arc::clone(&in_flight);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            in_flight.release();
        })
    };
    assert!(in_flight.wait_idle(Duration::from_secs(5)).await);
    releaser.await.unwrap();
}

// =============================================================================
// State machine
// =============================================================================

#[tokio::test]
async fn test_connect_announces_and_subscribes() {
    let mut fixture = Fixture::new(10);
    let handle = fixture.transport.handle();
    fixture.set_public_ip("203.0.113.7");

    fixture
        .transport
        .handle_event(TransportEvent::Connecting)
        .await;
    assert_eq!(handle.state(), TransportState::Connecting);

    fixture
        .transport
        .handle_event(TransportEvent::Connected)
        .await;
    assert_eq!(handle.state(), TransportState::Connected);
    assert_eq!(
        fixture.link.payloads("v1/agent/agent-1/connect"),
        vec![json!({"public_ip": "203.0.113.7"})]
    );
    assert_eq!(
        *fixture.link.subscribed.lock(),
        vec!["v1/agent/agent-1/notification".to_string()]
    );
    assert_eq!(fixture.metrics.snapshot().connections, 1);
}

#[tokio::test]
async fn test_reconnect_resubscribes_and_resets_in_flight() {
    let mut fixture = Fixture::connected(10).await;
    let handle = fixture.transport.handle();

    handle.publish_data(b"[]".to_vec(), 0).await.unwrap();
    assert_eq!(handle.in_flight().count(), 1);

    fixture
        .transport
        .handle_event(TransportEvent::ConnectionLost("broken pipe".into()))
        .await;
    assert_eq!(handle.state(), TransportState::Disconnected);
    assert_eq!(fixture.metrics.snapshot().disconnections, 1);

    // Data is not queued while offline
    assert!(!handle.publish_data(b"[]".to_vec(), 0).await.unwrap());
    assert_eq!(fixture.metrics.snapshot().messages_dropped_offline, 1);

    fixture
        .transport
        .handle_event(TransportEvent::Connected)
        .await;
    assert_eq!(fixture.link.subscribed.lock().len(), 2);
    // Only the new connect message is outstanding
    assert_eq!(handle.in_flight().count(), 1);
}

#[tokio::test]
async fn test_ceiling_drops_data_but_not_lifecycle_messages() {
    let fixture = Fixture::connected(2).await;
    let handle = fixture.transport.handle();

    assert!(handle.publish_data(b"[1]".to_vec(), 1).await.unwrap());
    assert!(handle.publish_data(b"[2]".to_vec(), 1).await.unwrap());
    assert!(!handle.publish_data(b"[3]".to_vec(), 1).await.unwrap());

    let snapshot = fixture.metrics.snapshot();
    assert_eq!(snapshot.batches_sent, 2);
    assert_eq!(snapshot.messages_dropped_in_flight, 1);

    // An acknowledgment frees a slot
    handle.in_flight().release();
    assert!(handle.publish_data(b"[4]".to_vec(), 1).await.unwrap());

    // Disconnect announcement bypasses the ceiling
    handle.shutdown(true, Duration::from_millis(10)).await;
    assert_eq!(
        fixture.link.payloads("v1/agent/agent-1/disconnect"),
        vec![json!({"disconnect-cause": "Clean shutdown"})]
    );
}

#[tokio::test]
async fn test_failed_publish_frees_its_slot() {
    let fixture = Fixture::connected(10).await;
    let handle = fixture.transport.handle();

    fixture
        .link
        .failures
        .store(1, std::sync::atomic::Ordering::SeqCst);
    assert!(handle.publish_data(b"[]".to_vec(), 0).await.is_err());
    assert_eq!(handle.in_flight().count(), 0);
    assert_eq!(fixture.metrics.snapshot().publish_errors, 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_acks_then_disconnects() {
    let fixture = Fixture::connected(10).await;
    let handle = fixture.transport.handle();
    let in_flight = fixture.transport.in_flight();

    let acker = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        in_flight.release();
    });

    handle.shutdown(true, Duration::from_secs(5)).await;
    acker.await.unwrap();

    assert_eq!(handle.in_flight().count(), 0);
    assert!(
        fixture
            .link
            .disconnected
            .load(std::sync::atomic::Ordering::SeqCst)
    );
    assert_eq!(handle.state(), TransportState::Disconnected);
}

#[tokio::test]
async fn test_shutdown_without_announcement() {
    let fixture = Fixture::connected(10).await;
    let handle = fixture.transport.handle();

    handle.shutdown(false, Duration::from_millis(10)).await;
    assert!(fixture.link.payloads("v1/agent/agent-1/disconnect").is_empty());
}

#[tokio::test]
async fn test_events_during_shutdown_are_ignored() {
    let mut fixture = Fixture::connected(10).await;
    let handle = fixture.transport.handle();
    handle.shutdown(false, Duration::from_millis(10)).await;
    let published = fixture.link.topics().len();

    // The pump may still report a late reconnection
    fixture.transport.handle.set_state(TransportState::Disconnecting);
    fixture
        .transport
        .handle_event(TransportEvent::Connected)
        .await;
    assert_eq!(handle.state(), TransportState::Disconnecting);
    assert_eq!(fixture.link.topics().len(), published);
}

// =============================================================================
// Control channel
// =============================================================================

#[tokio::test]
async fn test_resync_notification_requests_full_pass() {
    let mut fixture = Fixture::connected(10).await;

    fixture
        .transport
        .handle_event(TransportEvent::Control(Bytes::from_static(
            br#"{"message_type": "resync"}"#,
        )))
        .await;
    assert!(fixture.signals.take().resync_requested);
}

#[tokio::test]
async fn test_invalid_notifications_are_ignored() {
    let mut fixture = Fixture::connected(10).await;
    let oversized = format!(r#"{{"message_type": "resync", "pad": "{}"}}"#, "x".repeat(70_000));

    for payload in [
        Bytes::from(oversized),
        Bytes::from_static(b"\xff\xfe"),
        Bytes::from_static(br#"{"message_type": "threshold-update"}"#),
    ] {
        fixture
            .transport
            .handle_event(TransportEvent::Control(payload))
            .await;
    }

    assert!(!fixture.signals.take().resync_requested);
    assert_eq!(fixture.metrics.snapshot().control_messages, 3);
    assert_eq!(fixture.transport.handle().state(), TransportState::Connected);
}

#[tokio::test]
async fn test_run_applies_events_until_cancelled() {
    let fixture = Fixture::new(10);
    let handle = fixture.transport.handle();
    let mut state = handle.watch_state();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(fixture.transport.run(cancel.clone()));

    fixture.events.send(TransportEvent::Connected).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|state| *state == TransportState::Connected),
    )
    .await
    .expect("never connected")
    .unwrap();

    cancel.cancel();
    task.await.unwrap();
}
