//! Transport-level guarantees, driven through the HTTP transport
//!
//! - circuit opens after exactly `failure_threshold` failures
//! - half-open admits a single trial
//! - timed-out requests leave no pending entry behind
//! - a send the caller abandons leaves no pending entry behind
//! - disconnect drains every pending request
//!
//! Time is paused, so breaker resets and request deadlines are instant.

mod common;

use std::sync::Arc;
use std::time::Duration;

use courier_core::{CircuitState, Message, Transport, TransportError, TransportEvent, TransportKind};

use common::{connected_http, Reply, ScriptedChannel};

fn msg(id: &str) -> Message {
    Message::new("chat", serde_json::json!({"text": id})).with_id(id)
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_at_threshold_without_attempting_delivery() {
    let channel = ScriptedChannel::new(Reply::Status(503));
    let transport = connected_http(Arc::clone(&channel), false).await;
    let threshold = transport.core().breaker().config().failure_threshold;

    for i in 0..threshold {
        assert_eq!(transport.core().breaker().state(), CircuitState::Closed);
        let err = transport.send(msg(&format!("f{i}"))).await.unwrap_err();
        assert!(matches!(err, TransportError::DeliveryFailed(_)), "got {err:?}");
    }
    assert_eq!(transport.core().breaker().state(), CircuitState::Open);
    assert_eq!(channel.posts() as u32, threshold);

    let err = transport.send(msg("rejected")).await.unwrap_err();
    assert!(
        matches!(err, TransportError::CircuitOpen { kind: TransportKind::Http, .. }),
        "got {err:?}"
    );
    assert_eq!(channel.posts() as u32, threshold, "no delivery while open");
    assert!(!transport.is_available());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_one_trial_and_reopens_on_failure() {
    let channel = ScriptedChannel::new(Reply::Status(500));
    let transport = connected_http(Arc::clone(&channel), false).await;
    let breaker_config = transport.core().breaker().config().clone();

    for i in 0..breaker_config.failure_threshold {
        let _ = transport.send(msg(&format!("f{i}"))).await;
    }
    let first_open = transport.core().breaker().snapshot();
    assert_eq!(first_open.state, CircuitState::Open);

    tokio::time::advance(breaker_config.reset_timeout + Duration::from_millis(1)).await;

    // The trial hangs on a 202 that is never answered
    channel.set_reply(Reply::Accept);
    let trial_transport = Arc::clone(&transport);
    let trial = tokio::spawn(async move { trial_transport.send(msg("trial")).await });
    while transport.pending_count() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(transport.core().breaker().state(), CircuitState::HalfOpen);

    let posts_before = channel.posts();
    let err = transport.send(msg("second")).await.unwrap_err();
    match err {
        TransportError::CircuitOpen { retry_after, .. } => assert_eq!(retry_after, Duration::ZERO),
        other => panic!("expected circuit-open, got {other:?}"),
    }
    assert_eq!(channel.posts(), posts_before);

    let trial_err = trial.await.unwrap().unwrap_err();
    assert!(trial_err.is_timeout(), "got {trial_err:?}");

    let reopened = transport.core().breaker().snapshot();
    assert_eq!(reopened.state, CircuitState::Open);
    assert!(reopened.next_attempt > first_open.next_attempt);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_success_closes_and_resets_count() {
    let channel = ScriptedChannel::new(Reply::Status(502));
    let transport = connected_http(Arc::clone(&channel), false).await;
    let breaker_config = transport.core().breaker().config().clone();

    for i in 0..breaker_config.failure_threshold {
        let _ = transport.send(msg(&format!("f{i}"))).await;
    }
    assert_eq!(transport.core().breaker().state(), CircuitState::Open);

    tokio::time::advance(breaker_config.reset_timeout).await;
    channel.set_reply(Reply::Echo);

    let response = transport.send(msg("trial")).await.unwrap();
    assert!(response.success);
    assert_eq!(transport.core().breaker().state(), CircuitState::Closed);
    assert_eq!(transport.core().breaker().failure_count(), 0);
}

// =============================================================================
// Pending Requests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_removes_pending_and_ignores_late_response() {
    let (channel, server_events) = ScriptedChannel::with_events(Reply::Accept);
    let transport = connected_http(Arc::clone(&channel), true).await;
    let mut events = transport.events().subscribe_all();

    let err = transport.send(msg("late-1")).await.unwrap_err();
    match err {
        TransportError::Timeout { id, after } => {
            assert_eq!(id, "late-1");
            assert_eq!(after, transport.core().request_timeout());
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(transport.pending_count(), 0);
    assert_eq!(transport.core().metrics().errors, 1);

    server_events
        .send(Ok(r#"{"id":"late-1","success":true,"payload":"too late"}"#.to_string()))
        .unwrap();
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    assert_eq!(transport.pending_count(), 0);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, TransportEvent::MessageReceived { .. }),
            "late response leaked as {event:?}"
        );
    }

    // The same id is usable again and answered normally
    channel.set_reply(Reply::Echo);
    let response = transport.send(msg("late-1")).await.unwrap();
    assert_eq!(response.id, "late-1");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_rejects_every_pending_request() {
    let channel = ScriptedChannel::new(Reply::Accept);
    let transport = connected_http(Arc::clone(&channel), false).await;

    let mut waiting = Vec::new();
    for i in 0..4 {
        let sender = Arc::clone(&transport);
        waiting.push(tokio::spawn(async move { sender.send(msg(&format!("p{i}"))).await }));
    }
    while transport.pending_count() < 4 {
        tokio::task::yield_now().await;
    }

    transport.disconnect().await.unwrap();

    for handle in waiting {
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, TransportError::Disconnected);
        assert!(!err.is_timeout());
    }
    assert_eq!(transport.pending_count(), 0);
    assert_eq!(transport.core().breaker().failure_count(), 0);
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_in_flight_id_rejected() {
    let channel = ScriptedChannel::new(Reply::Accept);
    let transport = connected_http(Arc::clone(&channel), false).await;

    let sender = Arc::clone(&transport);
    let first = tokio::spawn(async move { sender.send(msg("dup")).await });
    while transport.pending_count() == 0 {
        tokio::task::yield_now().await;
    }

    let err = transport.send(msg("dup")).await.unwrap_err();
    assert_eq!(err, TransportError::DuplicateRequest("dup".to_string()));

    transport.disconnect().await.unwrap();
    assert_eq!(first.await.unwrap().unwrap_err(), TransportError::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_send_frees_its_id() {
    let channel = ScriptedChannel::new(Reply::Accept);
    let transport = connected_http(Arc::clone(&channel), false).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(10), transport.send(msg("gone-1"))).await;
    assert!(abandoned.is_err(), "send should still be waiting");
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.pending_count(), 0);

    channel.set_reply(Reply::Echo);
    let response = transport.send(msg("gone-1")).await.unwrap();
    assert_eq!(response.id, "gone-1");
    assert_eq!(channel.posted_ids(), vec!["gone-1".to_string(), "gone-1".to_string()]);
}
