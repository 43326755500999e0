//! Selector scoring and manager id assignment through the public API

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    HealthMonitorConfig, HealthState, ManagerConfig, Message, ScoreInput, SelectionContext,
    SelectionCriteria, TransportKind, TransportManager, TransportSelector,
};

use common::{as_dyn, connected_http, Reply, ScriptedChannel};

#[test]
fn test_faster_more_reliable_transport_wins() {
    let selector = TransportSelector::new(SelectionCriteria::new(0.3, 0.3, 0.2, 0.2));
    let context = SelectionContext::default();

    let a = ScoreInput::healthy(TransportKind::Http).with_metrics(Duration::from_millis(500), 0.5);
    let b = ScoreInput::healthy(TransportKind::Http).with_metrics(Duration::from_millis(100), 0.99);

    assert!(selector.score(&b, &context) > selector.score(&a, &context));

    // Same kind on both sides, so tell them apart by position
    let ranked = selector.rank(&[a.clone(), b.clone()], &context);
    assert!(ranked[0].latency > ranked[1].latency);
    assert!((ranked[0].reliability - 0.99).abs() < f64::EPSILON);

    let a = ScoreInput { kind: TransportKind::WebSocket, ..a };
    assert_eq!(selector.select_best(&[a, b], &context), Some(TransportKind::Http));
}

#[test]
fn test_healthy_always_outranks_degraded_with_equal_weights() {
    let selector = TransportSelector::new(SelectionCriteria::default());
    let context = SelectionContext::default();

    for kind in TransportKind::ALL {
        for (latency_ms, reliability) in [(0, 1.0), (250, 0.9), (4000, 0.2)] {
            let latency = Duration::from_millis(latency_ms);
            let healthy = ScoreInput::healthy(kind).with_metrics(latency, reliability);
            let degraded = ScoreInput::healthy(kind)
                .with_metrics(latency, reliability)
                .with_health(HealthState::Degraded);

            assert!(
                selector.score(&healthy, &context) > selector.score(&degraded, &context),
                "{kind} at {latency_ms}ms/{reliability}"
            );
        }
    }
}

#[test]
fn test_realtime_context_favors_streaming_transport() {
    let selector = TransportSelector::new(SelectionCriteria::new(0.0, 0.0, 1.0, 0.0));
    let context = SelectionContext::for_message("chat").realtime();

    let ws = ScoreInput::healthy(TransportKind::WebSocket);
    let fe = ScoreInput::healthy(TransportKind::FileExchange);

    assert_eq!(
        selector.select_best(&[fe, ws], &context),
        Some(TransportKind::WebSocket)
    );
}

#[tokio::test]
async fn test_concurrent_sends_get_distinct_ids() {
    let channel = ScriptedChannel::new(Reply::Echo);
    let http = connected_http(Arc::clone(&channel), false).await;
    let config = ManagerConfig {
        enabled: vec![TransportKind::Http],
        ..ManagerConfig::default()
    };
    let manager = Arc::new(TransportManager::new(
        config,
        vec![as_dyn(&http)],
        HealthMonitorConfig::default(),
    ));

    let mut sends = Vec::new();
    for i in 0..25 {
        let manager = Arc::clone(&manager);
        sends.push(tokio::spawn(async move {
            manager
                .send(Message::new("chat", serde_json::json!({ "n": i })), None)
                .await
        }));
    }

    let mut ids = HashSet::new();
    for handle in sends {
        let response = handle.await.unwrap().unwrap();
        assert!(!response.id.is_empty());
        ids.insert(response.id);
    }
    assert_eq!(ids.len(), 25);

    let posted: HashSet<String> = channel.posted_ids().into_iter().collect();
    assert_eq!(posted, ids);
    assert_eq!(manager.active_kind(), Some(TransportKind::Http));
}
