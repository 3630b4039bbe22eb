//! Signal bus behaviour through the public API.

use std::sync::Arc;

use axon_core::review;
use axon_core::{
    PublishOptions, ReplayOptions, ReviewDomain, SignalBus, SignalError, TopicRegistry,
};
use serde_json::json;

fn review_bus() -> SignalBus {
    let registry = Arc::new(TopicRegistry::new());
    registry.register_domain(&ReviewDomain).unwrap();
    SignalBus::new(registry)
}

#[tokio::test]
async fn publish_delivers_coerced_payload_to_subscriber() {
    let bus = review_bus();
    let mut sub = bus.subscribe(review::REQUEST).unwrap();

    let published = bus
        .publish(
            review::REQUEST,
            json!({"files_changed": "12", "labels": ["security"]}),
            PublishOptions::from_source("test"),
        )
        .unwrap();

    let received = sub.recv().await.unwrap();
    assert_eq!(received, published);
    assert_eq!(received.wire_type, review::REQUEST);
    assert_eq!(received.source, "test");
    assert_eq!(received.data["files_changed"], json!(12));
    assert_eq!(received.data["intent"], json!("change"));
    assert_eq!(received.data["diff"], json!(""));
}

#[tokio::test]
async fn unknown_topic_is_rejected_and_history_unchanged() {
    let bus = review_bus();
    bus.publish(review::REQUEST, json!({"files_changed": 1}), PublishOptions::default())
        .unwrap();

    let err = bus
        .publish("review.unknown", json!({}), PublishOptions::default())
        .unwrap_err();
    assert!(matches!(err, SignalError::UnknownTopic { .. }));

    let missing = bus
        .publish(review::REQUEST, json!({"intent": "change"}), PublishOptions::default())
        .unwrap_err();
    assert!(matches!(missing, SignalError::Validation(_)));

    assert_eq!(bus.replay(review::REQUEST, ReplayOptions::default()).len(), 1);
    assert!(bus.replay("review.unknown", ReplayOptions::default()).is_empty());
}

#[tokio::test]
async fn each_subscriber_sees_publish_order() {
    let bus = review_bus();
    let mut first = bus.subscribe(review::REQUEST).unwrap();
    let mut second = bus.subscribe(review::REQUEST).unwrap();
    assert_eq!(bus.subscriber_count(review::REQUEST), 2);

    for n in 1..=5 {
        bus.publish(review::REQUEST, json!({"files_changed": n}), PublishOptions::default())
            .unwrap();
    }

    for sub in [&mut first, &mut second] {
        let mut seen = Vec::new();
        while let Some(signal) = sub.try_recv() {
            seen.push(signal.data["files_changed"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}

#[tokio::test]
async fn ingest_keeps_wire_identity() {
    let bus = review_bus();
    let mut sub = bus.subscribe(review::REQUEST).unwrap();

    let signal = bus
        .ingest(json!({
            "id": "evt-1",
            "type": "review.request",
            "source": "github",
            "timestamp": "2026-01-02T03:04:05Z",
            "data": {"files_changed": 3}
        }))
        .unwrap();
    assert_eq!(signal.id, "evt-1");
    assert_eq!(signal.source, "github");
    assert_eq!(signal.timestamp.to_rfc3339(), "2026-01-02T03:04:05+00:00");

    let received = sub.recv().await.unwrap();
    assert_eq!(received.id, "evt-1");

    let err = bus
        .ingest(json!({"type": "nope.unknown", "data": {}}))
        .unwrap_err();
    assert!(matches!(err, SignalError::UnknownWireType { .. }));
}

#[tokio::test]
async fn unsubscribe_is_idempotent_and_closes_mailbox() {
    let bus = review_bus();
    let mut sub = bus.subscribe(review::SUMMARY).unwrap();

    assert!(bus.is_subscribed(sub.id));
    assert!(bus.unsubscribe(sub.id));
    assert!(!bus.unsubscribe(sub.id));
    assert!(!bus.is_subscribed(sub.id));
    assert_eq!(bus.subscriber_count(review::SUMMARY), 0);

    // The bus dropped its sender, so the mailbox drains to `None`.
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn replay_returns_published_payload_unchanged() {
    let bus = review_bus();
    let input = json!({
        "request_id": "pr-7",
        "files_changed": 7,
        "intent": "refactor",
        "labels": ["architecture"],
        "diff": "+fn main() {}"
    });

    let published = bus
        .publish(review::REQUEST, input.clone(), PublishOptions::from_source("test"))
        .unwrap();

    let replay = bus.replay(review::REQUEST, ReplayOptions::default());
    let last = replay.last().unwrap();
    assert_eq!(last, &published);
    assert_eq!(&last.data, input.as_object().unwrap());
    assert_eq!(&published.data, input.as_object().unwrap());
}
