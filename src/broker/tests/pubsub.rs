//! Pub/sub fan-out: at-most-once, non-durable delivery.

use super::*;
use crate::broker::{JobOptions, QueueConfig};
use serde_json::json;

#[tokio::test]
async fn test_publish_before_subscribe_is_never_delivered() {
    let broker = setup();

    let id = broker.publish("news", json!("early"), json!(null));
    assert!(!id.is_empty());

    let mut rx = broker.subscribe("news");
    broker.publish("news", json!("late"), json!(null));

    let msg = timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload, json!("late"));
    // Nothing retroactive behind it
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_envelope_carries_id_timestamp_and_metadata() {
    let broker = setup();
    let mut rx = broker.subscribe("audit");

    let id = broker.publish("audit", json!({"action": "login"}), json!({"source": "api"}));

    let msg = timeout(Duration::from_millis(500), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.id, id);
    assert_eq!(msg.channel, "audit");
    assert!(msg.published_at > 0);
    assert_eq!(msg.payload, json!({"action": "login"}));
    assert_eq!(msg.metadata, json!({"source": "api"}));
}

#[tokio::test]
async fn test_fanout_reaches_every_subscriber() {
    let broker = setup();
    let mut rx1 = broker.subscribe("wide");
    let mut rx2 = broker.subscribe("wide");

    broker.publish("wide", json!(42), json!(null));

    for rx in [&mut rx1, &mut rx2] {
        let msg = timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, json!(42));
    }
}

#[tokio::test]
async fn test_unsubscribe_drops_channel_subscribers() {
    let broker = setup();
    let mut rx = broker.subscribe("gone");
    assert_eq!(broker.unsubscribe("gone"), 1);

    broker.publish("gone", json!("void"), json!(null));
    // Sender side was dropped: the channel closes with nothing delivered
    assert!(timeout(Duration::from_millis(300), rx.recv())
        .await
        .unwrap()
        .is_none());

    assert_eq!(broker.unsubscribe("gone"), 0);
}

#[tokio::test]
async fn test_queue_lifecycle_events_on_add_and_complete() {
    let broker = setup();
    broker.create_queue("evq", QueueConfig::default()).unwrap();
    let mut rx = broker.subscribe("queue:evq:events");

    let job_id = broker
        .add_job("evq", json!({}), JobOptions::default())
        .await
        .unwrap();

    let added = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(added.payload["event"], json!("added"));
    assert_eq!(added.payload["job_id"], json!(job_id));

    let (processor, _payloads) = recording_processor();
    broker.process_queue("evq", processor).unwrap();

    let completed = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.payload["event"], json!("completed"));
    assert_eq!(completed.payload["job_id"], json!(job_id));
}

#[tokio::test]
async fn test_queue_lifecycle_event_on_dead_letter() {
    let broker = setup();
    broker
        .create_queue(
            "evfail",
            QueueConfig {
                max_attempts: 1,
                ..Default::default()
            },
        )
        .unwrap();
    let mut rx = broker.subscribe("queue:evfail:events");

    let attempts = Arc::new(AtomicU32::new(0));
    broker
        .process_queue("evfail", failing_processor(attempts))
        .unwrap();
    broker
        .add_job("evfail", json!({}), JobOptions::default())
        .await
        .unwrap();

    let added = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(added.payload["event"], json!("added"));

    let failed = timeout(Duration::from_secs(3), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.payload["event"], json!("failed"));
    assert_eq!(failed.metadata, json!("boom"));
}
