//! Core broker operations: queues, admission, ordering, stats.

use super::*;
use crate::broker::{BrokerError, JobOptions, QueueConfig};
use serde_json::json;

#[tokio::test]
async fn test_add_and_process_job() {
    let broker = setup();
    broker.create_queue("emails", QueueConfig::default()).unwrap();

    let job_id = broker
        .add_job("emails", json!({"to": "ada@example.com"}), JobOptions::default())
        .await
        .unwrap();
    assert!(!job_id.is_empty());

    let (processor, mut rx) = recording_processor();
    broker.process_queue("emails", processor).unwrap();

    let payload = recv_within(&mut rx, Duration::from_secs(2)).await;
    assert_eq!(payload, json!({"to": "ada@example.com"}));

    assert!(
        wait_for_stats(&broker, "emails", Duration::from_secs(2), |s| {
            s.processed_total == 1 && s.active == 0
        })
        .await
    );
    let stats = broker.queue_stats("emails").await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.delayed, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_equal_priority_jobs_process_in_enqueue_order() {
    let broker = setup();
    broker.create_queue("fifo", QueueConfig::default()).unwrap();

    for i in 0..5 {
        broker
            .add_job("fifo", json!(i), JobOptions::default())
            .await
            .unwrap();
    }

    let (processor, mut rx) = recording_processor();
    broker.process_queue("fifo", processor).unwrap();

    for expected in 0..5 {
        let payload = recv_within(&mut rx, Duration::from_secs(2)).await;
        assert_eq!(payload, json!(expected));
    }
}

#[tokio::test]
async fn test_higher_priority_dispatches_first() {
    let broker = setup();
    broker.create_queue("prio", QueueConfig::default()).unwrap();

    broker
        .add_job("prio", json!("low"), JobOptions::default())
        .await
        .unwrap();
    broker
        .add_job(
            "prio",
            json!("high"),
            JobOptions {
                priority: 5,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (processor, mut rx) = recording_processor();
    broker.process_queue("prio", processor).unwrap();

    assert_eq!(recv_within(&mut rx, Duration::from_secs(2)).await, json!("high"));
    assert_eq!(recv_within(&mut rx, Duration::from_secs(2)).await, json!("low"));
}

#[tokio::test]
async fn test_delayed_job_invisible_until_due() {
    let broker = setup();
    broker.create_queue("later", QueueConfig::default()).unwrap();

    broker
        .add_job(
            "later",
            json!("deferred"),
            JobOptions {
                delay_ms: 400,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stats = broker.queue_stats("later").await.unwrap();
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.pending, 0);

    let (processor, mut rx) = recording_processor();
    broker.process_queue("later", processor).unwrap();

    // Not visible before the delay elapses
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    // Visible at/after the delay
    let payload = recv_within(&mut rx, Duration::from_secs(2)).await;
    assert_eq!(payload, json!("deferred"));
}

#[tokio::test]
async fn test_double_worker_registration_rejected() {
    let broker = setup();
    broker.create_queue("once", QueueConfig::default()).unwrap();

    let (first, _rx) = recording_processor();
    broker.process_queue("once", first).unwrap();

    let (second, _rx2) = recording_processor();
    let err = broker.process_queue("once", second).unwrap_err();
    assert!(matches!(err, BrokerError::WorkerAlreadyRegistered(_)));
}

#[tokio::test]
async fn test_unknown_queue_rejected() {
    let broker = setup();
    let err = broker
        .add_job("nope", json!({}), JobOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::UnknownQueue(_)));

    let (processor, _rx) = recording_processor();
    assert!(matches!(
        broker.process_queue("nope", processor).unwrap_err(),
        BrokerError::UnknownQueue(_)
    ));
}

#[tokio::test]
async fn test_invalid_queue_name_rejected() {
    let broker = setup();
    assert!(matches!(
        broker.create_queue("", QueueConfig::default()).unwrap_err(),
        BrokerError::InvalidQueueName(_)
    ));
    assert!(matches!(
        broker
            .create_queue("bad name!", QueueConfig::default())
            .unwrap_err(),
        BrokerError::InvalidQueueName(_)
    ));
}

#[tokio::test]
async fn test_create_queue_idempotent_for_existing_name() {
    let broker = setup();
    let first = broker.create_queue("dup", QueueConfig::default()).unwrap();
    let second = broker
        .create_queue(
            "dup",
            QueueConfig {
                max_attempts: 9,
                ..Default::default()
            },
        )
        .unwrap();
    // First registration's handle and config win
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config.max_attempts, 3);
}

#[tokio::test]
async fn test_purge_queue_drops_all_collections() {
    let broker = setup();
    broker.create_queue("purge", QueueConfig::default()).unwrap();

    broker
        .add_job("purge", json!(1), JobOptions::default())
        .await
        .unwrap();
    broker
        .add_job(
            "purge",
            json!(2),
            JobOptions {
                delay_ms: 60_000,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(broker.purge_queue("purge").await);
    let stats = broker.queue_stats("purge").await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.delayed, 0);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.failed, 0);

    assert!(!broker.purge_queue("absent").await);
}

#[tokio::test]
async fn test_queue_stats_counts_collections() {
    let broker = setup();
    broker.create_queue("stats", QueueConfig::default()).unwrap();

    broker
        .add_job("stats", json!(1), JobOptions::default())
        .await
        .unwrap();
    broker
        .add_job("stats", json!(2), JobOptions::default())
        .await
        .unwrap();
    broker
        .add_job(
            "stats",
            json!(3),
            JobOptions {
                delay_ms: 60_000,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stats = broker.queue_stats("stats").await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.processed_total, 0);

    assert!(broker.queue_stats("absent").await.is_none());
}
