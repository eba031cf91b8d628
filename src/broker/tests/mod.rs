//! Broker tests, run against the fallback emulation.

mod core;
mod pubsub;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::{sleep, timeout, Duration};

use crate::broker::{Broker, JobProcessor, QueueStats};
use crate::store::{MemoryStore, Store};

/// Broker over a memory-bound store.
fn setup() -> Arc<Broker> {
    let store = Store::new();
    store.bind(Arc::new(MemoryStore::new()));
    Broker::new(Arc::new(store))
}

/// Processor that forwards each job's payload on a channel and succeeds.
fn recording_processor() -> (JobProcessor, UnboundedReceiver<Value>) {
    let (tx, rx) = unbounded_channel();
    let processor: JobProcessor = Arc::new(move |job| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send((*job.data).clone());
            Ok(None)
        })
    });
    (processor, rx)
}

/// Processor that always fails, counting its dispatches.
fn failing_processor(counter: Arc<AtomicU32>) -> JobProcessor {
    Arc::new(move |_job| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        })
    })
}

/// Processor that sleeps longer than any reasonable per-job timeout.
fn slow_processor(delay: Duration) -> JobProcessor {
    Arc::new(move |_job| {
        Box::pin(async move {
            sleep(delay).await;
            Ok(None)
        })
    })
}

/// Receive with a deadline, panicking with context on silence.
async fn recv_within(rx: &mut UnboundedReceiver<Value>, deadline: Duration) -> Value {
    timeout(deadline, rx.recv())
        .await
        .expect("no job processed before deadline")
        .expect("processor channel closed")
}

/// Poll queue stats until the predicate holds or the deadline passes.
async fn wait_for_stats<F>(broker: &Arc<Broker>, queue: &str, deadline: Duration, pred: F) -> bool
where
    F: Fn(&QueueStats) -> bool,
{
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if let Some(stats) = broker.queue_stats(queue).await {
            if pred(&stats) {
                return true;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Poll a dispatch counter until it reaches the target or the deadline
/// passes.
async fn wait_for_count(counter: &Arc<AtomicU32>, target: u32, deadline: Duration) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if counter.load(Ordering::SeqCst) >= target {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}
