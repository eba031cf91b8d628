//! Core broker: queue registry, job admission, stats, dead-letter
//! management, and the pub/sub surface.
//!
//! The broker owns no job data in process. Every collection lives in the
//! store (pending/delayed/active as sorted sets of ids, failed as a
//! bounded list, plus one hash of job records per queue), so ordering and
//! atomicity come from the store's own primitives. The design assumes a
//! single broker process writes a given queue's state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::job::{Job, JobOptions, JobState};
use super::pubsub::{Envelope, PubSub};
use super::queue::{validate_queue_name, BrokerQueue, QueueConfig, QueueKeys, QueueStats};
use crate::store::{BatchCommand, Store};

/// Boxed processor future; the result payload is attached to the
/// completion event.
pub type ProcessorFuture = Pin<Box<dyn Future<Output = Result<Option<Value>, String>> + Send>>;

/// Job processor supplied to `process_queue`.
pub type JobProcessor = Arc<dyn Fn(Job) -> ProcessorFuture + Send + Sync>;

/// Broker configuration/usage errors. Rejected synchronously at the call
/// site; nothing here is fatal to the owning process.
#[derive(Debug)]
pub enum BrokerError {
    InvalidQueueName(String),
    UnknownQueue(String),
    WorkerAlreadyRegistered(String),
    Payload(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::InvalidQueueName(name) => write!(f, "invalid queue name: {:?}", name),
            BrokerError::UnknownQueue(name) => write!(f, "unknown queue: {}", name),
            BrokerError::WorkerAlreadyRegistered(name) => {
                write!(f, "a worker is already registered for queue {}", name)
            }
            BrokerError::Payload(e) => write!(f, "payload serialization failed: {}", e),
        }
    }
}

impl std::error::Error for BrokerError {}

pub struct Broker {
    pub(crate) store: Arc<Store>,
    pub(crate) queues: RwLock<HashMap<String, Arc<BrokerQueue>>>,
    pub(crate) pubsub: PubSub,
    pub(crate) workers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Broker {
    pub fn new(store: Arc<Store>) -> Arc<Self> {
        Arc::new(Self {
            store,
            queues: RwLock::new(HashMap::new()),
            pubsub: PubSub::new(),
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Register a named queue. Idempotent for an existing name: the handle
    /// from the first registration is returned and its config wins.
    pub fn create_queue(
        &self,
        name: &str,
        config: QueueConfig,
    ) -> Result<Arc<BrokerQueue>, BrokerError> {
        validate_queue_name(name)?;
        let mut queues = self.queues.write();
        if let Some(existing) = queues.get(name) {
            return Ok(Arc::clone(existing));
        }
        let queue = Arc::new(BrokerQueue::new(name, config));
        queues.insert(name.to_string(), Arc::clone(&queue));
        info!(queue = %name, "queue created");
        Ok(queue)
    }

    pub fn queue(&self, name: &str) -> Option<Arc<BrokerQueue>> {
        self.queues.read().get(name).cloned()
    }

    /// Enqueue a job. With a delay it lands in the delayed collection keyed
    /// by its run time; otherwise straight into pending at its priority
    /// score. Returns the job id.
    pub async fn add_job(
        &self,
        queue_name: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<String, BrokerError> {
        let queue = self
            .queue(queue_name)
            .ok_or_else(|| BrokerError::UnknownQueue(queue_name.to_string()))?;

        let job = Job::new(
            queue_name,
            payload,
            &options,
            queue.config.max_attempts,
            queue.config.timeout_ms,
        );
        let raw = serde_json::to_string(&job).map_err(|e| BrokerError::Payload(e.to_string()))?;

        let (collection, score) = if job.status == JobState::Delayed {
            (queue.keys.delayed.clone(), job.run_at as f64)
        } else {
            (queue.keys.pending.clone(), job.score())
        };

        self.store
            .exec(vec![
                BatchCommand::Hset {
                    key: queue.keys.jobs.clone(),
                    field: job.id.clone(),
                    value: raw,
                },
                BatchCommand::Zadd {
                    key: collection,
                    score,
                    member: job.id.clone(),
                },
            ])
            .await;

        self.publish_queue_event(&queue, "added", &job.id, None);
        Ok(job.id)
    }

    pub async fn queue_stats(&self, name: &str) -> Option<QueueStats> {
        let queue = self.queue(name)?;
        Some(QueueStats {
            pending: self.store.zcard(&queue.keys.pending).await,
            delayed: self.store.zcard(&queue.keys.delayed).await,
            active: self.store.zcard(&queue.keys.active).await,
            failed: self.store.llen(&queue.keys.failed).await,
            processed_total: queue.processed_total.load(Ordering::Relaxed),
            failed_total: queue.failed_total.load(Ordering::Relaxed),
        })
    }

    /// Re-enqueue up to `count` dead-lettered jobs, oldest first, with a
    /// fresh attempt budget. Returns how many were moved.
    pub async fn retry_failed_jobs(&self, name: &str, count: usize) -> u64 {
        let Some(queue) = self.queue(name) else {
            return 0;
        };
        if count == 0 {
            return 0;
        }

        let raws = self
            .store
            .lrange(&queue.keys.failed, 0, count as i64 - 1)
            .await;
        if raws.is_empty() {
            return 0;
        }

        let mut moved = 0;
        for raw in &raws {
            let mut job: Job = match serde_json::from_str(raw) {
                Ok(job) => job,
                Err(e) => {
                    warn!(queue = %name, error = %e, "skipping malformed dead-letter record");
                    continue;
                }
            };
            job.attempts = 0;
            job.status = JobState::Pending;
            job.last_error = None;
            let Ok(updated) = serde_json::to_string(&job) else {
                continue;
            };
            self.store
                .exec(vec![
                    BatchCommand::Hset {
                        key: queue.keys.jobs.clone(),
                        field: job.id.clone(),
                        value: updated,
                    },
                    BatchCommand::Zadd {
                        key: queue.keys.pending.clone(),
                        score: job.score(),
                        member: job.id.clone(),
                    },
                ])
                .await;
            moved += 1;
        }

        // Drop the consumed head of the failed list
        self.store
            .ltrim(&queue.keys.failed, raws.len() as i64, -1)
            .await;
        info!(queue = %name, moved, "dead-lettered jobs re-enqueued");
        moved
    }

    /// Drop every collection of a queue, including its job records.
    pub async fn purge_queue(&self, name: &str) -> bool {
        let Some(queue) = self.queue(name) else {
            return false;
        };
        self.store
            .exec(vec![
                BatchCommand::Del {
                    key: queue.keys.pending.clone(),
                },
                BatchCommand::Del {
                    key: queue.keys.delayed.clone(),
                },
                BatchCommand::Del {
                    key: queue.keys.active.clone(),
                },
                BatchCommand::Del {
                    key: queue.keys.failed.clone(),
                },
                BatchCommand::Del {
                    key: queue.keys.jobs.clone(),
                },
            ])
            .await;
        info!(queue = %name, "queue purged");
        true
    }

    /// Cooperatively stop a queue's worker loop after its current
    /// iteration. In-flight jobs are not cancelled. The worker slot stays
    /// registered.
    pub fn pause_queue(&self, name: &str) -> bool {
        let Some(queue) = self.queue(name) else {
            return false;
        };
        let was_active = queue.worker_active.swap(false, Ordering::SeqCst);
        if was_active {
            info!(queue = %name, "queue paused");
        }
        was_active
    }

    // ============== Pub/Sub ==============

    /// Publish on an application channel. Returns the message id.
    pub fn publish(&self, channel: &str, payload: Value, metadata: Value) -> String {
        let (id, _) = self.pubsub.publish(channel, payload, metadata);
        id
    }

    pub fn subscribe(&self, channel: &str) -> UnboundedReceiver<Envelope> {
        self.pubsub.subscribe(channel)
    }

    pub fn unsubscribe(&self, channel: &str) -> usize {
        self.pubsub.unsubscribe(channel)
    }

    pub(crate) fn publish_queue_event(
        &self,
        queue: &BrokerQueue,
        event: &str,
        job_id: &str,
        detail: Option<Value>,
    ) {
        self.pubsub.publish(
            &QueueKeys::events_channel(&queue.name),
            json!({
                "event": event,
                "queue": queue.name,
                "job_id": job_id,
            }),
            detail.unwrap_or(Value::Null),
        );
    }

    /// Halt every worker loop and drop all subscriptions. In-flight jobs
    /// run to completion on the runtime.
    pub async fn shutdown(&self) {
        for queue in self.queues.read().values() {
            queue.worker_active.store(false, Ordering::SeqCst);
        }
        for (_, handle) in self.workers.lock().drain() {
            handle.abort();
        }
        self.pubsub.clear();
        info!("broker shut down");
    }
}
