//! Per-queue worker loop and job lifecycle transitions.
//!
//! One cooperative loop per queue: promote due delayed jobs, reap orphaned
//! active entries, then pop the lowest-score pending job and dispatch it
//! without blocking the loop. Completion and failure settle through the
//! broker so every transition is an atomic store batch.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use super::engine::{Broker, BrokerError, JobProcessor};
use super::job::{Job, JobState};
use super::queue::BrokerQueue;
use crate::store::BatchCommand;
use crate::time::now_ms;

/// Idle wait when the pending collection is empty.
const IDLE_WAIT: Duration = Duration::from_millis(50);
/// Wait when the in-flight set is at concurrency capacity.
const CAPACITY_WAIT: Duration = Duration::from_millis(25);
/// Max delayed jobs promoted per iteration.
const PROMOTE_BATCH: usize = 64;
/// Margin past the active deadline before an entry is treated as
/// orphaned. A locally dispatched job settles within milliseconds of its
/// timeout; only a job from a dead process stays expired this long.
const REAP_GRACE_MS: u64 = 5_000;

impl Broker {
    /// Register the single worker loop for a queue and start it. Calling
    /// this twice for the same queue name is a caller error.
    pub fn process_queue(
        self: &Arc<Self>,
        name: &str,
        processor: JobProcessor,
    ) -> Result<(), BrokerError> {
        let queue = self
            .queue(name)
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))?;

        if queue.worker_registered.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::WorkerAlreadyRegistered(name.to_string()));
        }
        queue.worker_active.store(true, Ordering::SeqCst);

        let broker = Arc::clone(self);
        let worker_queue = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            broker.run_worker(worker_queue, processor).await;
        });
        self.workers.lock().insert(name.to_string(), handle);
        info!(queue = %name, concurrency = queue.config.concurrency, "worker registered");
        Ok(())
    }

    async fn run_worker(self: Arc<Self>, queue: Arc<BrokerQueue>, processor: JobProcessor) {
        info!(queue = %queue.name, "worker loop started");

        while queue.worker_active.load(Ordering::Relaxed) {
            self.promote_due_jobs(&queue).await;
            self.reap_expired_active(&queue).await;

            if queue.in_flight.lock().len() >= queue.config.concurrency {
                sleep(CAPACITY_WAIT).await;
                continue;
            }

            let Some((job_id, _score)) = self.store.zpop_min(&queue.keys.pending).await else {
                sleep(IDLE_WAIT).await;
                continue;
            };

            let Some(mut job) = self.load_job(&queue, &job_id).await else {
                // Record vanished (purge raced the pop); nothing to run
                warn!(queue = %queue.name, job_id = %job_id, "pending id without a job record");
                continue;
            };

            job.status = JobState::Active;
            job.attempts += 1;
            let deadline = now_ms() + job.timeout_ms;
            let Ok(raw) = serde_json::to_string(&job) else {
                continue;
            };
            self.store
                .exec(vec![
                    BatchCommand::Zadd {
                        key: queue.keys.active.clone(),
                        score: deadline as f64,
                        member: job.id.clone(),
                    },
                    BatchCommand::Hset {
                        key: queue.keys.jobs.clone(),
                        field: job.id.clone(),
                        value: raw,
                    },
                ])
                .await;

            self.dispatch(&queue, job, &processor);
        }

        info!(queue = %queue.name, "worker loop stopped");
    }

    /// Fire-and-forget dispatch: the loop keeps polling while the
    /// processor races its per-job deadline.
    fn dispatch(self: &Arc<Self>, queue: &Arc<BrokerQueue>, job: Job, processor: &JobProcessor) {
        queue.in_flight.lock().insert(job.id.clone());

        let broker = Arc::clone(self);
        let queue = Arc::clone(queue);
        let processor = Arc::clone(processor);
        tokio::spawn(async move {
            let job_id = job.id.clone();
            let deadline = Duration::from_millis(job.timeout_ms);

            match tokio::time::timeout(deadline, processor(job.clone())).await {
                Ok(Ok(result)) => broker.complete_job(&queue, &job, result).await,
                Ok(Err(error)) => broker.fail_job(&queue, job, error).await,
                Err(_) => {
                    let error = format!("timed out after {} ms", deadline.as_millis());
                    broker.fail_job(&queue, job, error).await;
                }
            }

            queue.in_flight.lock().remove(&job_id);
        });
    }

    /// Move delayed jobs whose run time has arrived into pending,
    /// preserving their priority score.
    pub(crate) async fn promote_due_jobs(&self, queue: &BrokerQueue) -> usize {
        let now = now_ms();
        let due = self
            .store
            .zrange_by_score(
                &queue.keys.delayed,
                f64::NEG_INFINITY,
                now as f64,
                Some(PROMOTE_BATCH),
            )
            .await;

        let mut promoted = 0;
        for job_id in due {
            let Some(mut job) = self.load_job(queue, &job_id).await else {
                self.store.zrem(&queue.keys.delayed, &job_id).await;
                continue;
            };
            job.status = JobState::Pending;
            let Ok(raw) = serde_json::to_string(&job) else {
                continue;
            };
            self.store
                .exec(vec![
                    BatchCommand::Zrem {
                        key: queue.keys.delayed.clone(),
                        member: job_id.clone(),
                    },
                    BatchCommand::Zadd {
                        key: queue.keys.pending.clone(),
                        score: job.score(),
                        member: job_id.clone(),
                    },
                    BatchCommand::Hset {
                        key: queue.keys.jobs.clone(),
                        field: job_id.clone(),
                        value: raw,
                    },
                ])
                .await;
            promoted += 1;
        }
        if promoted > 0 {
            debug!(queue = %queue.name, promoted, "delayed jobs promoted");
        }
        promoted
    }

    /// Requeue active entries whose deadline passed more than the grace
    /// margin ago and whose job is not in this worker's in-flight set.
    /// Such entries are orphans (a previous process died mid-job);
    /// locally in-flight jobs settle through their own timeout race.
    pub(crate) async fn reap_expired_active(&self, queue: &BrokerQueue) {
        let now = now_ms();
        let cutoff = now.saturating_sub(REAP_GRACE_MS);
        let expired = self
            .store
            .zrange_by_score(&queue.keys.active, f64::NEG_INFINITY, cutoff as f64, None)
            .await;

        for job_id in expired {
            if queue.in_flight.lock().contains(&job_id) {
                continue;
            }
            match self.load_job(queue, &job_id).await {
                // A record that is no longer Active already settled; only
                // its stale active entry is left to drop.
                Some(job) if job.status == JobState::Active => {
                    warn!(queue = %queue.name, job_id = %job_id, "reaping orphaned active job");
                    self.fail_job(queue, job, "active deadline exceeded".to_string())
                        .await;
                }
                _ => {
                    self.store.zrem(&queue.keys.active, &job_id).await;
                }
            }
        }
    }

    pub(crate) async fn load_job(&self, queue: &BrokerQueue, job_id: &str) -> Option<Job> {
        let raw = self.store.hget(&queue.keys.jobs, job_id).await?;
        match serde_json::from_str(&raw) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(queue = %queue.name, job_id = %job_id, error = %e, "malformed job record");
                None
            }
        }
    }

    pub(crate) async fn complete_job(
        &self,
        queue: &BrokerQueue,
        job: &Job,
        result: Option<serde_json::Value>,
    ) {
        self.store
            .exec(vec![
                BatchCommand::Zrem {
                    key: queue.keys.active.clone(),
                    member: job.id.clone(),
                },
                BatchCommand::Hdel {
                    key: queue.keys.jobs.clone(),
                    field: job.id.clone(),
                },
            ])
            .await;
        queue.processed_total.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %queue.name, job_id = %job.id, attempts = job.attempts, "job completed");
        self.publish_queue_event(queue, "completed", &job.id, result);
    }

    /// Failure path shared by processor errors, timeouts, and the reaper:
    /// retry with capped exponential backoff, or dead-letter at the
    /// attempt ceiling.
    pub(crate) async fn fail_job(&self, queue: &BrokerQueue, mut job: Job, error: String) {
        job.last_error = Some(error.clone());

        if job.attempts_exhausted() {
            job.status = JobState::Failed;
            let Ok(raw) = serde_json::to_string(&job) else {
                return;
            };
            self.store
                .exec(vec![
                    BatchCommand::Zrem {
                        key: queue.keys.active.clone(),
                        member: job.id.clone(),
                    },
                    BatchCommand::Hdel {
                        key: queue.keys.jobs.clone(),
                        field: job.id.clone(),
                    },
                    BatchCommand::Rpush {
                        key: queue.keys.failed.clone(),
                        value: raw,
                    },
                    BatchCommand::Ltrim {
                        key: queue.keys.failed.clone(),
                        start: -(queue.config.failed_limit as i64),
                        stop: -1,
                    },
                ])
                .await;
            queue.failed_total.fetch_add(1, Ordering::Relaxed);
            warn!(
                queue = %queue.name,
                job_id = %job.id,
                attempts = job.attempts,
                error = %error,
                "job dead-lettered"
            );
            self.publish_queue_event(queue, "failed", &job.id, Some(serde_json::json!(error)));
            return;
        }

        job.status = JobState::Retrying;
        job.run_at = now_ms() + job.next_backoff();
        let Ok(raw) = serde_json::to_string(&job) else {
            return;
        };
        self.store
            .exec(vec![
                BatchCommand::Zrem {
                    key: queue.keys.active.clone(),
                    member: job.id.clone(),
                },
                BatchCommand::Zadd {
                    key: queue.keys.delayed.clone(),
                    score: job.run_at as f64,
                    member: job.id.clone(),
                },
                BatchCommand::Hset {
                    key: queue.keys.jobs.clone(),
                    field: job.id.clone(),
                    value: raw,
                },
            ])
            .await;
        debug!(
            queue = %queue.name,
            job_id = %job.id,
            attempts = job.attempts,
            retry_in_ms = job.run_at.saturating_sub(now_ms()),
            "job scheduled for retry"
        );
    }
}
