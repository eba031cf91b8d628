//! Job type and lifecycle helpers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::now_ms;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,   // In the pending collection, ready to dispatch
    Delayed,   // Waiting for run_at
    Active,    // Dispatched to a processor
    Completed, // Processor succeeded (job record removed)
    Retrying,  // Failed, waiting out the backoff before re-entering pending
    Failed,    // Attempt ceiling reached, appended to the failed list
}

/// Options accepted at enqueue time. Absent fields fall back to the
/// queue's configuration.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Delay before the job becomes visible, in milliseconds
    pub delay_ms: u64,
    /// Higher priority dispatches sooner
    pub priority: i32,
    pub max_attempts: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    /// Payload. Arc keeps clones cheap on the dispatch path.
    pub data: Arc<Value>,
    pub priority: i32,
    pub status: JobState,
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: u64,
    pub run_at: u64,
    pub timeout_ms: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Time-ordered job id: epoch ms, a process-local sequence, and a random
/// suffix. The sequence keeps same-millisecond ids lexicographically
/// ordered, which is what makes equal-score dequeues FIFO.
fn generate_id(now: u64) -> String {
    let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
    let noise: u16 = rand::random();
    format!("{:013}-{:010}-{:04x}", now, seq, noise)
}

impl Job {
    pub fn new(
        queue: &str,
        data: Value,
        options: &JobOptions,
        default_max_attempts: u32,
        default_timeout_ms: u64,
    ) -> Self {
        let now = now_ms();
        let delayed = options.delay_ms > 0;
        Self {
            id: generate_id(now),
            queue: queue.to_string(),
            data: Arc::new(data),
            priority: options.priority,
            status: if delayed {
                JobState::Delayed
            } else {
                JobState::Pending
            },
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(default_max_attempts).max(1),
            created_at: now,
            run_at: now + options.delay_ms,
            timeout_ms: options.timeout_ms.unwrap_or(default_timeout_ms).max(1),
            last_error: None,
        }
    }

    /// Pending-collection score: higher priority sorts earlier, ties break
    /// on creation time.
    #[inline(always)]
    pub fn score(&self) -> f64 {
        self.created_at as f64 - f64::from(self.priority) * 1000.0
    }

    /// Retry backoff in ms: `min(30s, 2^attempts * 1s)`.
    #[inline(always)]
    pub fn next_backoff(&self) -> u64 {
        1_000u64
            .saturating_mul(1u64 << self.attempts.min(15))
            .min(30_000)
    }

    #[inline(always)]
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with_attempts(attempts: u32) -> Job {
        let mut job = Job::new("q", json!({}), &JobOptions::default(), 3, 30_000);
        job.attempts = attempts;
        job
    }

    #[test]
    fn test_backoff_schedule_caps_at_thirty_seconds() {
        assert_eq!(job_with_attempts(0).next_backoff(), 1_000);
        assert_eq!(job_with_attempts(1).next_backoff(), 2_000);
        assert_eq!(job_with_attempts(2).next_backoff(), 4_000);
        assert_eq!(job_with_attempts(3).next_backoff(), 8_000);
        assert_eq!(job_with_attempts(4).next_backoff(), 16_000);
        assert_eq!(job_with_attempts(5).next_backoff(), 30_000);
        assert_eq!(job_with_attempts(20).next_backoff(), 30_000);
    }

    #[test]
    fn test_score_orders_higher_priority_first() {
        let low = Job::new("q", json!({}), &JobOptions::default(), 3, 30_000);
        let high = Job::new(
            "q",
            json!({}),
            &JobOptions {
                priority: 5,
                ..Default::default()
            },
            3,
            30_000,
        );
        assert!(high.score() < low.score());
    }

    #[test]
    fn test_ids_are_monotonic_within_process() {
        let a = Job::new("q", json!({}), &JobOptions::default(), 3, 30_000);
        let b = Job::new("q", json!({}), &JobOptions::default(), 3, 30_000);
        assert!(a.id < b.id);
    }

    #[test]
    fn test_delay_sets_delayed_state_and_run_at() {
        let job = Job::new(
            "q",
            json!({}),
            &JobOptions {
                delay_ms: 5_000,
                ..Default::default()
            },
            3,
            30_000,
        );
        assert_eq!(job.status, JobState::Delayed);
        assert_eq!(job.run_at, job.created_at + 5_000);
    }
}
