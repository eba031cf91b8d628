//! Queue configuration, key derivation, and per-queue runtime state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64};

use parking_lot::Mutex;
use serde::Serialize;

use super::engine::BrokerError;

pub const MAX_QUEUE_NAME_LEN: usize = 128;

/// Per-queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Dispatch attempts before a job dead-letters
    pub max_attempts: u32,
    /// Per-job processing deadline in milliseconds
    pub timeout_ms: u64,
    /// Max jobs in flight at once for this queue's worker
    pub concurrency: usize,
    /// Failed-list bound; oldest entries are trimmed on append
    pub failed_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 30_000,
            concurrency: 1,
            failed_limit: 1_000,
        }
    }
}

pub fn validate_queue_name(name: &str) -> Result<(), BrokerError> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN {
        return Err(BrokerError::InvalidQueueName(name.to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(BrokerError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

/// Store keys for a queue's four collections plus its job-record hash.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    /// Sorted set: job id scored by priority score
    pub pending: String,
    /// Sorted set: job id scored by run_at
    pub delayed: String,
    /// Sorted set: job id scored by processing deadline
    pub active: String,
    /// List of dead-lettered job records, bounded
    pub failed: String,
    /// Hash: job id -> serialized job record
    pub jobs: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            pending: format!("queue:{}:pending", name),
            delayed: format!("queue:{}:delayed", name),
            active: format!("queue:{}:active", name),
            failed: format!("queue:{}:failed", name),
            jobs: format!("queue:{}:jobs", name),
        }
    }

    /// Channel the broker publishes this queue's lifecycle events on.
    pub fn events_channel(name: &str) -> String {
        format!("queue:{}:events", name)
    }
}

/// Runtime state for one named queue.
#[derive(Debug)]
pub struct BrokerQueue {
    pub name: String,
    pub config: QueueConfig,
    pub(crate) keys: QueueKeys,
    pub(crate) processed_total: AtomicU64,
    pub(crate) failed_total: AtomicU64,
    /// One worker per queue for the broker's lifetime
    pub(crate) worker_registered: AtomicBool,
    /// Cooperative stop flag for the worker loop
    pub(crate) worker_active: AtomicBool,
    /// Ids currently dispatched to the processor (len <= concurrency)
    pub(crate) in_flight: Mutex<HashSet<String>>,
}

impl BrokerQueue {
    pub fn new(name: &str, config: QueueConfig) -> Self {
        Self {
            keys: QueueKeys::new(name),
            name: name.to_string(),
            config,
            processed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            worker_registered: AtomicBool::new(false),
            worker_active: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        }
    }
}

/// Counts for the stats surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub delayed: u64,
    pub active: u64,
    pub failed: u64,
    pub processed_total: u64,
    pub failed_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_validation() {
        assert!(validate_queue_name("emails").is_ok());
        assert!(validate_queue_name("media.transcode-v2").is_ok());
        assert!(validate_queue_name("").is_err());
        assert!(validate_queue_name("has space").is_err());
        assert!(validate_queue_name("колода").is_err());
        assert!(validate_queue_name(&"x".repeat(MAX_QUEUE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_key_derivation() {
        let keys = QueueKeys::new("emails");
        assert_eq!(keys.pending, "queue:emails:pending");
        assert_eq!(keys.delayed, "queue:emails:delayed");
        assert_eq!(keys.active, "queue:emails:active");
        assert_eq!(keys.failed, "queue:emails:failed");
        assert_eq!(keys.jobs, "queue:emails:jobs");
        assert_eq!(QueueKeys::events_channel("emails"), "queue:emails:events");
    }
}
