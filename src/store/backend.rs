//! Backend abstraction for the dual-mode store.
//!
//! One operation set, implemented twice: once against the remote
//! Redis-compatible service, once against the in-process emulation. The
//! facade in `store::mod` binds to exactly one backend at a time.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

/// Store error type.
#[derive(Debug)]
pub enum StoreError {
    /// No backend bound (supervisor not initialized or shut down)
    Unavailable,
    /// Network or protocol failure talking to the remote store
    Io(String),
    /// Operation applied to a value of a different kind
    WrongType {
        expected: &'static str,
        actual: &'static str,
    },
    /// Value exists but is not usable for the operation (e.g., INCR on a
    /// non-integer scalar)
    NotAnInteger,
    /// Malformed response from the backend
    Malformed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable => write!(f, "store unavailable"),
            StoreError::Io(e) => write!(f, "store I/O error: {}", e),
            StoreError::WrongType { expected, actual } => {
                write!(f, "wrong value kind: expected {}, found {}", expected, actual)
            }
            StoreError::NotAnInteger => write!(f, "value is not an integer"),
            StoreError::Malformed(e) => write!(f, "malformed response: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// One operation inside an atomic batch. Operations apply in submission
/// order; each reports its own outcome in the matching `BatchReply` slot.
#[derive(Debug, Clone)]
pub enum BatchCommand {
    Set { key: String, value: String },
    SetEx { key: String, value: String, ttl_secs: u64 },
    Get { key: String },
    Del { key: String },
    IncrBy { key: String, delta: i64 },
    Expire { key: String, ttl_secs: u64 },
    Hset { key: String, field: String, value: String },
    Hdel { key: String, field: String },
    Sadd { key: String, member: String },
    Srem { key: String, member: String },
    Lpush { key: String, value: String },
    Rpush { key: String, value: String },
    Ltrim { key: String, start: i64, stop: i64 },
    Zadd { key: String, score: f64, member: String },
    Zrem { key: String, member: String },
}

/// Per-sub-operation outcome of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchReply {
    Ok,
    Nil,
    Value(String),
    Int(i64),
    Error(String),
}

/// Common backend interface for remote and fallback modes.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Backend name for logging and the health surface.
    fn name(&self) -> &'static str;

    /// Liveness round-trip.
    async fn ping(&self) -> Result<(), StoreError>;

    // ============== Strings / scalars ==============

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining TTL in seconds: -2 when absent, -1 without expiry.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;
    async fn persist(&self, key: &str) -> Result<bool, StoreError>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    // ============== Hashes ==============

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    // ============== Sets ==============

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    // ============== Lists ==============

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError>;
    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError>;
    async fn llen(&self, key: &str) -> Result<u64, StoreError>;

    // ============== Sorted sets ==============

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError>;
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError>;
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<u64, StoreError>;

    /// Atomically pop the member with the lowest score (ties break
    /// lexicographically by member).
    async fn zpop_min(&self, key: &str) -> Result<Option<(String, f64)>, StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError>;
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    // ============== Key space ==============

    /// Pattern scan. Patterns are limited to a single trailing `*`,
    /// translated to an anchored prefix match; without it, exact match.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Atomic multi-command batch, applied in submission order.
    async fn exec(&self, batch: Vec<BatchCommand>) -> Result<Vec<BatchReply>, StoreError>;

    async fn flush_all(&self) -> Result<(), StoreError>;

    /// Number of live keys (emulation item count / remote DBSIZE).
    async fn item_count(&self) -> Result<usize, StoreError>;
}
