//! Dual-mode store adapter.
//!
//! ## Module Organization
//!
//! - `value.rs` - Tagged `StoreValue` / `StoreEntry` types for the emulation
//! - `backend.rs` - `StoreBackend` trait, batch commands, `StoreError`
//! - `remote.rs` - Backend over the Redis-compatible service
//! - `memory.rs` - In-process emulation with identical semantics
//!
//! The `Store` facade below is what the rest of the crate talks to. It is
//! bound to exactly one backend at a time (the supervisor swaps bindings),
//! and it absorbs every operation failure: the error is logged, counted,
//! and converted to a neutral default. Callers cannot distinguish "absent"
//! from "operation failed"; that tradeoff is part of the design contract.

mod backend;
mod memory;
mod remote;
mod value;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::metrics::StoreMetrics;

pub use backend::{BatchCommand, BatchReply, StoreBackend, StoreError};
pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use value::{StoreEntry, StoreValue};

/// Shared store handle, bound to the remote backend or the fallback
/// emulation depending on supervisor state.
pub struct Store {
    backend: RwLock<Option<Arc<dyn StoreBackend>>>,
    metrics: Arc<StoreMetrics>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            backend: RwLock::new(None),
            metrics: Arc::new(StoreMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Swap the active backend. Only the supervisor calls this.
    pub(crate) fn bind(&self, backend: Arc<dyn StoreBackend>) {
        *self.backend.write() = Some(backend);
    }

    pub(crate) fn unbind(&self) {
        *self.backend.write() = None;
    }

    pub(crate) fn backend(&self) -> Option<Arc<dyn StoreBackend>> {
        self.backend.read().clone()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.read().as_ref().map(|b| b.name())
    }

    /// Absorb an operation error into a neutral default.
    fn absorb<T>(&self, op: &'static str, key: &str, err: StoreError, default: T) -> T {
        self.metrics.record_error();
        warn!(op, key, error = %err, "store operation failed");
        default
    }

    /// No backend bound: count the error, return the default silently.
    fn unavailable<T>(&self, default: T) -> T {
        self.metrics.record_error();
        default
    }

    // ============== Strings / scalars ==============

    pub async fn get(&self, key: &str) -> Option<String> {
        let Some(be) = self.backend() else {
            return self.unavailable(None);
        };
        match be.get(key).await {
            Ok(Some(v)) => {
                self.metrics.record_hit();
                Some(v)
            }
            Ok(None) => {
                self.metrics.record_miss();
                None
            }
            Err(e) => self.absorb("get", key, e, None),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.set(key, value).await {
            Ok(()) => {
                self.metrics.record_set();
                true
            }
            Err(e) => self.absorb("set", key, e, false),
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.set_ex(key, value, ttl_secs).await {
            Ok(()) => {
                self.metrics.record_set();
                true
            }
            Err(e) => self.absorb("set_ex", key, e, false),
        }
    }

    pub async fn del(&self, key: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.del(key).await {
            Ok(removed) => {
                if removed {
                    self.metrics.record_delete();
                }
                removed
            }
            Err(e) => self.absorb("del", key, e, false),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.exists(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("exists", key, e, false),
        }
    }

    pub async fn ttl(&self, key: &str) -> i64 {
        let Some(be) = self.backend() else {
            return self.unavailable(-2);
        };
        match be.ttl(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("ttl", key, e, -2),
        }
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.expire(key, ttl_secs).await {
            Ok(v) => v,
            Err(e) => self.absorb("expire", key, e, false),
        }
    }

    pub async fn persist(&self, key: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.persist(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("persist", key, e, false),
        }
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> i64 {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.incr_by(key, delta).await {
            Ok(v) => v,
            Err(e) => self.absorb("incr_by", key, e, 0),
        }
    }

    // ============== Hashes ==============

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.hset(key, field, value).await {
            Ok(v) => {
                self.metrics.record_set();
                v
            }
            Err(e) => self.absorb("hset", key, e, false),
        }
    }

    pub async fn hget(&self, key: &str, field: &str) -> Option<String> {
        let Some(be) = self.backend() else {
            return self.unavailable(None);
        };
        match be.hget(key, field).await {
            Ok(Some(v)) => {
                self.metrics.record_hit();
                Some(v)
            }
            Ok(None) => {
                self.metrics.record_miss();
                None
            }
            Err(e) => self.absorb("hget", key, e, None),
        }
    }

    pub async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        let Some(be) = self.backend() else {
            return self.unavailable(HashMap::new());
        };
        match be.hgetall(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("hgetall", key, e, HashMap::new()),
        }
    }

    pub async fn hdel(&self, key: &str, field: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.hdel(key, field).await {
            Ok(removed) => {
                if removed {
                    self.metrics.record_delete();
                }
                removed
            }
            Err(e) => self.absorb("hdel", key, e, false),
        }
    }

    // ============== Sets ==============

    pub async fn sadd(&self, key: &str, member: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.sadd(key, member).await {
            Ok(v) => v,
            Err(e) => self.absorb("sadd", key, e, false),
        }
    }

    pub async fn smembers(&self, key: &str) -> Vec<String> {
        let Some(be) = self.backend() else {
            return self.unavailable(Vec::new());
        };
        match be.smembers(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("smembers", key, e, Vec::new()),
        }
    }

    pub async fn srem(&self, key: &str, member: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.srem(key, member).await {
            Ok(v) => v,
            Err(e) => self.absorb("srem", key, e, false),
        }
    }

    // ============== Lists ==============

    pub async fn lpush(&self, key: &str, value: &str) -> u64 {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.lpush(key, value).await {
            Ok(v) => v,
            Err(e) => self.absorb("lpush", key, e, 0),
        }
    }

    pub async fn rpush(&self, key: &str, value: &str) -> u64 {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.rpush(key, value).await {
            Ok(v) => v,
            Err(e) => self.absorb("rpush", key, e, 0),
        }
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let Some(be) = self.backend() else {
            return self.unavailable(Vec::new());
        };
        match be.lrange(key, start, stop).await {
            Ok(v) => v,
            Err(e) => self.absorb("lrange", key, e, Vec::new()),
        }
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.ltrim(key, start, stop).await {
            Ok(()) => true,
            Err(e) => self.absorb("ltrim", key, e, false),
        }
    }

    pub async fn llen(&self, key: &str) -> u64 {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.llen(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("llen", key, e, 0),
        }
    }

    // ============== Sorted sets ==============

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.zadd(key, score, member).await {
            Ok(v) => v,
            Err(e) => self.absorb("zadd", key, e, false),
        }
    }

    pub async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Vec<String> {
        let Some(be) = self.backend() else {
            return self.unavailable(Vec::new());
        };
        match be.zrange_by_score(key, min, max, limit).await {
            Ok(v) => v,
            Err(e) => self.absorb("zrange_by_score", key, e, Vec::new()),
        }
    }

    pub async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> u64 {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.zrem_range_by_score(key, min, max).await {
            Ok(v) => v,
            Err(e) => self.absorb("zrem_range_by_score", key, e, 0),
        }
    }

    pub async fn zpop_min(&self, key: &str) -> Option<(String, f64)> {
        let Some(be) = self.backend() else {
            return self.unavailable(None);
        };
        match be.zpop_min(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("zpop_min", key, e, None),
        }
    }

    pub async fn zrem(&self, key: &str, member: &str) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.zrem(key, member).await {
            Ok(v) => v,
            Err(e) => self.absorb("zrem", key, e, false),
        }
    }

    pub async fn zcount(&self, key: &str, min: f64, max: f64) -> u64 {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.zcount(key, min, max).await {
            Ok(v) => v,
            Err(e) => self.absorb("zcount", key, e, 0),
        }
    }

    pub async fn zcard(&self, key: &str) -> u64 {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.zcard(key).await {
            Ok(v) => v,
            Err(e) => self.absorb("zcard", key, e, 0),
        }
    }

    // ============== Key space ==============

    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        let Some(be) = self.backend() else {
            return self.unavailable(Vec::new());
        };
        match be.scan(pattern).await {
            Ok(v) => v,
            Err(e) => self.absorb("scan", pattern, e, Vec::new()),
        }
    }

    pub async fn exec(&self, batch: Vec<BatchCommand>) -> Vec<BatchReply> {
        let Some(be) = self.backend() else {
            return self.unavailable(Vec::new());
        };
        match be.exec(batch).await {
            Ok(v) => v,
            Err(e) => self.absorb("exec", "", e, Vec::new()),
        }
    }

    pub async fn flush_all(&self) -> bool {
        let Some(be) = self.backend() else {
            return self.unavailable(false);
        };
        match be.flush_all().await {
            Ok(()) => true,
            Err(e) => self.absorb("flush_all", "", e, false),
        }
    }

    pub async fn item_count(&self) -> usize {
        let Some(be) = self.backend() else {
            return self.unavailable(0);
        };
        match be.item_count().await {
            Ok(v) => v,
            Err(e) => self.absorb("item_count", "", e, 0),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
