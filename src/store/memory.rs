//! In-process emulation of the remote store.
//!
//! Activated by the supervisor when the remote store is unreachable. The
//! whole key space lives under one `RwLock`, which is also what makes the
//! multi-command batch atomic: `exec` applies every sub-operation under a
//! single write guard.
//!
//! Semantics mirror the remote store for everything callers can observe:
//! TTL decay (a read past expiry removes the entry and reports absence),
//! value-kind guards, empty collections dropping their key, and
//! anchored-prefix pattern scans.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::backend::{BatchCommand, BatchReply, StoreBackend, StoreError};
use super::value::{StoreEntry, StoreValue};
use crate::time::now_ms;

type Map = HashMap<String, StoreEntry>;

pub struct MemoryStore {
    inner: RwLock<Map>,
}

/// Fetch a live entry, evicting it first if its expiry has passed.
fn live_entry<'a>(map: &'a mut Map, key: &str, now: u64) -> Option<&'a mut StoreEntry> {
    if map.get(key).is_some_and(|e| e.is_expired(now)) {
        map.remove(key);
        return None;
    }
    map.get_mut(key)
}

/// Drop the key when a removal emptied its collection.
fn drop_if_empty(map: &mut Map, key: &str) {
    if map.get(key).is_some_and(|e| e.value.is_empty_collection()) {
        map.remove(key);
    }
}

fn wrong_type(expected: &'static str, entry: &StoreEntry) -> StoreError {
    StoreError::WrongType {
        expected,
        actual: entry.value.kind(),
    }
}

/// Normalize a possibly-negative range index against a list length.
fn list_index(idx: i64, len: usize) -> i64 {
    if idx < 0 {
        idx + len as i64
    } else {
        idx
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Remove every expired entry. Called by the periodic sweep; individual
    /// accesses evict lazily regardless.
    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut map = self.inner.write();
        let before = map.len();
        map.retain(|_, e| !e.is_expired(now));
        before - map.len()
    }

    /// Drop all entries. Used when the supervisor shuts fallback mode down.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        let now = now_ms();
        self.inner.read().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ============== Shared op bodies ==============
    //
    // Each op takes the already-locked map so the batch path can reuse them
    // under its single write guard.

    fn op_set(map: &mut Map, key: &str, value: &str) {
        map.insert(
            key.to_string(),
            StoreEntry::new(StoreValue::Scalar(value.to_string())),
        );
    }

    fn op_set_ex(map: &mut Map, key: &str, value: &str, ttl_secs: u64, now: u64) {
        map.insert(
            key.to_string(),
            StoreEntry {
                value: StoreValue::Scalar(value.to_string()),
                expires_at: Some(now + ttl_secs * 1000),
            },
        );
    }

    fn op_get(map: &mut Map, key: &str, now: u64) -> Result<Option<String>, StoreError> {
        match live_entry(map, key, now) {
            None => Ok(None),
            Some(e) => match &e.value {
                StoreValue::Scalar(s) => Ok(Some(s.clone())),
                _ => Err(wrong_type("scalar", e)),
            },
        }
    }

    fn op_del(map: &mut Map, key: &str, now: u64) -> bool {
        if live_entry(map, key, now).is_none() {
            return false;
        }
        map.remove(key).is_some()
    }

    fn op_incr_by(map: &mut Map, key: &str, delta: i64, now: u64) -> Result<i64, StoreError> {
        match live_entry(map, key, now) {
            None => {
                map.insert(
                    key.to_string(),
                    StoreEntry::new(StoreValue::Scalar(delta.to_string())),
                );
                Ok(delta)
            }
            Some(e) => match &mut e.value {
                StoreValue::Scalar(s) => {
                    let current: i64 = s.parse().map_err(|_| StoreError::NotAnInteger)?;
                    let next = current + delta;
                    *s = next.to_string();
                    Ok(next)
                }
                _ => Err(wrong_type("scalar", e)),
            },
        }
    }

    fn op_expire(map: &mut Map, key: &str, ttl_secs: u64, now: u64) -> bool {
        match live_entry(map, key, now) {
            None => false,
            Some(e) => {
                e.expires_at = Some(now + ttl_secs * 1000);
                true
            }
        }
    }

    fn op_hset(
        map: &mut Map,
        key: &str,
        field: &str,
        value: &str,
        now: u64,
    ) -> Result<bool, StoreError> {
        match live_entry(map, key, now) {
            None => {
                let mut h = HashMap::new();
                h.insert(field.to_string(), value.to_string());
                map.insert(key.to_string(), StoreEntry::new(StoreValue::Hash(h)));
                Ok(true)
            }
            Some(e) => match &mut e.value {
                StoreValue::Hash(h) => {
                    Ok(h.insert(field.to_string(), value.to_string()).is_none())
                }
                _ => Err(wrong_type("hash", e)),
            },
        }
    }

    fn op_hdel(map: &mut Map, key: &str, field: &str, now: u64) -> Result<bool, StoreError> {
        let removed = match live_entry(map, key, now) {
            None => false,
            Some(e) => match &mut e.value {
                StoreValue::Hash(h) => h.remove(field).is_some(),
                _ => return Err(wrong_type("hash", e)),
            },
        };
        drop_if_empty(map, key);
        Ok(removed)
    }

    fn op_sadd(map: &mut Map, key: &str, member: &str, now: u64) -> Result<bool, StoreError> {
        match live_entry(map, key, now) {
            None => {
                let mut s = HashSet::new();
                s.insert(member.to_string());
                map.insert(key.to_string(), StoreEntry::new(StoreValue::Set(s)));
                Ok(true)
            }
            Some(e) => match &mut e.value {
                StoreValue::Set(s) => Ok(s.insert(member.to_string())),
                _ => Err(wrong_type("set", e)),
            },
        }
    }

    fn op_srem(map: &mut Map, key: &str, member: &str, now: u64) -> Result<bool, StoreError> {
        let removed = match live_entry(map, key, now) {
            None => false,
            Some(e) => match &mut e.value {
                StoreValue::Set(s) => s.remove(member),
                _ => return Err(wrong_type("set", e)),
            },
        };
        drop_if_empty(map, key);
        Ok(removed)
    }

    fn op_push(
        map: &mut Map,
        key: &str,
        value: &str,
        front: bool,
        now: u64,
    ) -> Result<u64, StoreError> {
        match live_entry(map, key, now) {
            None => {
                let mut l = VecDeque::new();
                l.push_back(value.to_string());
                map.insert(key.to_string(), StoreEntry::new(StoreValue::List(l)));
                Ok(1)
            }
            Some(e) => match &mut e.value {
                StoreValue::List(l) => {
                    if front {
                        l.push_front(value.to_string());
                    } else {
                        l.push_back(value.to_string());
                    }
                    Ok(l.len() as u64)
                }
                _ => Err(wrong_type("list", e)),
            },
        }
    }

    fn op_ltrim(
        map: &mut Map,
        key: &str,
        start: i64,
        stop: i64,
        now: u64,
    ) -> Result<(), StoreError> {
        match live_entry(map, key, now) {
            None => Ok(()),
            Some(e) => match &mut e.value {
                StoreValue::List(l) => {
                    let len = l.len();
                    let start = list_index(start, len).max(0) as usize;
                    let stop = list_index(stop, len).min(len as i64 - 1);
                    if stop < start as i64 {
                        l.clear();
                    } else {
                        let stop = stop as usize;
                        *l = l
                            .iter()
                            .skip(start)
                            .take(stop - start + 1)
                            .cloned()
                            .collect();
                    }
                    drop_if_empty(map, key);
                    Ok(())
                }
                _ => Err(wrong_type("list", e)),
            },
        }
    }

    fn op_zadd(
        map: &mut Map,
        key: &str,
        score: f64,
        member: &str,
        now: u64,
    ) -> Result<bool, StoreError> {
        match live_entry(map, key, now) {
            None => {
                let mut z = HashMap::new();
                z.insert(member.to_string(), score);
                map.insert(key.to_string(), StoreEntry::new(StoreValue::Sorted(z)));
                Ok(true)
            }
            Some(e) => match &mut e.value {
                StoreValue::Sorted(z) => Ok(z.insert(member.to_string(), score).is_none()),
                _ => Err(wrong_type("sorted-set", e)),
            },
        }
    }

    fn op_zrem(map: &mut Map, key: &str, member: &str, now: u64) -> Result<bool, StoreError> {
        let removed = match live_entry(map, key, now) {
            None => false,
            Some(e) => match &mut e.value {
                StoreValue::Sorted(z) => z.remove(member).is_some(),
                _ => return Err(wrong_type("sorted-set", e)),
            },
        };
        drop_if_empty(map, key);
        Ok(removed)
    }

    /// Members with scores in [min, max], ordered by (score, member).
    fn sorted_range(z: &HashMap<String, f64>, min: f64, max: f64) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = z
            .iter()
            .filter(|(_, &s)| s >= min && s <= max)
            .map(|(m, &s)| (m.clone(), s))
            .collect();
        members.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        members
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::op_get(&mut self.inner.write(), key, now_ms())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Self::op_set(&mut self.inner.write(), key, value);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        Self::op_set_ex(&mut self.inner.write(), key, value, ttl_secs, now_ms());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        Ok(Self::op_del(&mut self.inner.write(), key, now_ms()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        Ok(live_entry(&mut self.inner.write(), key, now).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(-2),
            Some(e) => Ok(e.ttl_secs(now)),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        Ok(Self::op_expire(&mut self.inner.write(), key, ttl_secs, now_ms()))
    }

    async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(false),
            Some(e) => Ok(e.expires_at.take().is_some()),
        }
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        Self::op_incr_by(&mut self.inner.write(), key, delta, now_ms())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        Self::op_hset(&mut self.inner.write(), key, field, value, now_ms())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(None),
            Some(e) => match &e.value {
                StoreValue::Hash(h) => Ok(h.get(field).cloned()),
                _ => Err(wrong_type("hash", e)),
            },
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(HashMap::new()),
            Some(e) => match &e.value {
                StoreValue::Hash(h) => Ok(h.clone()),
                _ => Err(wrong_type("hash", e)),
            },
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        Self::op_hdel(&mut self.inner.write(), key, field, now_ms())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Self::op_sadd(&mut self.inner.write(), key, member, now_ms())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(Vec::new()),
            Some(e) => match &e.value {
                StoreValue::Set(s) => Ok(s.iter().cloned().collect()),
                _ => Err(wrong_type("set", e)),
            },
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Self::op_srem(&mut self.inner.write(), key, member, now_ms())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        Self::op_push(&mut self.inner.write(), key, value, true, now_ms())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        Self::op_push(&mut self.inner.write(), key, value, false, now_ms())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(Vec::new()),
            Some(e) => match &e.value {
                StoreValue::List(l) => {
                    let len = l.len();
                    let start = list_index(start, len).max(0) as usize;
                    let stop = list_index(stop, len).min(len as i64 - 1);
                    if len == 0 || stop < start as i64 {
                        return Ok(Vec::new());
                    }
                    Ok(l.iter()
                        .skip(start)
                        .take(stop as usize - start + 1)
                        .cloned()
                        .collect())
                }
                _ => Err(wrong_type("list", e)),
            },
        }
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        Self::op_ltrim(&mut self.inner.write(), key, start, stop, now_ms())
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(0),
            Some(e) => match &e.value {
                StoreValue::List(l) => Ok(l.len() as u64),
                _ => Err(wrong_type("list", e)),
            },
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError> {
        Self::op_zadd(&mut self.inner.write(), key, score, member, now_ms())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(Vec::new()),
            Some(e) => match &e.value {
                StoreValue::Sorted(z) => {
                    let mut members: Vec<String> = Self::sorted_range(z, min, max)
                        .into_iter()
                        .map(|(m, _)| m)
                        .collect();
                    if let Some(n) = limit {
                        members.truncate(n);
                    }
                    Ok(members)
                }
                _ => Err(wrong_type("sorted-set", e)),
            },
        }
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        let removed = match live_entry(&mut map, key, now) {
            None => 0,
            Some(e) => match &mut e.value {
                StoreValue::Sorted(z) => {
                    let before = z.len();
                    z.retain(|_, &mut s| s < min || s > max);
                    (before - z.len()) as u64
                }
                _ => return Err(wrong_type("sorted-set", e)),
            },
        };
        drop_if_empty(&mut map, key);
        Ok(removed)
    }

    async fn zpop_min(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        let popped = match live_entry(&mut map, key, now) {
            None => None,
            Some(e) => match &mut e.value {
                StoreValue::Sorted(z) => {
                    let lowest = z
                        .iter()
                        .min_by(|a, b| {
                            a.1.partial_cmp(b.1)
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then_with(|| a.0.cmp(b.0))
                        })
                        .map(|(m, &s)| (m.clone(), s));
                    if let Some((ref m, _)) = lowest {
                        z.remove(m);
                    }
                    lowest
                }
                _ => return Err(wrong_type("sorted-set", e)),
            },
        };
        drop_if_empty(&mut map, key);
        Ok(popped)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Self::op_zrem(&mut self.inner.write(), key, member, now_ms())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(0),
            Some(e) => match &e.value {
                StoreValue::Sorted(z) => {
                    Ok(z.values().filter(|&&s| s >= min && s <= max).count() as u64)
                }
                _ => Err(wrong_type("sorted-set", e)),
            },
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        match live_entry(&mut map, key, now) {
            None => Ok(0),
            Some(e) => match &e.value {
                StoreValue::Sorted(z) => Ok(z.len() as u64),
                _ => Err(wrong_type("sorted-set", e)),
            },
        }
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        map.retain(|_, e| !e.is_expired(now));
        let keys = match pattern.strip_suffix('*') {
            Some(prefix) => map
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => map
                .keys()
                .filter(|k| k.as_str() == pattern)
                .cloned()
                .collect(),
        };
        Ok(keys)
    }

    async fn exec(&self, batch: Vec<BatchCommand>) -> Result<Vec<BatchReply>, StoreError> {
        let now = now_ms();
        let mut map = self.inner.write();
        let mut replies = Vec::with_capacity(batch.len());

        for cmd in batch {
            let reply = match cmd {
                BatchCommand::Set { key, value } => {
                    Self::op_set(&mut map, &key, &value);
                    BatchReply::Ok
                }
                BatchCommand::SetEx { key, value, ttl_secs } => {
                    Self::op_set_ex(&mut map, &key, &value, ttl_secs, now);
                    BatchReply::Ok
                }
                BatchCommand::Get { key } => match Self::op_get(&mut map, &key, now) {
                    Ok(Some(v)) => BatchReply::Value(v),
                    Ok(None) => BatchReply::Nil,
                    Err(e) => BatchReply::Error(e.to_string()),
                },
                BatchCommand::Del { key } => {
                    BatchReply::Int(Self::op_del(&mut map, &key, now) as i64)
                }
                BatchCommand::IncrBy { key, delta } => {
                    match Self::op_incr_by(&mut map, &key, delta, now) {
                        Ok(v) => BatchReply::Int(v),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Expire { key, ttl_secs } => {
                    BatchReply::Int(Self::op_expire(&mut map, &key, ttl_secs, now) as i64)
                }
                BatchCommand::Hset { key, field, value } => {
                    match Self::op_hset(&mut map, &key, &field, &value, now) {
                        Ok(new) => BatchReply::Int(new as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Hdel { key, field } => {
                    match Self::op_hdel(&mut map, &key, &field, now) {
                        Ok(removed) => BatchReply::Int(removed as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Sadd { key, member } => {
                    match Self::op_sadd(&mut map, &key, &member, now) {
                        Ok(added) => BatchReply::Int(added as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Srem { key, member } => {
                    match Self::op_srem(&mut map, &key, &member, now) {
                        Ok(removed) => BatchReply::Int(removed as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Lpush { key, value } => {
                    match Self::op_push(&mut map, &key, &value, true, now) {
                        Ok(len) => BatchReply::Int(len as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Rpush { key, value } => {
                    match Self::op_push(&mut map, &key, &value, false, now) {
                        Ok(len) => BatchReply::Int(len as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Ltrim { key, start, stop } => {
                    match Self::op_ltrim(&mut map, &key, start, stop, now) {
                        Ok(()) => BatchReply::Ok,
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Zadd { key, score, member } => {
                    match Self::op_zadd(&mut map, &key, score, &member, now) {
                        Ok(added) => BatchReply::Int(added as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
                BatchCommand::Zrem { key, member } => {
                    match Self::op_zrem(&mut map, &key, &member, now) {
                        Ok(removed) => BatchReply::Int(removed as i64),
                        Err(e) => BatchReply::Error(e.to_string()),
                    }
                }
            };
            replies.push(reply);
        }

        Ok(replies)
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        self.clear();
        Ok(())
    }

    async fn item_count(&self) -> Result<usize, StoreError> {
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_decay_removes_entry() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 1).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.ttl("k").await.unwrap() >= 0);

        sleep(Duration::from_millis(1050)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), -2);
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_ttl_without_expiry() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_persist_clears_expiry() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 100).await.unwrap();
        assert!(store.persist("k").await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), -1);
        assert!(!store.persist("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_type_guard_on_hash_read_as_scalar() {
        let store = MemoryStore::new();
        store.hset("h", "f", "v").await.unwrap();
        assert!(matches!(
            store.get("h").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_type_guard_on_scalar_read_as_hash() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert!(matches!(
            store.hget("k", "f").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_incr() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("n", 1).await.unwrap(), 1);
        assert_eq!(store.incr_by("n", 5).await.unwrap(), 6);
        assert_eq!(store.incr_by("n", -2).await.unwrap(), 4);

        store.set("s", "abc").await.unwrap();
        assert!(matches!(
            store.incr_by("s", 1).await,
            Err(StoreError::NotAnInteger)
        ));
    }

    #[tokio::test]
    async fn test_hash_roundtrip() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();
        assert_eq!(store.hget("h", "a").await.unwrap(), Some("1".to_string()));
        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("b"), Some(&"2".to_string()));

        assert!(store.hdel("h", "a").await.unwrap());
        assert!(store.hdel("h", "b").await.unwrap());
        // Last field removed drops the key entirely
        assert!(!store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_semantics_independent_of_insertion_order() {
        let store = MemoryStore::new();
        for m in ["c", "a", "b", "a"] {
            store.sadd("s", m).await.unwrap();
        }
        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);
        assert!(store.srem("s", "b").await.unwrap());
        assert!(!store.srem("s", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_push_range_trim() {
        let store = MemoryStore::new();
        for v in ["a", "b", "c", "d"] {
            store.rpush("l", v).await.unwrap();
        }
        assert_eq!(store.llen("l").await.unwrap(), 4);
        assert_eq!(
            store.lrange("l", 0, -1).await.unwrap(),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(store.lrange("l", 1, 2).await.unwrap(), vec!["b", "c"]);

        store.ltrim("l", -2, -1).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_sorted_set_pop_order() {
        let store = MemoryStore::new();
        store.zadd("z", 3.0, "three").await.unwrap();
        store.zadd("z", 1.0, "one").await.unwrap();
        store.zadd("z", 2.0, "two").await.unwrap();

        assert_eq!(
            store.zpop_min("z").await.unwrap(),
            Some(("one".to_string(), 1.0))
        );
        assert_eq!(
            store.zpop_min("z").await.unwrap(),
            Some(("two".to_string(), 2.0))
        );
        assert_eq!(
            store.zpop_min("z").await.unwrap(),
            Some(("three".to_string(), 3.0))
        );
        assert_eq!(store.zpop_min("z").await.unwrap(), None);
        // Emptied sorted set drops its key
        assert!(!store.exists("z").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_equal_scores_pop_lexicographically() {
        let store = MemoryStore::new();
        store.zadd("z", 5.0, "bbb").await.unwrap();
        store.zadd("z", 5.0, "aaa").await.unwrap();
        assert_eq!(store.zpop_min("z").await.unwrap().unwrap().0, "aaa");
        assert_eq!(store.zpop_min("z").await.unwrap().unwrap().0, "bbb");
    }

    #[tokio::test]
    async fn test_sorted_range_and_count() {
        let store = MemoryStore::new();
        for (s, m) in [(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")] {
            store.zadd("z", s, m).await.unwrap();
        }
        assert_eq!(
            store.zrange_by_score("z", 2.0, 3.0, None).await.unwrap(),
            vec!["b", "c"]
        );
        assert_eq!(
            store
                .zrange_by_score("z", f64::NEG_INFINITY, f64::INFINITY, Some(2))
                .await
                .unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(store.zcount("z", 2.0, 4.0).await.unwrap(), 3);
        assert_eq!(store.zcard("z").await.unwrap(), 4);
        assert_eq!(store.zrem_range_by_score("z", 1.0, 2.0).await.unwrap(), 2);
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scan_prefix_and_exact() {
        let store = MemoryStore::new();
        store.set("user:1", "a").await.unwrap();
        store.set("user:2", "b").await.unwrap();
        store.set("session:1", "c").await.unwrap();

        let mut keys = store.scan("user:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);

        assert_eq!(store.scan("session:1").await.unwrap(), vec!["session:1"]);
        assert!(store.scan("nope:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exec_applies_in_order_with_per_op_errors() {
        let store = MemoryStore::new();
        store.hset("h", "f", "v").await.unwrap();

        let replies = store
            .exec(vec![
                BatchCommand::Set {
                    key: "a".into(),
                    value: "1".into(),
                },
                BatchCommand::Get { key: "a".into() },
                // Wrong kind: reported on this slot only
                BatchCommand::IncrBy {
                    key: "h".into(),
                    delta: 1,
                },
                BatchCommand::IncrBy {
                    key: "a".into(),
                    delta: 2,
                },
            ])
            .await
            .unwrap();

        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0], BatchReply::Ok);
        assert_eq!(replies[1], BatchReply::Value("1".to_string()));
        assert!(matches!(replies[2], BatchReply::Error(_)));
        assert_eq!(replies[3], BatchReply::Int(3));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let store = MemoryStore::new();
        store.set_ex("a", "1", 1).await.unwrap();
        store.set("b", "2").await.unwrap();
        sleep(Duration::from_millis(1050)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
