//! JSON-aware cache facade over the store adapter.
//!
//! Serializes structured values transparently on write; on read it
//! attempts a JSON decode and falls back to the raw string. The facade is
//! policy-free: TTLs are chosen by the caller, with the conventional
//! defaults per key family collected in the [`ttl`] module. Nothing is
//! cached in-process; every read goes to the bound backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::store::{BatchCommand, BatchReply, Store};

/// Conventional TTLs (seconds) per semantic key family.
pub mod ttl {
    /// Cached user profiles
    pub const PROFILE: u64 = 3_600;
    /// Login sessions
    pub const SESSION: u64 = 86_400;
    /// Discovery / recommendation results
    pub const DISCOVERY: u64 = 300;
    /// One-time passcodes
    pub const OTP: u64 = 300;
    /// Password-reset tokens
    pub const RESET_TOKEN: u64 = 900;
    /// Rate-limit windows
    pub const RATE_LIMIT: u64 = 60;
    /// Short-lived temp storage
    pub const TEMP: u64 = 600;
}

#[derive(Clone)]
pub struct Cache {
    store: Arc<Store>,
}

/// Decode a stored string: JSON when it parses, raw string otherwise.
fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

impl Cache {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Serialize and store a value, with an optional TTL in seconds.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        let Ok(raw) = serde_json::to_string(value) else {
            return false;
        };
        match ttl_secs {
            Some(ttl) => self.store.set_ex(key, &raw, ttl).await,
            None => self.store.set(key, &raw).await,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key).await.map(decode)
    }

    pub async fn del(&self, key: &str) -> bool {
        self.store.del(key).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.store.exists(key).await
    }

    pub async fn ttl(&self, key: &str) -> i64 {
        self.store.ttl(key).await
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.store.expire(key, ttl_secs).await
    }

    pub async fn persist(&self, key: &str) -> bool {
        self.store.persist(key).await
    }

    pub async fn incr(&self, key: &str, delta: i64) -> i64 {
        self.store.incr_by(key, delta).await
    }

    // ============== Hashes ==============

    pub async fn hset<T: Serialize>(&self, key: &str, field: &str, value: &T) -> bool {
        let Ok(raw) = serde_json::to_string(value) else {
            return false;
        };
        self.store.hset(key, field, &raw).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Option<Value> {
        self.store.hget(key, field).await.map(decode)
    }

    pub async fn hgetall(&self, key: &str) -> HashMap<String, Value> {
        self.store
            .hgetall(key)
            .await
            .into_iter()
            .map(|(field, raw)| (field, decode(raw)))
            .collect()
    }

    pub async fn hdel(&self, key: &str, field: &str) -> bool {
        self.store.hdel(key, field).await
    }

    // ============== Sets ==============

    pub async fn sadd(&self, key: &str, member: &str) -> bool {
        self.store.sadd(key, member).await
    }

    pub async fn smembers(&self, key: &str) -> Vec<String> {
        self.store.smembers(key).await
    }

    pub async fn srem(&self, key: &str, member: &str) -> bool {
        self.store.srem(key, member).await
    }

    // ============== Multi-key ==============

    /// Set several keys in one atomic batch, all with the same optional TTL.
    pub async fn mset(&self, entries: &[(String, Value)], ttl_secs: Option<u64>) -> bool {
        if entries.is_empty() {
            return true;
        }
        let mut batch = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Ok(raw) = serde_json::to_string(value) else {
                return false;
            };
            batch.push(match ttl_secs {
                Some(ttl) => BatchCommand::SetEx {
                    key: key.clone(),
                    value: raw,
                    ttl_secs: ttl,
                },
                None => BatchCommand::Set {
                    key: key.clone(),
                    value: raw,
                },
            });
        }
        let replies = self.store.exec(batch).await;
        replies.len() == entries.len() && replies.iter().all(|r| *r == BatchReply::Ok)
    }

    /// Fetch several keys in one atomic batch. The result is positional;
    /// absent (or failed) keys come back as `None`.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<Value>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let batch = keys
            .iter()
            .map(|key| BatchCommand::Get { key: key.clone() })
            .collect();
        let replies = self.store.exec(batch).await;
        if replies.len() != keys.len() {
            return vec![None; keys.len()];
        }
        replies
            .into_iter()
            .map(|reply| match reply {
                BatchReply::Value(raw) => Some(decode(raw)),
                _ => None,
            })
            .collect()
    }

    // ============== Key space ==============

    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        self.store.scan(pattern).await
    }

    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        self.store.scan(pattern).await
    }

    /// Run an explicit atomic batch.
    pub async fn pipeline(&self, batch: Vec<BatchCommand>) -> Vec<BatchReply> {
        self.store.exec(batch).await
    }

    pub async fn flush_all(&self) -> bool {
        self.store.flush_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn cache() -> Cache {
        let store = Store::new();
        store.bind(Arc::new(MemoryStore::new()));
        Cache::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let cache = cache();
        let value = json!({"name": "ada", "age": 36});
        assert!(cache.set("user:1", &value, None).await);
        assert_eq!(cache.get("user:1").await, Some(value));
    }

    #[tokio::test]
    async fn test_raw_string_fallback_on_decode_failure() {
        let cache = cache();
        // A value written outside the facade that is not valid JSON
        cache.store().set("legacy", "not json at all").await;
        assert_eq!(
            cache.get("legacy").await,
            Some(Value::String("not json at all".to_string()))
        );
    }

    #[tokio::test]
    async fn test_mset_mget_positional() {
        let cache = cache();
        let entries = vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!({"x": true})),
        ];
        assert!(cache.mset(&entries, None).await);

        let values = cache
            .mget(&["a".to_string(), "missing".to_string(), "b".to_string()])
            .await;
        assert_eq!(values[0], Some(json!(1)));
        assert_eq!(values[1], None);
        assert_eq!(values[2], Some(json!({"x": true})));
    }

    #[tokio::test]
    async fn test_hash_fields_decode_individually() {
        let cache = cache();
        cache.hset("h", "count", &json!(3)).await;
        cache.hset("h", "label", &"hello").await;
        assert_eq!(cache.hget("h", "count").await, Some(json!(3)));
        let all = cache.hgetall("h").await;
        assert_eq!(all.get("label"), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn test_incr_counter() {
        let cache = cache();
        assert_eq!(cache.incr("hits", 1).await, 1);
        assert_eq!(cache.incr("hits", 4).await, 5);
    }

    #[tokio::test]
    async fn test_keys_scan() {
        let cache = cache();
        cache.set("otp:1", &json!("123"), Some(ttl::OTP)).await;
        cache.set("otp:2", &json!("456"), Some(ttl::OTP)).await;
        cache.set("sess:1", &json!("x"), None).await;
        let mut keys = cache.keys("otp:*").await;
        keys.sort();
        assert_eq!(keys, vec!["otp:1", "otp:2"]);
    }
}
