//! Tagged value and entry types for the in-process emulation.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// A stored value. One key space holds scalars and typed collections; the
/// variant is checked on every access so that a hash-typed entry read as a
/// plain string errors instead of crashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreValue {
    Scalar(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
    /// Sorted set: member -> score. Range queries sort on demand.
    Sorted(HashMap<String, f64>),
}

impl StoreValue {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreValue::Scalar(_) => "scalar",
            StoreValue::Hash(_) => "hash",
            StoreValue::Set(_) => "set",
            StoreValue::List(_) => "list",
            StoreValue::Sorted(_) => "sorted-set",
        }
    }

    /// True when a removal op emptied the collection and the key should be
    /// dropped, matching remote-store behavior for empty collections.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            StoreValue::Scalar(_) => false,
            StoreValue::Hash(h) => h.is_empty(),
            StoreValue::Set(s) => s.is_empty(),
            StoreValue::List(l) => l.is_empty(),
            StoreValue::Sorted(z) => z.is_empty(),
        }
    }
}

/// A key's value plus its optional absolute expiry (epoch ms). An entry past
/// its expiry is logically absent and is removed on the next access.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub value: StoreValue,
    pub expires_at: Option<u64>,
}

impl StoreEntry {
    pub fn new(value: StoreValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    #[inline(always)]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Remaining TTL in whole seconds (rounded up), or -1 without expiry.
    pub fn ttl_secs(&self, now: u64) -> i64 {
        match self.expires_at {
            None => -1,
            Some(at) => ((at.saturating_sub(now)) as i64 + 999) / 1000,
        }
    }
}
