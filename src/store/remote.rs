//! Remote store backend over a Redis-compatible service.
//!
//! Holds a multiplexed connection handle that reconnects internally; the
//! supervisor owns the decision of whether this backend is bound at all.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::backend::{BatchCommand, BatchReply, StoreBackend, StoreError};
use crate::config::StoreConfig;

pub struct RemoteStore {
    conn: ConnectionManager,
}

/// Format a score bound the way the remote protocol expects, including the
/// open-ended infinities.
fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

fn reply_from_value(value: redis::Value) -> BatchReply {
    match value {
        redis::Value::Okay => BatchReply::Ok,
        redis::Value::Nil => BatchReply::Nil,
        redis::Value::Int(i) => BatchReply::Int(i),
        redis::Value::Data(bytes) => BatchReply::Value(String::from_utf8_lossy(&bytes).into_owned()),
        redis::Value::Status(_) => BatchReply::Ok,
        redis::Value::Bulk(_) => BatchReply::Error("unexpected bulk reply".to_string()),
    }
}

impl RemoteStore {
    /// Connect and verify the connection with a liveness round-trip.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url().as_str())?;
        let mut conn = client.get_connection_manager().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        info!(host = %config.host, port = config.port, "remote store connected");
        Ok(Self { conn })
    }

    #[inline]
    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl StoreBackend for RemoteStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.exists(key).await?)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        Ok(conn.ttl(key).await?)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.persist(key).await?)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        Ok(conn.incr(key, delta).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.hset(key, field, value).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.hdel(key, field).await?;
        Ok(removed > 0)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.smembers(key).await?)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let len: i64 = conn.lpush(key, value).await?;
        Ok(len.max(0) as u64)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let len: i64 = conn.rpush(key, value).await?;
        Ok(len.max(0) as u64)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.lrange(key, start as isize, stop as isize).await?)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.ltrim::<_, ()>(key, start as isize, stop as isize).await?;
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let len: i64 = conn.llen(key).await?;
        Ok(len.max(0) as u64)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let added: i64 = conn.zadd(key, member, score).await?;
        Ok(added > 0)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let members = match limit {
            Some(n) => {
                conn.zrangebyscore_limit(key, score_arg(min), score_arg(max), 0, n as isize)
                    .await?
            }
            None => conn.zrangebyscore(key, score_arg(min), score_arg(max)).await?,
        };
        Ok(members)
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.zrembyscore(key, score_arg(min), score_arg(max)).await?;
        Ok(removed.max(0) as u64)
    }

    async fn zpop_min(&self, key: &str) -> Result<Option<(String, f64)>, StoreError> {
        let mut conn = self.conn();
        let popped: Vec<(String, f64)> = conn.zpopmin(key, 1).await?;
        Ok(popped.into_iter().next())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let count: i64 = conn.zcount(key, score_arg(min), score_arg(max)).await?;
        Ok(count.max(0) as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let count: i64 = conn.zcard(key).await?;
        Ok(count.max(0) as u64)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let mut keys = Vec::new();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn exec(&self, batch: Vec<BatchCommand>) -> Result<Vec<BatchReply>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let count = batch.len();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for cmd in &batch {
            match cmd {
                BatchCommand::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value);
                }
                BatchCommand::SetEx { key, value, ttl_secs } => {
                    pipe.cmd("SETEX").arg(key).arg(*ttl_secs).arg(value);
                }
                BatchCommand::Get { key } => {
                    pipe.cmd("GET").arg(key);
                }
                BatchCommand::Del { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                BatchCommand::IncrBy { key, delta } => {
                    pipe.cmd("INCRBY").arg(key).arg(*delta);
                }
                BatchCommand::Expire { key, ttl_secs } => {
                    pipe.cmd("EXPIRE").arg(key).arg(*ttl_secs);
                }
                BatchCommand::Hset { key, field, value } => {
                    pipe.cmd("HSET").arg(key).arg(field).arg(value);
                }
                BatchCommand::Hdel { key, field } => {
                    pipe.cmd("HDEL").arg(key).arg(field);
                }
                BatchCommand::Sadd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member);
                }
                BatchCommand::Srem { key, member } => {
                    pipe.cmd("SREM").arg(key).arg(member);
                }
                BatchCommand::Lpush { key, value } => {
                    pipe.cmd("LPUSH").arg(key).arg(value);
                }
                BatchCommand::Rpush { key, value } => {
                    pipe.cmd("RPUSH").arg(key).arg(value);
                }
                BatchCommand::Ltrim { key, start, stop } => {
                    pipe.cmd("LTRIM").arg(key).arg(*start).arg(*stop);
                }
                BatchCommand::Zadd { key, score, member } => {
                    pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
                }
                BatchCommand::Zrem { key, member } => {
                    pipe.cmd("ZREM").arg(key).arg(member);
                }
            }
        }

        let mut conn = self.conn();
        match pipe.query_async::<_, Vec<redis::Value>>(&mut conn).await {
            Ok(values) => Ok(values.into_iter().map(reply_from_value).collect()),
            // The driver reports transaction failures at the query level;
            // surface the failure on every sub-operation slot.
            Err(e) => Ok(vec![BatchReply::Error(e.to_string()); count]),
        }
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn item_count(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let size: i64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size.max(0) as usize)
    }
}
