//! # Redis Cache and Counters
//!
//! Async wrappers over a shared `ConnectionManager`.
//!
//! Cache entries are stored under `metal:{key}` with a millisecond TTL. The
//! value is prefixed so negative entries can share the keyspace: `v:<value>`
//! for a present value and `n` for a key known to be absent.
//!
//! Every round trip is bounded by an operation timeout; a slow or unreachable
//! Redis surfaces as [`QuoteError::CacheUnavailable`] and the caller bypasses
//! the cache.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};

use crate::backends::{CacheLayer, CachedValue, CounterStore, WindowHit};
use crate::error::{QuoteError, QuoteResult};

const KEY_PREFIX: &str = "metal:";
const PRESENT_TAG: &str = "v:";
const ABSENT_TAG: &str = "n";

/// INCR the bucket, start its window on the first hit, report `{count, pttl}`.
const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

fn encode(entry: &CachedValue) -> String {
    match entry {
        CachedValue::Present(value) => format!("{}{}", PRESENT_TAG, value),
        CachedValue::Absent => ABSENT_TAG.to_string(),
    }
}

fn decode(raw: &str) -> Option<CachedValue> {
    if let Some(value) = raw.strip_prefix(PRESENT_TAG) {
        Some(CachedValue::Present(value.to_string()))
    } else if raw == ABSENT_TAG {
        Some(CachedValue::Absent)
    } else {
        None
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

async fn bounded<T>(op_timeout: Duration, op: impl Future<Output = RedisResult<T>>) -> QuoteResult<T> {
    match tokio::time::timeout(op_timeout, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(QuoteError::CacheUnavailable(e.to_string())),
        Err(_) => Err(QuoteError::CacheUnavailable(format!(
            "no reply within {:?}",
            op_timeout
        ))),
    }
}

/// Cache entries in Redis strings.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCache {
    /// Wraps a connection manager. `op_timeout` bounds each command.
    pub fn new(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self { conn, op_timeout }
    }

    fn key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    async fn get(&self, key: &str) -> QuoteResult<Option<CachedValue>> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("GET").arg(Self::key(key)).to_owned();
        let raw: Option<String> = bounded(self.op_timeout, cmd.query_async(&mut conn)).await?;
        Ok(raw.as_deref().and_then(decode))
    }

    async fn put(&self, key: &str, entry: &CachedValue, ttl: Duration) -> QuoteResult<()> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("SET")
            .arg(Self::key(key))
            .arg(encode(entry))
            .arg("PX")
            .arg(ttl_millis(ttl))
            .to_owned();
        bounded::<()>(self.op_timeout, cmd.query_async(&mut conn)).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        entry: &CachedValue,
        ttl: Duration,
    ) -> QuoteResult<bool> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("SET")
            .arg(Self::key(key))
            .arg(encode(entry))
            .arg("PX")
            .arg(ttl_millis(ttl))
            .arg("NX")
            .to_owned();
        let reply: Option<String> = bounded(self.op_timeout, cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }
}

/// Fixed-window counters for the rate limiter.
#[derive(Clone)]
pub struct RedisCounters {
    conn: ConnectionManager,
    op_timeout: Duration,
    script: Script,
}

impl RedisCounters {
    pub fn new(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self {
            conn,
            op_timeout,
            script: Script::new(HIT_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounters {
    async fn hit(&self, bucket: &str, window: Duration) -> QuoteResult<WindowHit> {
        let mut conn = self.conn.clone();
        let mut invocation = self.script.key(bucket);
        invocation.arg(ttl_millis(window));
        let (count, pttl): (u64, i64) =
            bounded(self.op_timeout, invocation.invoke_async(&mut conn)).await?;
        Ok(WindowHit {
            count,
            resets_in: Duration::from_millis(pttl.max(0) as u64),
        })
    }
}
