//! # Redis Job Queue
//!
//! A lease-based queue shared by every worker process. For a queue named `q`:
//!
//! | Key | Type | Content |
//! |---|---|---|
//! | `q:ready` | sorted set | job id, scored by the epoch-ms it becomes visible |
//! | `q:jobs` | hash | job id → job JSON |
//! | `q:attempts` | hash | job id → deliveries so far |
//! | `q:failed` | list | failed-job JSON, newest first, capped |
//!
//! Reserving is a single Lua script: take the first visible id, push its score
//! past the visibility timeout and bump its attempt counter. A worker that
//! never settles its job lets the lease expire and the job is picked up again.
//! Visibility is computed from the client's clock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use tracing::{debug, warn};

use crate::backends::JobQueue;
use crate::error::{QuoteError, QuoteResult};
use crate::model::{FailedJob, Job};

/// Failed jobs kept on the list.
const FAILED_RETENTION: isize = 1000;
const OP_TIMEOUT: Duration = Duration::from_secs(2);

const RESERVE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
  return false
end
local id = ids[1]
local raw = redis.call('HGET', KEYS[2], id)
if not raw then
  redis.call('ZREM', KEYS[1], id)
  redis.call('HDEL', KEYS[3], id)
  return false
end
redis.call('ZADD', KEYS[1], tonumber(ARGV[1]) + tonumber(ARGV[2]), id)
local attempts = redis.call('HINCRBY', KEYS[3], id, 1)
return {id, raw, attempts}
"#;

/// Job queue in Redis.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    ready: String,
    jobs: String,
    attempts: String,
    failed: String,
    reserve: Script,
}

fn queue_error(e: redis::RedisError) -> QuoteError {
    QuoteError::QueueUnavailable(e.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl RedisQueue {
    /// Creates a handle on the queue called `name`.
    pub fn new(conn: ConnectionManager, name: &str) -> Self {
        Self {
            conn,
            ready: format!("{}:ready", name),
            jobs: format!("{}:jobs", name),
            attempts: format!("{}:attempts", name),
            failed: format!("{}:failed", name),
            reserve: Script::new(RESERVE_SCRIPT),
        }
    }

    async fn run<T, F>(&self, op: F) -> QuoteResult<T>
    where
        F: std::future::Future<Output = RedisResult<T>>,
    {
        tokio::time::timeout(OP_TIMEOUT, op)
            .await
            .map_err(|_| QuoteError::QueueUnavailable(format!("no reply within {:?}", OP_TIMEOUT)))?
            .map_err(queue_error)
    }

    async fn remove(&self, id: &str) -> QuoteResult<()> {
        let mut conn = self.conn.clone();
        let pipe = redis::pipe()
            .atomic()
            .cmd("ZREM").arg(&self.ready).arg(id).ignore()
            .cmd("HDEL").arg(&self.jobs).arg(id).ignore()
            .cmd("HDEL").arg(&self.attempts).arg(id).ignore()
            .to_owned();
        self.run::<(), _>(pipe.query_async(&mut conn)).await
    }

    fn encode<T: serde::Serialize>(value: &T) -> QuoteResult<String> {
        serde_json::to_string(value).map_err(|e| QuoteError::QueueUnavailable(format!("encode: {}", e)))
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, key: &str, value: &str) -> QuoteResult<Job> {
        let job = Job::new(key, value);
        let payload = Self::encode(&job)?;
        let mut conn = self.conn.clone();
        let pipe = redis::pipe()
            .atomic()
            .cmd("HSET").arg(&self.jobs).arg(&job.id).arg(payload).ignore()
            .cmd("ZADD").arg(&self.ready).arg(job.enqueue_time).arg(&job.id).ignore()
            .to_owned();
        self.run::<(), _>(pipe.query_async(&mut conn)).await?;
        debug!("Enqueued job {} ({} = {})", job.id, job.key, job.value);
        Ok(job)
    }

    async fn reserve(&self, visibility: Duration) -> QuoteResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let mut invocation = self.reserve.key(&self.ready);
        invocation
            .key(&self.jobs)
            .key(&self.attempts)
            .arg(now_ms())
            .arg(visibility.as_millis() as u64);
        let leased: Option<(String, String, u32)> =
            self.run(invocation.invoke_async(&mut conn)).await?;

        let Some((id, raw, attempts)) = leased else {
            return Ok(None);
        };
        match serde_json::from_str::<Job>(&raw) {
            Ok(mut job) => {
                job.attempts = attempts;
                Ok(Some(job))
            }
            Err(e) => {
                warn!("Discarding unreadable job {}: {}", id, e);
                self.remove(&id).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, job: &Job) -> QuoteResult<()> {
        self.remove(&job.id).await
    }

    async fn retry_later(&self, job: &Job, delay: Duration) -> QuoteResult<()> {
        let mut conn = self.conn.clone();
        let visible_at = now_ms() + delay.as_millis() as i64;
        let cmd = redis::cmd("ZADD")
            .arg(&self.ready)
            .arg("XX")
            .arg(visible_at)
            .arg(&job.id)
            .to_owned();
        self.run::<i64, _>(cmd.query_async(&mut conn)).await.map(|_| ())
    }

    async fn fail(&self, job: &Job, reason: &str) -> QuoteResult<()> {
        let record = FailedJob {
            job: job.clone(),
            reason: reason.to_string(),
            failed_at: now_ms(),
        };
        let payload = Self::encode(&record)?;
        let mut conn = self.conn.clone();
        let pipe = redis::pipe()
            .atomic()
            .cmd("ZREM").arg(&self.ready).arg(&job.id).ignore()
            .cmd("HDEL").arg(&self.jobs).arg(&job.id).ignore()
            .cmd("HDEL").arg(&self.attempts).arg(&job.id).ignore()
            .cmd("LPUSH").arg(&self.failed).arg(payload).ignore()
            .cmd("LTRIM").arg(&self.failed).arg(0).arg(FAILED_RETENTION - 1).ignore()
            .to_owned();
        self.run::<(), _>(pipe.query_async(&mut conn)).await
    }

    async fn failed(&self) -> QuoteResult<Vec<FailedJob>> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("LRANGE").arg(&self.failed).arg(0).arg(-1).to_owned();
        let raw: Vec<String> = self.run(cmd.query_async(&mut conn)).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(failed) => Some(failed),
                Err(e) => {
                    warn!("Skipping unreadable failed-job entry: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn pending(&self) -> QuoteResult<u64> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("ZCARD").arg(&self.ready).to_owned();
        self.run(cmd.query_async(&mut conn)).await
    }
}
