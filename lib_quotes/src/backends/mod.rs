//! # Backend Contracts
//!
//! The pipeline reaches every shared resource through one of the traits below.
//! Handles are built once at startup and passed around as `Arc<dyn Trait>`, so
//! the same coordinator, read path and worker pool run against Redis/Postgres
//! in production and against [`memory`] in tests or single-instance mode.
//!
//! | Trait | Production backend | Shared across instances |
//! |---|---|---|
//! | [`DurableStore`] | Postgres table `data` | yes |
//! | [`CacheLayer`] | Redis strings with TTL | yes |
//! | [`EventBus`] | Redis pub/sub, one channel per key | yes |
//! | [`JobQueue`] | Redis sorted set + hashes | yes |
//! | [`CounterStore`] | Redis counters with expiry | yes |

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::QuoteResult;
use crate::model::{ChangeEvent, FailedJob, Job, Record};

pub mod memory;

#[cfg(test)]
pub(crate) mod faults;

/// Authoritative key/value persistence. `upsert` must be atomic per key.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Returns the stored value for `key`, if any.
    async fn find(&self, key: &str) -> QuoteResult<Option<String>>;
    /// Inserts or overwrites the record for `key`.
    async fn upsert(&self, key: &str, value: &str) -> QuoteResult<()>;
    /// Returns every record.
    async fn all(&self) -> QuoteResult<Vec<Record>>;
}

/// What a cache entry says about a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    /// The key holds this value.
    Present(String),
    /// The key was looked up and did not exist (negative caching).
    Absent,
}

/// Short-TTL accelerator in front of the [`DurableStore`].
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Returns the unexpired entry for `key`, if any.
    async fn get(&self, key: &str) -> QuoteResult<Option<CachedValue>>;
    /// Writes the entry, replacing whatever was there.
    async fn put(&self, key: &str, entry: &CachedValue, ttl: Duration) -> QuoteResult<()>;
    /// Writes the entry only when none exists. Returns whether it was written.
    async fn put_if_absent(&self, key: &str, entry: &CachedValue, ttl: Duration)
        -> QuoteResult<bool>;
}

/// Per-key publish/subscribe channel.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes on the channel named after `event.key`.
    async fn publish(&self, event: &ChangeEvent) -> QuoteResult<()>;
    /// Listens on the channels of every key in `keys`.
    async fn subscribe(&self, keys: &[String]) -> QuoteResult<Subscription>;
}

/// At-least-once work buffer with leases.
///
/// A reserved job stays invisible for the visibility timeout. If it is neither
/// acknowledged, rescheduled nor failed before then, it becomes visible again
/// and another worker may take it.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably queues a write and returns the stored job.
    async fn enqueue(&self, key: &str, value: &str) -> QuoteResult<Job>;
    /// Leases the next visible job. `attempts` already counts this delivery.
    async fn reserve(&self, visibility: Duration) -> QuoteResult<Option<Job>>;
    /// Removes a finished job.
    async fn ack(&self, job: &Job) -> QuoteResult<()>;
    /// Makes a leased job visible again after `delay`.
    async fn retry_later(&self, job: &Job, delay: Duration) -> QuoteResult<()>;
    /// Moves a job to the failure list.
    async fn fail(&self, job: &Job, reason: &str) -> QuoteResult<()>;
    /// Lists failed jobs, newest first.
    async fn failed(&self) -> QuoteResult<Vec<FailedJob>>;
    /// Number of jobs waiting or leased.
    async fn pending(&self) -> QuoteResult<u64>;
}

/// Result of counting one request against a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Requests counted in the current window, this one included.
    pub count: u64,
    /// Time left until the window resets.
    pub resets_in: Duration,
}

/// Shared fixed-window counters for the rate limiter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Counts one request in `bucket`, opening a new window of length `window`
    /// if the previous one has elapsed.
    async fn hit(&self, bucket: &str, window: Duration) -> QuoteResult<WindowHit>;
}

/// A live bus subscription. Dropping it stops the forwarding tasks.
pub struct Subscription {
    rx: mpsc::Receiver<ChangeEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Wraps a receiver fed by `tasks`.
    pub fn new(rx: mpsc::Receiver<ChangeEvent>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { rx, tasks }
    }

    /// Waits for the next event. `None` once the bus connection is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
