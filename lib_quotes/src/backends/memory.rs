//! # In-Process Backends
//!
//! Implementations of every backend trait that live inside one process. They
//! follow the same contracts as the Redis/Postgres backends (TTL expiry, lease
//! redelivery, lazy window reset) and use `tokio::time::Instant`, so tests can
//! drive them with a paused clock.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::warn;

use super::{
    CacheLayer, CachedValue, CounterStore, DurableStore, EventBus, JobQueue, Subscription,
    WindowHit,
};
use crate::error::QuoteResult;
use crate::model::{ChangeEvent, FailedJob, Job, Record};

/// Failed jobs retained by [`MemoryQueue`].
const FAILED_RETENTION: usize = 1000;
const CHANNEL_CAPACITY: usize = 1024;

/// Ordered map standing in for the `data` table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn find(&self, key: &str) -> QuoteResult<Option<String>> {
        let rows = self.rows.read().expect("store lock poisoned");
        Ok(rows.get(key).cloned())
    }

    async fn upsert(&self, key: &str, value: &str) -> QuoteResult<()> {
        let mut rows = self.rows.write().expect("store lock poisoned");
        rows.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn all(&self) -> QuoteResult<Vec<Record>> {
        let rows = self.rows.read().expect("store lock poisoned");
        Ok(rows
            .iter()
            .map(|(key, value)| Record {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }
}

/// TTL map standing in for the Redis cache. Expired entries are dropped on access.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (CachedValue, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get(&self, key: &str) -> QuoteResult<Option<CachedValue>> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((entry, expires_at)) if Instant::now() < *expires_at => Ok(Some(entry.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, entry: &CachedValue, ttl: Duration) -> QuoteResult<()> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(key.to_string(), (entry.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        entry: &CachedValue,
        ttl: Duration,
    ) -> QuoteResult<bool> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if now < *expires_at {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (entry.clone(), now + ttl));
        Ok(true)
    }
}

/// One tokio broadcast channel per key.
#[derive(Debug, Default)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, key: &str) -> broadcast::Sender<ChangeEvent> {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: &ChangeEvent) -> QuoteResult<()> {
        // No listeners is not an error: delivery is best effort.
        let _ = self.sender(&event.key).send(event.clone());
        Ok(())
    }

    async fn subscribe(&self, keys: &[String]) -> QuoteResult<Subscription> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let unique: HashSet<&String> = keys.iter().collect();
        let mut tasks = Vec::with_capacity(unique.len());

        for key in unique {
            let mut channel = self.sender(key).subscribe();
            let tx = tx.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match channel.recv().await {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Subscriber on '{}' lagged, {} events skipped", key, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        Ok(Subscription::new(rx, tasks))
    }
}

#[derive(Debug)]
struct QueuedJob {
    job: Job,
    visible_at: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<String, QueuedJob>,
    failed: VecDeque<FailedJob>,
    next_seq: u64,
}

/// Lease-based queue kept in process memory. FIFO among visible jobs.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, key: &str, value: &str) -> QuoteResult<Job> {
        let job = Job::new(key, value);
        let mut state = self.state.lock().expect("queue lock poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            job.id.clone(),
            QueuedJob {
                job: job.clone(),
                visible_at: Instant::now(),
                seq,
            },
        );
        Ok(job)
    }

    async fn reserve(&self, visibility: Duration) -> QuoteResult<Option<Job>> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let now = Instant::now();
        let next = state
            .jobs
            .values_mut()
            .filter(|queued| queued.visible_at <= now)
            .min_by_key(|queued| (queued.visible_at, queued.seq));

        Ok(next.map(|queued| {
            queued.visible_at = now + visibility;
            queued.job.attempts += 1;
            queued.job.clone()
        }))
    }

    async fn ack(&self, job: &Job) -> QuoteResult<()> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.jobs.remove(&job.id);
        Ok(())
    }

    async fn retry_later(&self, job: &Job, delay: Duration) -> QuoteResult<()> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        if let Some(queued) = state.jobs.get_mut(&job.id) {
            queued.visible_at = Instant::now() + delay;
        }
        Ok(())
    }

    async fn fail(&self, job: &Job, reason: &str) -> QuoteResult<()> {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.jobs.remove(&job.id);
        state.failed.push_front(FailedJob {
            job: job.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now().timestamp_millis(),
        });
        state.failed.truncate(FAILED_RETENTION);
        Ok(())
    }

    async fn failed(&self) -> QuoteResult<Vec<FailedJob>> {
        let state = self.state.lock().expect("queue lock poisoned");
        Ok(state.failed.iter().cloned().collect())
    }

    async fn pending(&self) -> QuoteResult<u64> {
        let state = self.state.lock().expect("queue lock poisoned");
        Ok(state.jobs.len() as u64)
    }
}

/// Fixed-window counters keyed by bucket, reset lazily on the first hit after expiry.
/// Opening a new window also drops every other bucket whose window has run out.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    windows: Mutex<HashMap<String, CounterWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct CounterWindow {
    ends_at: Instant,
    count: u64,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.windows.lock().expect("counter lock poisoned").len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounters {
    async fn hit(&self, bucket: &str, window: Duration) -> QuoteResult<WindowHit> {
        let mut windows = self.windows.lock().expect("counter lock poisoned");
        let now = Instant::now();

        let live = windows.get(bucket).is_some_and(|w| now < w.ends_at);
        if !live {
            windows.retain(|_, w| now < w.ends_at);
        }

        let slot = windows
            .entry(bucket.to_string())
            .or_insert(CounterWindow {
                ends_at: now + window,
                count: 0,
            });
        slot.count += 1;
        Ok(WindowHit {
            count: slot.count,
            resets_in: slot.ends_at.saturating_duration_since(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        let entry = CachedValue::Present("1950".into());
        cache.put("Gold", &entry, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("Gold").await.unwrap(), Some(entry.clone()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("Gold").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn put_if_absent_keeps_live_entries() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.put("Gold", &CachedValue::Present("new".into()), ttl).await.unwrap();
        let written = cache
            .put_if_absent("Gold", &CachedValue::Present("old".into()), ttl)
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(
            cache.get("Gold").await.unwrap(),
            Some(CachedValue::Present("new".into()))
        );
    }

    #[tokio::test]
    async fn store_upsert_overwrites() {
        let store = MemoryStore::new();
        store.upsert("Gold", "1").await.unwrap();
        store.upsert("Gold", "2").await.unwrap();
        assert_eq!(store.find("Gold").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn leased_jobs_reappear_after_visibility_timeout() {
        let queue = MemoryQueue::new();
        queue.enqueue("Gold", "1950").await.unwrap();

        let first = queue.reserve(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(first.attempts, 1);
        assert!(queue.reserve(Duration::from_secs(30)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = queue.reserve(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.attempts, 2);

        queue.ack(&again).await.unwrap();
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queue_is_fifo_among_visible_jobs() {
        let queue = MemoryQueue::new();
        queue.enqueue("a", "1").await.unwrap();
        queue.enqueue("b", "2").await.unwrap();
        let visibility = Duration::from_secs(30);
        assert_eq!(queue.reserve(visibility).await.unwrap().unwrap().key, "a");
        assert_eq!(queue.reserve(visibility).await.unwrap().unwrap().key, "b");
    }

    #[tokio::test]
    async fn failed_jobs_are_listed_newest_first() {
        let queue = MemoryQueue::new();
        let a = queue.enqueue("a", "1").await.unwrap();
        let b = queue.enqueue("b", "2").await.unwrap();
        queue.fail(&a, "boom a").await.unwrap();
        queue.fail(&b, "boom b").await.unwrap();

        let failed = queue.failed().await.unwrap();
        assert_eq!(failed[0].job.key, "b");
        assert_eq!(failed[1].reason, "boom a");
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bus_delivers_only_subscribed_keys() {
        let bus = MemoryBus::new();
        let mut silver = bus.subscribe(&["Silver".to_string()]).await.unwrap();

        bus.publish(&ChangeEvent::now("Gold", "1950")).await.unwrap();
        bus.publish(&ChangeEvent::now("Silver", "24")).await.unwrap();

        let event = silver.recv().await.unwrap();
        assert_eq!(event.key, "Silver");
        assert_eq!(event.value, "24");
    }

    #[tokio::test(start_paused = true)]
    async fn counters_reset_lazily() {
        let counters = MemoryCounters::new();
        let window = Duration::from_secs(60);
        assert_eq!(counters.hit("ip", window).await.unwrap().count, 1);
        assert_eq!(counters.hit("ip", window).await.unwrap().count, 2);
        assert_eq!(counters.hit("other", window).await.unwrap().count, 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        let hit = counters.hit("ip", window).await.unwrap();
        assert_eq!(hit.count, 1);
        assert_eq!(hit.resets_in, window);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_buckets_are_dropped() {
        let counters = MemoryCounters::new();
        let window = Duration::from_secs(60);
        for n in 0..50 {
            counters.hit(&format!("caller-{}", n), window).await.unwrap();
        }
        assert_eq!(counters.bucket_count(), 50);

        tokio::time::advance(Duration::from_secs(61)).await;
        counters.hit("caller-late", window).await.unwrap();
        assert_eq!(counters.bucket_count(), 1);

        // Live windows survive a sweep.
        counters.hit("caller-next", window).await.unwrap();
        assert_eq!(counters.bucket_count(), 2);
        assert_eq!(counters.hit("caller-late", window).await.unwrap().count, 2);
    }
}
