//! Backends that fail on demand, for exercising error paths in unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::memory::MemoryStore;
use super::{CacheLayer, CachedValue, DurableStore, EventBus, Subscription};
use crate::error::{QuoteError, QuoteResult};
use crate::model::{ChangeEvent, Record};

/// Wraps a [`MemoryStore`], counting reads and failing writes while `broken` is set.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub broken: AtomicBool,
    pub finds: AtomicUsize,
    /// Number of upcoming upserts that fail before the store recovers.
    pub failing_upserts: AtomicUsize,
}

impl FlakyStore {
    pub fn broken() -> Self {
        let store = Self::default();
        store.broken.store(true, Ordering::SeqCst);
        store
    }

    pub fn failing_upserts(n: usize) -> Self {
        let store = Self::default();
        store.failing_upserts.store(n, Ordering::SeqCst);
        store
    }

    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn find(&self, key: &str) -> QuoteResult<Option<String>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(QuoteError::Persistence("connection refused".into()));
        }
        self.inner.find(key).await
    }

    async fn upsert(&self, key: &str, value: &str) -> QuoteResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(QuoteError::Persistence("connection refused".into()));
        }
        let pending = self.failing_upserts.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_upserts.store(pending - 1, Ordering::SeqCst);
            return Err(QuoteError::Persistence("deadlock detected".into()));
        }
        self.inner.upsert(key, value).await
    }

    async fn all(&self) -> QuoteResult<Vec<Record>> {
        self.inner.all().await
    }
}

/// A cache that is always unreachable.
pub struct DownCache;

#[async_trait]
impl CacheLayer for DownCache {
    async fn get(&self, _key: &str) -> QuoteResult<Option<CachedValue>> {
        Err(QuoteError::CacheUnavailable("timed out".into()))
    }

    async fn put(&self, _key: &str, _entry: &CachedValue, _ttl: Duration) -> QuoteResult<()> {
        Err(QuoteError::CacheUnavailable("timed out".into()))
    }

    async fn put_if_absent(
        &self,
        _key: &str,
        _entry: &CachedValue,
        _ttl: Duration,
    ) -> QuoteResult<bool> {
        Err(QuoteError::CacheUnavailable("timed out".into()))
    }
}

/// A bus that is always unreachable.
pub struct DownBus;

#[async_trait]
impl EventBus for DownBus {
    async fn publish(&self, _event: &ChangeEvent) -> QuoteResult<()> {
        Err(QuoteError::BusUnavailable("connection reset".into()))
    }

    async fn subscribe(&self, _keys: &[String]) -> QuoteResult<Subscription> {
        Err(QuoteError::BusUnavailable("connection reset".into()))
    }
}
