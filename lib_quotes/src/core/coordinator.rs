//! # Write Coordinator
//!
//! Turns an accepted write into a durable record, a fresh cache entry and a
//! change event. The steps run strictly in order:
//!
//! 1. look up the existing record,
//! 2. upsert the record,
//! 3. overwrite the cache entry with the configured TTL,
//! 4. publish a [`ChangeEvent`] on the key's channel.
//!
//! A failure in step 1 or 2 aborts the commit before anything downstream is
//! touched. Steps 3 and 4 are best effort: their failures are logged and the
//! commit still succeeds.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backends::{CacheLayer, CachedValue, DurableStore, EventBus};
use crate::configs::CacheConfig;
use crate::error::{QuoteError, QuoteResult};
use crate::model::{ChangeEvent, CommitOutcome};

/// Runs the ordered commit sequence against shared backend handles.
#[derive(Clone)]
pub struct WriteCoordinator {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn CacheLayer>,
    bus: Arc<dyn EventBus>,
    config: CacheConfig,
}

impl WriteCoordinator {
    /// Creates a coordinator over the given backends.
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn CacheLayer>,
        bus: Arc<dyn EventBus>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            config,
        }
    }

    /// Commits `value` under `key`, publishing before returning.
    ///
    /// Events of one caller's sequence of commits to a key are published in
    /// commit order.
    pub async fn commit(&self, key: &str, value: &str) -> QuoteResult<CommitOutcome> {
        let outcome = self.persist(key, value).await?;
        self.refresh_cache(key, value).await;
        publish(self.bus.as_ref(), &ChangeEvent::now(key, value)).await;
        Ok(outcome)
    }

    /// Commits `value` under `key` and returns as soon as the cache is
    /// refreshed. The change event is published by a detached task.
    pub async fn commit_respond_first(
        &self,
        key: &str,
        value: &str,
    ) -> QuoteResult<CommitOutcome> {
        let outcome = self.persist(key, value).await?;
        self.refresh_cache(key, value).await;

        let bus = Arc::clone(&self.bus);
        let event = ChangeEvent::now(key, value);
        tokio::spawn(async move {
            publish(bus.as_ref(), &event).await;
        });
        Ok(outcome)
    }

    async fn persist(&self, key: &str, value: &str) -> QuoteResult<CommitOutcome> {
        let existing = self.store.find(key).await.map_err(as_persistence)?;
        self.store.upsert(key, value).await.map_err(as_persistence)?;

        let outcome = match existing {
            Some(_) => CommitOutcome::Updated,
            None => CommitOutcome::Created,
        };
        info!("{}: {} = {}", outcome, key, value);
        Ok(outcome)
    }

    async fn refresh_cache(&self, key: &str, value: &str) {
        let entry = CachedValue::Present(value.to_string());
        if let Err(e) = self.cache.put(key, &entry, self.config.ttl).await {
            warn!("Cache refresh for '{}' failed, continuing: {}", key, e);
        }
    }
}

async fn publish(bus: &dyn EventBus, event: &ChangeEvent) {
    match bus.publish(event).await {
        Ok(()) => debug!("Published change on channel '{}'", event.key),
        Err(e) => warn!("Publish on channel '{}' failed, continuing: {}", event.key, e),
    }
}

fn as_persistence(err: QuoteError) -> QuoteError {
    match err {
        QuoteError::Persistence(_) => err,
        other => QuoteError::Persistence(other.to_string()),
    }
}
