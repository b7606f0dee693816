//! # Read Path
//!
//! Cache-aside lookups. A cache hit never touches the durable store. On a miss
//! the store is consulted and the cache is repopulated with put-if-absent, so a
//! commit racing with the read keeps its fresher entry. A negative entry that
//! this read path does not honor is overwritten once the store has the key. An
//! unreachable cache is bypassed for the rest of the read.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::{CacheLayer, CachedValue, DurableStore};
use crate::configs::CacheConfig;
use crate::error::QuoteResult;
use crate::model::Record;

enum Lookup {
    Miss,
    /// A negative entry while negative caching is off.
    IgnoredNegative,
    Unavailable,
}

/// Serves single-key and bulk reads.
#[derive(Clone)]
pub struct ReadPath {
    store: Arc<dyn DurableStore>,
    cache: Arc<dyn CacheLayer>,
    config: CacheConfig,
}

impl ReadPath {
    /// Creates a read path over the given backends.
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn CacheLayer>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Returns the current value of `key`, or `None` if no record exists.
    pub async fn read(&self, key: &str) -> QuoteResult<Option<String>> {
        let lookup = match self.cache.get(key).await {
            Ok(Some(CachedValue::Present(value))) => {
                debug!("Cache hit for '{}'", key);
                return Ok(Some(value));
            }
            Ok(Some(CachedValue::Absent)) if self.config.negative_ttl.is_some() => {
                debug!("Negative cache hit for '{}'", key);
                return Ok(None);
            }
            Ok(Some(CachedValue::Absent)) => Lookup::IgnoredNegative,
            Ok(None) => Lookup::Miss,
            Err(e) => {
                warn!("Cache lookup for '{}' failed, reading from store: {}", key, e);
                Lookup::Unavailable
            }
        };

        let found = self.store.find(key).await?;

        match (lookup, &found) {
            (Lookup::Unavailable, _) => {}
            (Lookup::IgnoredNegative, Some(value)) => {
                let entry = CachedValue::Present(value.clone());
                if let Err(e) = self.cache.put(key, &entry, self.config.ttl).await {
                    warn!("Replacing negative entry for '{}' failed: {}", key, e);
                }
            }
            (Lookup::IgnoredNegative, None) => {}
            (Lookup::Miss, _) => self.repopulate(key, found.as_deref()).await,
        }

        Ok(found)
    }

    async fn repopulate(&self, key: &str, found: Option<&str>) {
        let entry = match found {
            Some(value) => Some((CachedValue::Present(value.to_string()), self.config.ttl)),
            None => self
                .config
                .negative_ttl
                .map(|ttl| (CachedValue::Absent, ttl)),
        };
        if let Some((entry, ttl)) = entry {
            if let Err(e) = self.cache.put_if_absent(key, &entry, ttl).await {
                warn!("Cache repopulation for '{}' failed: {}", key, e);
            }
        }
    }

    /// Returns every record straight from the durable store.
    pub async fn all(&self) -> QuoteResult<Vec<Record>> {
        self.store.all().await
    }
}
