//! # Rate Limiter Gate
//!
//! Fixed-window admission control keyed by caller identity and route. Counters
//! live in a [`CounterStore`] shared by every instance, and each bucket resets
//! lazily on the first request after its window has elapsed.
//!
//! If the counter store cannot be reached the gate admits the request and logs
//! a warning.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::CounterStore;
use crate::configs::RateLimitConfig;
use crate::error::{QuoteError, QuoteResult};

/// Admission gate in front of the write endpoints.
#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Creates a gate over the shared counters.
    pub fn new(counters: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { counters, config }
    }

    /// The window and limit this gate enforces.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts one request from `identity` on `route`.
    ///
    /// Returns [`QuoteError::RateLimitExceeded`] once the caller has used up
    /// the window, with the time left until the window resets.
    pub async fn check(&self, identity: &str, route: &str) -> QuoteResult<()> {
        let bucket = format!("ratelimit:{}:{}", route, identity);
        match self.counters.hit(&bucket, self.config.window).await {
            Ok(hit) if hit.count <= self.config.max => {
                debug!("{} admitted ({}/{})", bucket, hit.count, self.config.max);
                Ok(())
            }
            Ok(hit) => Err(QuoteError::RateLimitExceeded {
                window: self.config.window,
                max: self.config.max,
                retry_after: hit.resets_in,
            }),
            Err(e) => {
                warn!("Rate limit counters unavailable, admitting {}: {}", bucket, e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryCounters;
    use crate::backends::WindowHit;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::time::Duration;

    struct DownCounters;

    #[async_trait]
    impl CounterStore for DownCounters {
        async fn hit(&self, _bucket: &str, _window: Duration) -> QuoteResult<WindowHit> {
            Err(QuoteError::CacheUnavailable("connection refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hundred_and_first_request_is_rejected_until_the_window_ends() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounters::new()), RateLimitConfig::default());
        for _ in 0..100 {
            limiter.check("10.0.0.1", "/api/add").await.unwrap();
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        let err = limiter.check("10.0.0.1", "/api/add").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        match err {
            QuoteError::RateLimitExceeded { max, retry_after, .. } => {
                assert_eq!(max, 100);
                assert_eq!(retry_after, Duration::from_secs(14 * 60));
            }
            other => panic!("unexpected error: {other}"),
        }

        tokio::time::advance(Duration::from_secs(14 * 60)).await;
        limiter.check("10.0.0.1", "/api/add").await.unwrap();
    }

    #[tokio::test]
    async fn buckets_are_per_identity_and_route() {
        let config = RateLimitConfig {
            window: Duration::from_secs(60),
            max: 1,
        };
        let limiter = RateLimiter::new(Arc::new(MemoryCounters::new()), config);

        limiter.check("a", "/api/add").await.unwrap();
        assert!(limiter.check("a", "/api/add").await.is_err());
        limiter.check("b", "/api/add").await.unwrap();
        limiter.check("a", "/api/write").await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_counters_fail_open() {
        let limiter = RateLimiter::new(Arc::new(DownCounters), RateLimitConfig::default());
        for _ in 0..200 {
            limiter.check("a", "/api/add").await.unwrap();
        }
    }
}
