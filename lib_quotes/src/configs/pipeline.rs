//! # Pipeline Configuration
//!
//! One struct per stage, each with a `Default` carrying the production
//! defaults. [`PipelineConfig`] bundles them for the binaries.

use std::time::Duration;

use crate::model::TrackedSymbol;

/// Cache-aside behavior of the write coordinator and read path.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Lifetime of a positive cache entry.
    pub ttl: Duration,
    /// Lifetime of a negative entry. `None` disables negative caching.
    pub negative_ttl: Option<Duration>,
    /// Upper bound on a single cache round trip before the cache is bypassed.
    pub op_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            negative_ttl: None,
            op_timeout: Duration::from_millis(250),
        }
    }
}

impl CacheConfig {
    /// Set the positive entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable negative caching with the given TTL.
    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = Some(ttl);
        self
    }
}

/// Fixed-window admission control per caller and route.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub window: Duration,
    /// Requests admitted per window.
    pub max: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max: 100,
        }
    }
}

/// Breaker guarding the upstream price feed.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// A call running longer than this counts as a failure.
    pub call_timeout: Duration,
    /// Failure percentage above which the breaker opens.
    pub error_threshold_percentage: u32,
    /// Minimum calls in the rolling window before the breaker may open.
    pub volume_threshold: u32,
    /// Cooldown spent open before a trial call is allowed.
    pub reset_timeout: Duration,
    /// Age after which recorded outcomes stop counting.
    pub rolling_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(3),
            error_threshold_percentage: 50,
            volume_threshold: 1,
            reset_timeout: Duration::from_secs(10),
            rolling_window: Duration::from_secs(10),
        }
    }
}

/// Queue consumer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops.
    pub concurrency: usize,
    /// Deliveries allowed before a job is moved to the failure list.
    pub max_attempts: u32,
    /// Lease length of a reserved job.
    pub visibility_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Sleep between polls of an empty queue.
    pub idle_poll: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
            visibility_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            idle_poll: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    /// Delay before delivery `attempt + 1`, doubling from `backoff_base` and
    /// capped at `backoff_max`. `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Scheduled refresh of tracked symbols from the external feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub symbols: Vec<TrackedSymbol>,
    /// Time between refresh cycles.
    pub interval: Duration,
    /// Pause between two consecutive symbols of one cycle.
    pub throttle: Duration,
    /// Value enqueued when the feed cannot be used.
    pub fallback: String,
    pub feed_base_url: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            symbols: TrackedSymbol::defaults(),
            interval: Duration::from_secs(300),
            throttle: Duration::from_millis(500),
            fallback: "N/A".to_string(),
            feed_base_url: "https://api.gold-api.com".to_string(),
        }
    }
}

/// Everything the pipeline needs, grouped by stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: CircuitBreakerConfig,
    pub worker: WorkerConfig,
    pub poller: PollerConfig,
}
