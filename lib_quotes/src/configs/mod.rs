//! # Configuration Modules
//!
//! Plain configuration structs for each pipeline stage. Binaries fill them from
//! CLI flags, environment variables and an optional JSON file; everything in
//! here only carries values and their defaults.

/// Tunables for the cache, gate, breaker, worker pool and poller.
pub mod pipeline;

pub use pipeline::{
    CacheConfig, CircuitBreakerConfig, PipelineConfig, PollerConfig, RateLimitConfig,
    WorkerConfig,
};
