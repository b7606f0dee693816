//! # Connections Module
//!
//! Backends shared by every instance: the PostgreSQL durable store and the
//! Redis cache, rate-limit counters, event bus and job queue.

/// PostgreSQL connection pooling and the `data` table.
pub mod db_postgres;

/// Redis cache entries and rate-limit counters.
pub mod cache_redis;

/// Redis pub/sub event bus, one channel per key.
pub mod pubsub_redis;

/// Redis lease-based job queue.
pub mod queue_redis;

pub use cache_redis::{RedisCache, RedisCounters};
pub use db_postgres::{DbError, PostgresStore};
pub use pubsub_redis::RedisBus;
pub use queue_redis::RedisQueue;
