//! # Backend Bootstrap
//!
//! Builds the shared backend handles for the configured [`Backend`]: Postgres
//! plus Redis for multi-instance deployments, or the in-process backends for a
//! single instance and for tests.

use std::sync::Arc;

use anyhow::Context;
use redis::aio::ConnectionManager;
use tracing::info;

use lib_quotes::backends::memory::{MemoryBus, MemoryCache, MemoryCounters, MemoryQueue, MemoryStore};
use lib_quotes::backends::{CacheLayer, CounterStore, DurableStore, EventBus, JobQueue};
use lib_quotes::configs::PipelineConfig;
use lib_quotes::connections::{PostgresStore, RedisBus, RedisCache, RedisCounters, RedisQueue};
use lib_quotes::core::{WorkerPool, WriteCoordinator};

use super::config::{Backend, Config};

/// The five shared resources, type-erased.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DurableStore>,
    pub cache: Arc<dyn CacheLayer>,
    pub bus: Arc<dyn EventBus>,
    pub queue: Arc<dyn JobQueue>,
    pub counters: Arc<dyn CounterStore>,
}

impl Backends {
    /// In-process backends. Nothing is shared with other processes.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            cache: Arc::new(MemoryCache::new()),
            bus: Arc::new(MemoryBus::new()),
            queue: Arc::new(MemoryQueue::new()),
            counters: Arc::new(MemoryCounters::new()),
        }
    }

    /// Connects the backends selected by `config`.
    ///
    /// For `redis` this creates the `data` table when missing and opens one
    /// managed Redis connection shared by cache, bus, queue and counters.
    pub async fn connect(config: &Config, pipeline: &PipelineConfig) -> anyhow::Result<Self> {
        if config.backend() == Backend::Memory {
            info!("Using in-process backends");
            return Ok(Self::memory());
        }

        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required for the redis backend")?;
        let redis_url = config
            .redis_url
            .as_deref()
            .context("REDIS_URL is required for the redis backend")?;
        let queue_name = config.queue_name.as_deref().unwrap_or("metal-jobs");

        let store = PostgresStore::connect(database_url, config.db_max_connections.unwrap_or(10))?;
        store.migrate().await.context("Failed to prepare the data table")?;
        info!("Durable store ready");

        let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis");

        let op_timeout = pipeline.cache.op_timeout;
        Ok(Self {
            store: Arc::new(store),
            cache: Arc::new(RedisCache::new(conn.clone(), op_timeout)),
            bus: Arc::new(RedisBus::new(client, conn.clone(), op_timeout)),
            queue: Arc::new(RedisQueue::new(conn.clone(), queue_name)),
            counters: Arc::new(RedisCounters::new(conn, op_timeout)),
        })
    }

    /// A write coordinator over these backends.
    pub fn coordinator(&self, pipeline: &PipelineConfig) -> WriteCoordinator {
        WriteCoordinator::new(
            self.store.clone(),
            self.cache.clone(),
            self.bus.clone(),
            pipeline.cache.clone(),
        )
    }

    /// A worker pool draining the queue through a coordinator over these backends.
    pub fn worker_pool(&self, pipeline: &PipelineConfig) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            self.queue.clone(),
            self.coordinator(pipeline),
            pipeline.worker.clone(),
        ))
    }
}
