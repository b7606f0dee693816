//! # Application State
//!
//! Everything the HTTP and WebSocket handlers share, built once at startup.

use std::sync::Arc;

use lib_quotes::backends::JobQueue;
use lib_quotes::configs::PipelineConfig;
use lib_quotes::core::{Dispatcher, RateLimiter, ReadPath, WriteCoordinator};

use super::bootstrap::Backends;

#[derive(Clone)]
pub struct AppState {
    /// Synchronous write path behind `/api/write`.
    pub coordinator: WriteCoordinator,
    pub reader: Arc<ReadPath>,
    pub queue: Arc<dyn JobQueue>,
    pub limiter: Arc<RateLimiter>,
    /// Local WebSocket clients.
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Assembles the handler state on top of the given backends.
    pub fn new(backends: &Backends, config: &PipelineConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            coordinator: backends.coordinator(config),
            reader: Arc::new(ReadPath::new(
                backends.store.clone(),
                backends.cache.clone(),
                config.cache.clone(),
            )),
            queue: backends.queue.clone(),
            limiter: Arc::new(RateLimiter::new(
                backends.counters.clone(),
                config.rate_limit.clone(),
            )),
            dispatcher,
        }
    }
}
