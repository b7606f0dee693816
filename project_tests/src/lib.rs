//! # Integration Test Fixtures
//!
//! Shared helpers for the tests under `tests/`: an in-process pipeline wired
//! like `server_quotes` on the memory backends, and a local price feed.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use async_trait::async_trait;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc::Receiver;

use lib_quotes::backends::DurableStore;
use lib_quotes::configs::PipelineConfig;
use lib_quotes::core::{Dispatcher, WorkerPool};
use lib_quotes::{ChangeEvent, QuoteError, QuoteResult, Record};
use servers::quote_logic::{build_router, AppState, Backends};

/// Everything a test needs to drive the pipeline end to end.
pub struct Pipeline {
    pub backends: Backends,
    pub state: AppState,
    pub router: Router,
    pub workers: Arc<WorkerPool>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Pipeline {
    /// Wires a pipeline on fresh memory backends.
    pub fn memory(config: PipelineConfig) -> Self {
        Self::with_backends(Backends::memory(), config)
    }

    /// Wires a pipeline on the given backends.
    pub fn with_backends(backends: Backends, config: PipelineConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new());
        let state = AppState::new(&backends, &config, Arc::clone(&dispatcher));
        Self {
            router: build_router(state.clone()),
            workers: backends.worker_pool(&config),
            backends,
            state,
            dispatcher,
        }
    }

    /// Runs jobs until the queue has nothing visible. Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        while let Ok(Some(_)) = self.workers.process_one().await {
            handled += 1;
        }
        handled
    }
}

/// Prices served by [`spawn_feed`], by symbol. Unknown symbols answer 500.
pub type FeedPrices = Arc<HashMap<String, f64>>;

async fn price_handler(State(prices): State<FeedPrices>, Path(symbol): Path<String>) -> Response {
    match prices.get(&symbol) {
        Some(price) => Json(json!({ "name": symbol, "price": price, "symbol": symbol })).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, format!("no quote for {}", symbol)).into_response(),
    }
}

async fn slow_handler() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "{}"
}

/// Serves `GET /price/{symbol}` on an ephemeral local port and returns the
/// base URL. `GET /slow/price/{symbol}` never answers in time.
pub async fn spawn_feed(prices: &[(&str, f64)]) -> anyhow::Result<String> {
    let prices: FeedPrices = Arc::new(prices.iter().map(|(s, p)| (s.to_string(), *p)).collect());
    let app = Router::new()
        .route("/price/{symbol}", get(price_handler))
        .route("/slow/price/{symbol}", get(slow_handler))
        .with_state(prices);

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{}", addr))
}

/// Waits up to five seconds for the next event on `key`, skipping others.
///
/// # Panics
/// When no such event arrives in time or the client was dropped.
pub async fn wait_for_key(rx: &mut Receiver<Arc<ChangeEvent>>, key: &str) -> Arc<ChangeEvent> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("dispatcher dropped the client");
            if event.key == key {
                return event;
            }
        }
    })
    .await
    .expect("no event within 5s")
}

/// A durable store whose database is down.
pub struct FailingStore;

#[async_trait]
impl DurableStore for FailingStore {
    async fn find(&self, _key: &str) -> QuoteResult<Option<String>> {
        Err(QuoteError::Persistence("connection refused".into()))
    }

    async fn upsert(&self, _key: &str, _value: &str) -> QuoteResult<()> {
        Err(QuoteError::Persistence("connection refused".into()))
    }

    async fn all(&self) -> QuoteResult<Vec<Record>> {
        Err(QuoteError::Persistence("connection refused".into()))
    }
}
