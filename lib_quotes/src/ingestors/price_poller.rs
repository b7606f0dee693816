//! # Price Poller
//!
//! Periodically refreshes every tracked symbol from an external price feed.
//!
//! ## Key Design Principles:
//! - **Breaker-Guarded**: every fetch goes through one [`CircuitBreaker`] shared
//!   by all symbols. When the feed misbehaves the breaker opens and the rest
//!   of the cycle falls back to a placeholder value without touching the
//!   network.
//! - **Queue Only**: each outcome, real price or fallback, is enqueued as a
//!   write job. The poller never commits directly, so refreshes go through
//!   the same retry and fan-out path as client writes.
//! - **Throttled**: consecutive symbols of one cycle are spaced by a fixed
//!   delay to stay friendly with the upstream.
//! - **No Overlap**: a cycle that starts while the previous one is still
//!   running is skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};

use crate::backends::JobQueue;
use crate::configs::{CircuitBreakerConfig, PollerConfig};
use crate::core::circuit_breaker::CircuitBreaker;
use crate::error::{QuoteError, QuoteResult};

/// A source of current prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Returns the current price of `symbol` as text.
    async fn fetch(&self, symbol: &str) -> QuoteResult<String>;
}

/// Renders the `price` field of a feed reply. Numbers and strings are accepted.
pub fn price_text(reply: &Value) -> Option<String> {
    match reply.get("price")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Feed client for `GET {base}/price/{symbol}` endpoints such as gold-api.com.
#[cfg(feature = "retrieve")]
pub struct GoldApiFeed {
    client: crate::retrieve::ApiClient,
}

#[cfg(feature = "retrieve")]
impl GoldApiFeed {
    /// Builds a feed client without retries: the breaker sees every failure.
    pub fn new(base_url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: crate::retrieve::ApiClient::new(base_url, None, 0, timeout)?,
        })
    }
}

#[cfg(feature = "retrieve")]
#[async_trait]
impl PriceFeed for GoldApiFeed {
    async fn fetch(&self, symbol: &str) -> QuoteResult<String> {
        let reply = self
            .client
            .get::<Value>(&format!("price/{}", symbol))
            .await
            .and_then(|response| response.into_data())
            .map_err(|e| QuoteError::UpstreamFetch(format!("{}: {}", symbol, e)))?;

        price_text(&reply).ok_or_else(|| {
            QuoteError::UpstreamFetch(format!("{}: reply has no usable 'price' field", symbol))
        })
    }
}

/// # Cycle Report
///
/// What one refresh cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Symbols whose real price was fetched.
    pub fetched: usize,
    /// Symbols that fell back to the placeholder value.
    pub fallbacks: usize,
    /// Jobs successfully enqueued.
    pub enqueued: usize,
}

/// Scheduled fetcher for the tracked symbols.
pub struct PricePoller {
    feed: Arc<dyn PriceFeed>,
    queue: Arc<dyn JobQueue>,
    breaker: CircuitBreaker,
    config: PollerConfig,
    running: Mutex<()>,
}

impl PricePoller {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        queue: Arc<dyn JobQueue>,
        breaker: CircuitBreakerConfig,
        config: PollerConfig,
    ) -> Self {
        Self {
            feed,
            queue,
            breaker: CircuitBreaker::new("price-feed", breaker),
            config,
            running: Mutex::new(()),
        }
    }

    /// The breaker guarding the feed.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// # Run Cycle
    ///
    /// Fetches every tracked symbol once and enqueues the results. Returns
    /// `None` without doing anything if another cycle is still running.
    /// Upstream and queue failures are logged, never returned.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Previous price refresh still running, skipping this cycle");
            return None;
        };

        info!("Refreshing {} tracked symbols", self.config.symbols.len());
        let mut report = CycleReport::default();

        for (i, tracked) in self.config.symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.throttle).await;
            }

            let value = match self.breaker.call(|| self.feed.fetch(&tracked.symbol)).await {
                Ok(price) => {
                    info!("{}: {}", tracked.name, price);
                    report.fetched += 1;
                    price
                }
                Err(e) => {
                    warn!("{} ({}) falls back to '{}': {}", tracked.name, tracked.symbol, self.config.fallback, e);
                    report.fallbacks += 1;
                    self.config.fallback.clone()
                }
            };

            match self.queue.enqueue(&tracked.name, &value).await {
                Ok(_) => report.enqueued += 1,
                Err(e) => error!("Could not enqueue refresh of {}: {}", tracked.name, e),
            }
        }

        info!(
            "Price refresh done: {} fetched, {} fallbacks, {} enqueued",
            report.fetched, report.fallbacks, report.enqueued
        );
        Some(report)
    }
}

/// Runs one cycle right away, then one every `interval` on a cron scheduler.
///
/// The returned scheduler keeps the job alive; call `shutdown` on it to stop.
pub async fn start_schedule(poller: Arc<PricePoller>) -> Result<JobScheduler, JobSchedulerError> {
    let interval = poller.config.interval;
    let scheduler = JobScheduler::new().await?;

    let repeated = Arc::clone(&poller);
    let job = Job::new_repeated_async(interval, move |_id, _scheduler| {
        let poller = Arc::clone(&repeated);
        Box::pin(async move {
            poller.run_cycle().await;
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;

    tokio::spawn(async move {
        poller.run_cycle().await;
    });

    info!("Price refresh scheduled every {:?}", interval);
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryQueue;
    use crate::model::TrackedSymbol;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct StubFeed {
        prices: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl StubFeed {
        fn with(prices: &[(&str, &str)]) -> Self {
            Self {
                prices: prices.iter().map(|(s, p)| (s.to_string(), p.to_string())).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceFeed for StubFeed {
        async fn fetch(&self, symbol: &str) -> QuoteResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prices
                .get(symbol)
                .cloned()
                .ok_or_else(|| QuoteError::UpstreamFetch(format!("{}: HTTP 503", symbol)))
        }
    }

    fn config(symbols: &[(&str, &str)]) -> PollerConfig {
        PollerConfig {
            symbols: symbols.iter().map(|(n, s)| TrackedSymbol::new(*n, *s)).collect(),
            ..PollerConfig::default()
        }
    }

    async fn queued_values(queue: &MemoryQueue) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Some(job) = queue.reserve(Duration::from_secs(30)).await.unwrap() {
            out.push((job.key.clone(), job.value.clone()));
            queue.ack(&job).await.unwrap();
        }
        out
    }

    #[test]
    fn price_accepts_numbers_and_strings() {
        assert_eq!(price_text(&json!({"price": 2345.6})).as_deref(), Some("2345.6"));
        assert_eq!(price_text(&json!({"price": "4.12"})).as_deref(), Some("4.12"));
        assert_eq!(price_text(&json!({"price": null})), None);
        assert_eq!(price_text(&json!({"name": "Gold"})), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_enqueues_every_symbol_with_throttle() {
        let feed = Arc::new(StubFeed::with(&[("XAU", "2345.6"), ("XAG", "29.1"), ("HG", "4.5")]));
        let queue = Arc::new(MemoryQueue::new());
        let poller = PricePoller::new(
            feed,
            queue.clone(),
            CircuitBreakerConfig::default(),
            config(&[("Gold", "XAU"), ("Silver", "XAG"), ("Copper", "HG")]),
        );

        let started = Instant::now();
        let report = poller.run_cycle().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(
            report,
            CycleReport {
                fetched: 3,
                fallbacks: 0,
                enqueued: 3
            }
        );
        assert_eq!(
            queued_values(&queue).await,
            vec![
                ("Gold".to_string(), "2345.6".to_string()),
                ("Silver".to_string(), "29.1".to_string()),
                ("Copper".to_string(), "4.5".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_falls_back_without_calling_the_feed() {
        let feed = Arc::new(StubFeed::default());
        let queue = Arc::new(MemoryQueue::new());
        let poller = PricePoller::new(
            feed.clone(),
            queue.clone(),
            CircuitBreakerConfig::default(),
            config(&[("Gold", "XAU"), ("Silver", "XAG"), ("Copper", "HG")]),
        );

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.fallbacks, 3);
        assert_eq!(report.enqueued, 3);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
        assert!(queued_values(&queue).await.iter().all(|(_, v)| v == "N/A"));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_cycles_are_skipped() {
        let feed = Arc::new(StubFeed::with(&[("XAU", "1"), ("XAG", "2")]));
        let queue = Arc::new(MemoryQueue::new());
        let poller = PricePoller::new(
            feed,
            queue.clone(),
            CircuitBreakerConfig::default(),
            config(&[("Gold", "XAU"), ("Silver", "XAG")]),
        );

        let (first, second) = tokio::join!(poller.run_cycle(), poller.run_cycle());
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(queue.pending().await.unwrap(), 2);
    }
}
