//! The price poller and the HTTP feed client against a local feed server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use lib_quotes::configs::{CircuitBreakerConfig, PipelineConfig, PollerConfig};
use lib_quotes::core::BreakerState;
use lib_quotes::ingestors::{CycleReport, GoldApiFeed, PriceFeed, PricePoller};
use lib_quotes::retrieve::ApiClient;
use lib_quotes::TrackedSymbol;
use project_tests::{spawn_feed, Pipeline};

fn poller_config(base_url: String, symbols: &[(&str, &str)]) -> PollerConfig {
    PollerConfig {
        symbols: symbols.iter().map(|(n, s)| TrackedSymbol::new(*n, *s)).collect(),
        throttle: Duration::ZERO,
        feed_base_url: base_url,
        ..PollerConfig::default()
    }
}

#[tokio::test]
async fn feed_client_reads_prices_and_reports_failures() {
    let base = spawn_feed(&[("XAU", 2345.6)]).await.unwrap();
    let client = ApiClient::new(&base, None, 0, Duration::from_secs(2)).unwrap();

    let reply: Value = client.get("price/XAU").await.unwrap().into_data().unwrap();
    assert_eq!(reply["price"], 2345.6);

    let err = client
        .get::<Value>("price/NOPE")
        .await
        .unwrap()
        .into_data()
        .unwrap_err();
    assert_eq!(err.to_string(), "HTTP 500: no quote for NOPE");

    let feed = GoldApiFeed::new(&base, Duration::from_secs(2)).unwrap();
    assert_eq!(feed.fetch("XAU").await.unwrap(), "2345.6");
    assert!(feed.fetch("NOPE").await.is_err());
}

#[tokio::test]
async fn refresh_cycle_lands_in_the_store_through_the_queue() {
    let base = spawn_feed(&[("XAU", 2345.6), ("BTC", 67000.5)]).await.unwrap();
    let pipeline = Pipeline::memory(PipelineConfig::default());

    let feed = Arc::new(GoldApiFeed::new(&base, Duration::from_secs(2)).unwrap());
    let poller = PricePoller::new(
        feed,
        Arc::clone(&pipeline.backends.queue),
        CircuitBreakerConfig::default(),
        poller_config(base, &[("Gold", "XAU"), ("Bitcoin", "BTC"), ("Silver", "XAG")]),
    );

    let report = poller.run_cycle().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            fetched: 2,
            fallbacks: 1,
            enqueued: 3
        }
    );

    // Nothing is committed until a worker runs.
    assert_eq!(pipeline.backends.store.find("Gold").await.unwrap(), None);
    assert_eq!(pipeline.drain().await, 3);

    let store = &pipeline.backends.store;
    assert_eq!(store.find("Gold").await.unwrap().as_deref(), Some("2345.6"));
    assert_eq!(store.find("Bitcoin").await.unwrap().as_deref(), Some("67000.5"));
    assert_eq!(store.find("Silver").await.unwrap().as_deref(), Some("N/A"));
}

#[tokio::test]
async fn slow_feed_opens_the_breaker() {
    let base = spawn_feed(&[]).await.unwrap();
    let slow_base = format!("{}/slow", base);
    let pipeline = Pipeline::memory(PipelineConfig::default());

    let feed = Arc::new(GoldApiFeed::new(&slow_base, Duration::from_secs(10)).unwrap());
    let breaker = CircuitBreakerConfig {
        call_timeout: Duration::from_millis(200),
        ..CircuitBreakerConfig::default()
    };
    let poller = PricePoller::new(
        feed,
        Arc::clone(&pipeline.backends.queue),
        breaker,
        poller_config(slow_base, &[("Gold", "XAU"), ("Silver", "XAG"), ("Copper", "HG")]),
    );

    let started = Instant::now();
    let report = poller.run_cycle().await.unwrap();

    // Only the first call reaches the feed; the rest short-circuit.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.fallbacks, 3);
    assert_eq!(report.enqueued, 3);
    assert_eq!(poller.breaker().state(), BreakerState::Open);
}
