//! # Quote Server
//!
//! Serves the HTTP API and the `/ws` live feed, relays change events from the
//! event bus to local WebSocket clients, and refreshes the tracked symbols
//! from the price feed on a schedule. With `--embedded-workers true` it also
//! drains the job queue, otherwise run `worker_quotes` next to it.
//!
//! Shutdown is driven by `tokio-graceful`: Ctrl-C or SIGTERM stops accepting
//! connections, cancels the background tasks and waits up to 10 seconds.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lib_quotes::core::Dispatcher;
use lib_quotes::ingestors::{start_schedule, GoldApiFeed, PricePoller};
use lib_quotes::loggers::{setup_logging, LogOptions};
use servers::quote_logic::{build_router, load_config, AppState, Backends};

const APP_NAME: &str = "server_quotes";
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Logging is not up yet; a broken config file surfaces on stderr.
    let config = load_config()?;

    let log_options = LogOptions::new(
        config.log_dir.clone().unwrap_or_else(|| "./logs".into()),
        config.log_level.clone().unwrap_or_else(|| "info".to_string()),
        APP_NAME,
    );
    let _log_guard = match setup_logging(&log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration resolved: backend {:?}, port {}",
        config.backend(),
        config.port.unwrap_or_default()
    );

    let pipeline = config.pipeline()?;
    let backends = Backends::connect(&config, &pipeline).await?;
    let dispatcher = Arc::new(Dispatcher::new());
    let state = AppState::new(&backends, &pipeline, Arc::clone(&dispatcher));

    let shutdown = Shutdown::default();
    let cancel = CancellationToken::new();

    // Background tasks watch the token, the graceful guard flips it.
    let bridge = cancel.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        guard.cancelled().await;
        info!("Signal received: initiate graceful shutdown");
        bridge.cancel();
    });

    let tracked_keys: Vec<String> = pipeline.poller.symbols.iter().map(|s| s.name.clone()).collect();
    shutdown.spawn_task(Arc::clone(&dispatcher).pump(
        Arc::clone(&backends.bus),
        tracked_keys,
        RESUBSCRIBE_DELAY,
        cancel.clone(),
    ));

    if config.embedded_workers.unwrap_or(false) {
        let workers = backends.worker_pool(&pipeline).spawn(cancel.clone());
        shutdown.spawn_task(async move {
            join_all(workers).await;
        });
    }

    let feed = GoldApiFeed::new(&pipeline.poller.feed_base_url, pipeline.breaker.call_timeout)?;
    let poller = Arc::new(PricePoller::new(
        Arc::new(feed),
        Arc::clone(&backends.queue),
        pipeline.breaker.clone(),
        pipeline.poller.clone(),
    ));
    let mut scheduler = start_schedule(poller)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start the price refresh schedule: {:?}", e))?;
    shutdown.spawn_task_fn(move |guard| async move {
        guard.cancelled().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!("Price refresh scheduler did not stop cleanly: {:?}", e);
        }
    });

    let port = config.port.unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("{} listening on {}", APP_NAME, addr);

    let app = build_router(state);
    shutdown.spawn_task_fn(move |guard| async move {
        let signal = guard.clone();
        let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("HTTP server failed: {}", e);
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => info!(
            "shutdown: gracefully {}s after shutdown signal received",
            elapsed.as_secs_f64()
        ),
        Err(e) => warn!("shutdown: forcefully due to timeout: {}", e),
    }

    info!("Bye!");
    Ok(())
}
