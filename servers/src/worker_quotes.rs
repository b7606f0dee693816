//! # Quote Worker
//!
//! Drains the shared job queue: every leased job is committed to the durable
//! store, the cache and the event bus. Run as many of these as needed next to
//! `server_quotes`; they coordinate only through the queue leases.

#![forbid(unsafe_code)]

use std::time::Duration;

use futures_util::future::join_all;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lib_quotes::loggers::{setup_logging, LogOptions};
use servers::quote_logic::{load_config, Backend, Backends};

const APP_NAME: &str = "worker_quotes";

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
        "Configuration resolved: backend {:?}, queue {}",
        config.backend(),
        config.queue_name.as_deref().unwrap_or_default()
    );

    if config.backend() == Backend::Memory {
        warn!("In-process backends are private to this process; nothing else can enqueue work here");
    }

    let pipeline = config.pipeline()?;
    let backends = Backends::connect(&config, &pipeline).await?;

    let shutdown = Shutdown::default();
    let cancel = CancellationToken::new();

    let workers = backends.worker_pool(&pipeline).spawn(cancel.clone());
    shutdown.spawn_task_fn(move |guard| async move {
        guard.cancelled().await;
        info!("Signal received: finishing in-flight jobs");
        cancel.cancel();
        join_all(workers).await;
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
