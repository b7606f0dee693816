//! # Data Ingestors Module
//!
//! Clients that bring external market data into the pipeline. Ingestors never
//! write to the store themselves; everything they produce is enqueued as a
//! write job.
//!
//! ## Contained Modules:
//! - **`price_poller`**: a scheduled, breaker-guarded REST poller that
//!   refreshes the tracked metals and coins.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Scheduled refresh of tracked symbols from a REST price feed.
pub mod price_poller;

pub use price_poller::{start_schedule, CycleReport, PriceFeed, PricePoller};
#[cfg(feature = "retrieve")]
pub use price_poller::GoldApiFeed;
