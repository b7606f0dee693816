//! # Logging Module
//!
//! Process-wide `tracing` setup shared by every binary.

/// Console plus daily-rolling JSON file subscriber.
pub mod tracing_setup;

pub use tracing_setup::{setup_logging, LogOptions};
