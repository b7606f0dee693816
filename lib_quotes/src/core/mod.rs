//! # Core Pipeline Module
//!
//! The stages a quote passes through between ingress and live clients.
//!
//! ## Core Components:
//!
//! - **`coordinator`**: commits a value to the durable store, refreshes the
//!   cache and publishes the change event, in that order.
//! - **`reader`**: cache-aside read path with put-if-absent repopulation and
//!   optional negative caching.
//! - **`worker`**: queue consumers with leases, exponential backoff and a
//!   failure list.
//! - **`dispatcher`**: fans change events out to locally connected clients by
//!   key interest, sharing one allocation per event.
//! - **`circuit_breaker`**: closed/open/half-open state machine around the
//!   upstream price feed.
//! - **`rate_limiter`**: fixed-window admission gate per caller and route.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Fixed-window admission control.
pub mod rate_limiter;
/// Three-state breaker with a rolling outcome window.
pub mod circuit_breaker;
/// The ordered commit sequence.
pub mod coordinator;
/// Cache-aside reads.
pub mod reader;
/// Key-filtered, zero-copy fan-out to live clients.
pub mod dispatcher;
/// Job queue consumers.
pub mod worker;

// --- Public API Re-exports ---
pub use circuit_breaker::{BreakerState, CircuitBreaker, Rejection};
pub use coordinator::WriteCoordinator;
pub use dispatcher::{ClientId, Dispatcher, DEFAULT_CLIENT_BUFFER};
pub use rate_limiter::RateLimiter;
pub use reader::ReadPath;
pub use worker::{JobOutcome, WorkerPool};
