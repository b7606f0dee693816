//! # Data Retrieval Module
//!
//! HTTP access to external services, with retries, timeouts and JSON handling
//! in one place so feed clients only deal with paths and payloads.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware` with exponential-backoff retries of transient
//!   failures.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
