//! # Pipeline Errors
//!
//! A single error type shared by every stage of the pipeline. Each variant maps
//! to a stable [`ErrorKind`] so HTTP handlers and job workers can branch on the
//! kind without matching message text.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the durable store, cache, bus, queue, feed and gate.
#[derive(Debug, Error)]
pub enum QuoteError {
    /// The write request was malformed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No record exists for the requested key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The durable store failed. Nothing downstream was touched.
    #[error("durable store failure: {0}")]
    Persistence(String),

    /// The cache layer could not be reached. Callers bypass the cache.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The event bus could not be reached. Publish failures are swallowed.
    #[error("event bus unavailable: {0}")]
    BusUnavailable(String),

    /// The job queue could not be reached. Ingress answers service-unavailable.
    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    /// The external price feed failed. Contained by the circuit breaker.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// The caller exhausted its request budget for the current window.
    #[error("rate limit exceeded: {max} requests per {}s, retry in {}s", window.as_secs(), retry_after.as_secs())]
    RateLimitExceeded {
        /// Length of the fixed window.
        window: Duration,
        /// Requests admitted per window.
        max: u64,
        /// Time until the caller's window resets.
        retry_after: Duration,
    },
}

/// Stable, matchable classification of a [`QuoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Persistence,
    CacheUnavailable,
    BusUnavailable,
    QueueUnavailable,
    UpstreamFetch,
    RateLimited,
}

impl ErrorKind {
    /// Wire name used in JSON error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Persistence => "persistence_error",
            ErrorKind::CacheUnavailable => "cache_unavailable",
            ErrorKind::BusUnavailable => "broadcast_unavailable",
            ErrorKind::QueueUnavailable => "queue_unavailable",
            ErrorKind::UpstreamFetch => "upstream_fetch_error",
            ErrorKind::RateLimited => "rate_limited",
        }
    }
}

impl QuoteError {
    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuoteError::Validation(_) => ErrorKind::Validation,
            QuoteError::NotFound(_) => ErrorKind::NotFound,
            QuoteError::Persistence(_) => ErrorKind::Persistence,
            QuoteError::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            QuoteError::BusUnavailable(_) => ErrorKind::BusUnavailable,
            QuoteError::QueueUnavailable(_) => ErrorKind::QueueUnavailable,
            QuoteError::UpstreamFetch(_) => ErrorKind::UpstreamFetch,
            QuoteError::RateLimitExceeded { .. } => ErrorKind::RateLimited,
        }
    }
}

/// Convenience alias used across the crate.
pub type QuoteResult<T> = Result<T, QuoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_distinct_wire_names() {
        let kinds = [
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Persistence,
            ErrorKind::CacheUnavailable,
            ErrorKind::BusUnavailable,
            ErrorKind::QueueUnavailable,
            ErrorKind::UpstreamFetch,
            ErrorKind::RateLimited,
        ];
        let names: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), kinds.len());
    }

    #[test]
    fn rate_limit_message_carries_retry_guidance() {
        let err = QuoteError::RateLimitExceeded {
            window: Duration::from_secs(900),
            max: 100,
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(
            err.to_string(),
            "rate limit exceeded: 100 requests per 900s, retry in 42s"
        );
    }
}
