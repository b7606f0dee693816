//! # Application Error
//!
//! Maps pipeline errors onto HTTP responses with a JSON body of the form
//! `{"error_type": <kind>, "message": <text>}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use lib_quotes::QuoteError;

/// Wrapper that lets handlers return `Result<_, AppError>` and use `?` on
/// [`QuoteError`].
#[derive(Debug)]
pub struct AppError(pub QuoteError);

impl From<QuoteError> for AppError {
    fn from(e: QuoteError) -> Self {
        AppError(e)
    }
}

impl AppError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            QuoteError::Validation(_) => StatusCode::BAD_REQUEST,
            QuoteError::NotFound(_) => StatusCode::NOT_FOUND,
            QuoteError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QuoteError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            QuoteError::Persistence(_)
            | QuoteError::CacheUnavailable(_)
            | QuoteError::BusUnavailable(_)
            | QuoteError::UpstreamFetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.0.kind().as_str();
        if status.is_server_error() {
            error!("{}: {}", kind, self.0);
        } else {
            warn!("{}: {}", kind, self.0);
        }

        match &self.0 {
            QuoteError::RateLimitExceeded {
                window,
                max,
                retry_after,
            } => {
                // Round up so clients never retry a fraction of a second too early.
                let retry_secs = retry_after.as_millis().div_ceil(1000) as u64;
                let body = json!({
                    "error_type": kind,
                    "message": self.0.to_string(),
                    "window_secs": window.as_secs(),
                    "max": max,
                    "retry_after_secs": retry_secs,
                });
                let mut response = (status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
                response
            }
            other => {
                let body = json!({
                    "error_type": kind,
                    "message": other.to_string(),
                });
                (status, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn statuses_follow_error_kind() {
        let cases = [
            (QuoteError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (QuoteError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (QuoteError::Persistence("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (QuoteError::QueueUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(AppError(err).status(), status);
        }
    }

    #[test]
    fn rate_limit_sets_retry_after_rounded_up() {
        let response = AppError(QuoteError::RateLimitExceeded {
            window: Duration::from_secs(900),
            max: 100,
            retry_after: Duration::from_millis(41_200),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}
