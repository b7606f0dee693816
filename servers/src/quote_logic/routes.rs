//! # HTTP Routes
//!
//! | Method/Path | Behavior |
//! |---|---|
//! | `POST /api/add` | validate, enqueue, answer 202 with the job id |
//! | `POST /api/write` | validate, commit synchronously |
//! | `GET /api/get/{id}` | cache-aside read, plain text |
//! | `GET /api/all` | every record as JSON |
//! | `GET /api/jobs/failed` | failure list as JSON |
//! | `GET /health` | liveness plus queue depth |
//! | `GET /ws` | live updates, see [`super::downstream`] |
//!
//! Every `/api` route is gated by the rate limiter, keyed by caller and route.

use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, MatchedPath, Path, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use lib_quotes::model::WriteRequest;
use lib_quotes::QuoteError;

use super::downstream::ws_handler;
use super::error::AppError;
use super::state::AppState;

/// Builds the full application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/add", post(add_handler))
        .route("/api/write", post(write_handler))
        .route("/api/get/{id}", get(get_handler))
        .route("/api/all", get(all_handler))
        .route("/api/jobs/failed", get(failed_jobs_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .merge(api)
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Caller identity: first `X-Forwarded-For` hop, else the peer address.
fn caller_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let identity = caller_identity(request.headers(), peer);
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    match state.limiter.check(&identity, &route).await {
        Ok(()) => next.run(request).await,
        Err(e) => AppError(e).into_response(),
    }
}

fn parse_write(payload: Result<Json<WriteRequest>, JsonRejection>) -> Result<(String, String), AppError> {
    let Json(request) = payload.map_err(|e| QuoteError::Validation(e.body_text()))?;
    Ok(request.validate()?)
}

async fn add_handler(
    State(state): State<AppState>,
    payload: Result<Json<WriteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let (key, value) = parse_write(payload)?;
    let job = state.queue.enqueue(&key, &value).await?;
    info!("Queued job {} for '{}'", job.id, key);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "jobId": job.id })),
    ))
}

async fn write_handler(
    State(state): State<AppState>,
    payload: Result<Json<WriteRequest>, JsonRejection>,
) -> Result<String, AppError> {
    let (key, value) = parse_write(payload)?;
    let outcome = state.coordinator.commit_respond_first(&key, &value).await?;
    Ok(format!("{} successfully!", outcome))
}

async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<String, AppError> {
    match state.reader.read(&id).await? {
        Some(value) => Ok(value),
        None => Err(QuoteError::NotFound(id).into()),
    }
}

async fn all_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reader.all().await?))
}

async fn failed_jobs_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.queue.failed().await?))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.pending().await {
        Ok(pending) => Json(json!({ "status": "ok", "pendingJobs": pending })),
        Err(e) => {
            warn!("Health check could not read the queue: {}", e);
            Json(json!({ "status": "degraded", "pendingJobs": null }))
        }
    }
}
