//! # Quote Service
//!
//! Wiring shared by both binaries: configuration, backend bootstrap, the axum
//! router and the WebSocket downstream.

pub mod bootstrap;
pub mod config;
pub mod downstream;
pub mod error;
pub mod routes;
pub mod state;

pub use bootstrap::Backends;
pub use config::{load_config, Backend, Config};
pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
