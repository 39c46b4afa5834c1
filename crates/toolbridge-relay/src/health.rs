//! Health check endpoint.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::{Deserialize, Serialize};

use crate::state::RelayState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Live bridged connections.
    pub active_connections: usize,
    /// Command started per connection.
    pub command: String,
}

/// GET /health
pub async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_connections: state.active_connections(),
        command: state.config().command_line(),
    })
}

/// Create health check routes.
pub fn health_routes() -> Router<RelayState> {
    Router::new().route("/health", get(health))
}
