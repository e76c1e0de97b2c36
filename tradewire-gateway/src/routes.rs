//! HTTP routes of the gateway.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::session::ws_handler;
use crate::state::GatewayState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Human readable status line
    pub message: &'static str,
    /// Service version
    pub version: &'static str,
    /// Live WebSocket connections
    pub connections: usize,
    /// Authenticated WebSocket connections
    pub authenticated: usize,
}

/// Health check handler.
///
/// GET /health
pub async fn health_check(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "active",
        message: "Trading Platform gateway is running",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry().connection_count(),
        authenticated: state.registry().authenticated_count(),
    })
}

/// Creates the gateway router.
pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(&state.config.path, get(ws_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
