//! REST handlers for the discovery server

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::metrics;

use super::health::create_health_router;
use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Current collector membership
#[derive(Debug, Serialize)]
pub struct CollectorsResponse {
    pub namespace: String,
    pub count: usize,
    pub collectors: Vec<String>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the full router: health probes, membership and metrics
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/collectors", get(list_collectors))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .merge(create_health_router(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_collectors(State(state): State<AppState>) -> impl IntoResponse {
    let collectors = state.membership.snapshot();

    Json(ApiResponse::success(CollectorsResponse {
        namespace: state.settings.namespace.clone(),
        count: collectors.len(),
        collectors: collectors.names(),
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            format!("failed to encode metrics: {e}"),
        ),
    }
}
