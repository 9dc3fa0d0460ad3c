//! Health check endpoints for Kubernetes probes
//!
//! ```yaml
//! livenessProbe:
//!   httpGet:
//!     path: /health/live
//!     port: 8080
//!
//! readinessProbe:
//!   httpGet:
//!     path: /health/ready
//!     port: 8080
//!   periodSeconds: 5
//! ```
//!
//! Readiness fails until the initial listing has completed, and again
//! whenever discovery has been without a watch session for longer than the
//! configured limit.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::discovery::{DiscoveryHealth, HealthSnapshot};

use super::server::AppState;

// ============================================================================
// Health Status Types
// ============================================================================

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Degraded => StatusCode::OK, // between sessions is normal
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Liveness probe response
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
}

/// Readiness probe response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: Vec<ComponentHealth>,
}

/// Comprehensive health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: String,
    pub collectors: usize,
    pub discovery: HealthSnapshot,
    pub checks: Vec<ComponentHealth>,
}

// ============================================================================
// Health Check Router
// ============================================================================

/// Create health check router
pub fn create_health_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Evaluate the discovery watch loop against the inactivity limit
pub fn discovery_check(health: &DiscoveryHealth, max_inactive: std::time::Duration) -> ComponentHealth {
    let (status, message) = if !health.is_bootstrapped() {
        (HealthStatus::Unhealthy, "waiting for initial collector listing".to_string())
    } else if health.is_session_active() {
        (
            HealthStatus::Healthy,
            format!("watching, {} sessions opened", health.sessions_opened()),
        )
    } else if health.is_ready(max_inactive) {
        (HealthStatus::Degraded, "between watch sessions".to_string())
    } else {
        let gap = health.inactive_for().map(|d| d.as_secs()).unwrap_or_default();
        (
            HealthStatus::Unhealthy,
            format!("no active watch session for {gap}s"),
        )
    };

    ComponentHealth {
        name: "discovery".to_string(),
        status,
        message: Some(message),
    }
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Liveness probe handler
///
/// Returns 200 while the process is running.
async fn liveness_probe() -> impl IntoResponse {
    let response = LivenessResponse {
        status: HealthStatus::Healthy,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness probe handler
async fn readiness_probe(State(state): State<AppState>) -> impl IntoResponse {
    let check = discovery_check(&state.health, state.settings.max_inactive);
    let status = check.status;

    let response = ReadinessResponse {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks: vec![check],
    };

    (status.status_code(), Json(response))
}

/// Comprehensive health check handler
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let check = discovery_check(&state.health, state.settings.max_inactive);
    let status = check.status;

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        collectors: state.membership.snapshot().len(),
        discovery: state.health.snapshot(),
        checks: vec![check],
    };

    (status.status_code(), Json(response))
}

// ============================================================================
// Tests
// ============================================================================
