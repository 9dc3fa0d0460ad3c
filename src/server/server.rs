//! Health and metrics server
//!
//! Serves Kubernetes probes, the current collector membership and the
//! Prometheus scrape endpoint alongside a running discovery client.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::Router;
use thiserror::Error;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::discovery::DiscoveryHealth;
use crate::models::MembershipSet;

use super::api::create_router;

// ============================================================================
// Membership View
// ============================================================================

/// Latest membership snapshot, written by the discovery callback
#[derive(Debug, Clone, Default)]
pub struct MembershipView {
    inner: Arc<RwLock<MembershipSet>>,
}

impl MembershipView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot
    pub fn update(&self, collectors: MembershipSet) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = collectors;
    }

    /// Copy of the stored snapshot
    pub fn snapshot(&self) -> MembershipSet {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ============================================================================
// App State
// ============================================================================

/// Server settings derived from the main configuration
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_address: SocketAddr,
    pub enable_request_logging: bool,

    /// Longest gap between watch sessions before readiness fails
    pub max_inactive: Duration,

    /// Namespace shown in membership responses
    pub namespace: String,
}

impl From<&Config> for ServerSettings {
    fn from(config: &Config) -> Self {
        Self {
            bind_address: config.server.bind_address,
            enable_request_logging: config.server.enable_request_logging,
            max_inactive: Duration::from_secs(config.discovery.max_inactive_secs),
            namespace: config.cluster.namespace.clone(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Membership as last reported to the callback
    pub membership: MembershipView,

    /// Discovery session health
    pub health: DiscoveryHealth,

    /// Server start time
    pub start_time: Instant,

    /// Configuration
    pub settings: ServerSettings,
}

impl AppState {
    pub fn new(membership: MembershipView, health: DiscoveryHealth, settings: ServerSettings) -> Self {
        Self {
            membership,
            health,
            start_time: Instant::now(),
            settings,
        }
    }
}

// ============================================================================
// Discovery Server
// ============================================================================

/// HTTP surface for a running discovery client
pub struct DiscoveryServer {
    state: AppState,
}

impl DiscoveryServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let router = create_router(self.state.clone());

        if self.state.settings.enable_request_logging {
            router.layer(TraceLayer::new_for_http())
        } else {
            router
        }
    }

    /// Serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.state.settings.bind_address;

        tracing::info!("Starting discovery server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Discovery server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind: {0}")]
    Bind(String),

    /// Server error
    #[error("Server error: {0}")]
    Serve(String),
}

// ============================================================================
// Tests
// ============================================================================
