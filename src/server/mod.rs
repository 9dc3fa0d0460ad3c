//! HTTP surface for collector discovery
//!
//! - `/health/live`, `/health/ready`, `/health` - Kubernetes probes
//! - `/api/collectors` - current membership snapshot
//! - `/metrics` - Prometheus text exposition

pub mod api;
pub mod health;
#[allow(clippy::module_inception)]
pub mod server;

pub use api::{create_router, ApiResponse, CollectorsResponse};
pub use health::{discovery_check, ComponentHealth, HealthStatus};
pub use server::{AppState, DiscoveryServer, MembershipView, ServerError, ServerSettings};
