//! collector-discovery - Collector membership discovery for target allocation
//!
//! Keeps an up-to-date view of which telemetry collector replicas exist in a
//! namespace by listing them once and then following the cluster's watch
//! stream, renewing the watch session periodically.
//!
//! # Architecture
//!
//! - [`cluster`] - cluster API seam ([`cluster::ReplicaApi`]) and its HTTP client
//! - [`discovery`] - the list-then-watch loop and per-session event handling
//! - [`models`] - collector and membership types handed to callers
//! - [`server`] - health probes, membership and metrics endpoints
//! - [`config`] - configuration from environment and TOML
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - retry backoff
//!
//! # Example
//!
//! ```no_run
//! use collector_discovery::config::Config;
//! use collector_discovery::discovery::DiscoveryClient;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let selector = config.label_selector()?;
//!     let client = DiscoveryClient::from_config(&config)?;
//!
//!     client
//!         .watch(CancellationToken::new(), &selector, |collectors| {
//!             println!("collectors: {:?}", collectors.names());
//!             Ok(())
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod models;
pub mod server;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{KubeClient, LabelSelector, ReplicaApi};
    pub use crate::config::Config;
    pub use crate::discovery::{DiscoveryClient, DiscoveryHealth, SessionEnd, WatchSettings};
    pub use crate::error::{Error, Result};
    pub use crate::models::{Collector, MembershipSet};
}

// Direct re-exports for convenience
pub use models::{Collector, MembershipSet};
