//! Collector membership discovery
//!
//! - [`client`] - [`DiscoveryClient`], the list-then-watch entry point
//! - [`session`] - session establishment, backoff and resync
//! - [`processor`] - per-session event handling
//! - [`health`] - readiness state shared with the health server

pub mod client;
pub mod health;
pub mod processor;
pub mod session;
mod shutdown;

pub use client::DiscoveryClient;
pub use health::{DiscoveryHealth, HealthSnapshot};
pub use processor::SessionEnd;
pub use session::WatchSettings;
