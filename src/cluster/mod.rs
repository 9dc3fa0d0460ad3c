//! Cluster API access for replica discovery
//!
//! - [`api`] - the [`ReplicaApi`] list+watch seam and its error type
//! - [`client`] - [`KubeClient`], the HTTP implementation
//! - [`selector`] - equality-based label selectors
//! - [`types`] - replica and watch-event types

pub mod api;
pub mod client;
pub mod selector;
pub mod types;

pub use api::{ApiError, EventStream, ReplicaApi};
pub use client::KubeClient;
pub use selector::{LabelSelector, SelectorError};
pub use types::{EventObject, EventType, Replica, ReplicaList, Status, WatchEvent, WatchParams};
