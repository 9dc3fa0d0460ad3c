//! Cluster API abstraction
//!
//! Discovery only needs two calls from the control plane: a point-in-time
//! listing and a streaming watch. [`ReplicaApi`] captures that seam so the
//! watch loop can run against the HTTP client or an in-memory double.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::selector::LabelSelector;
use super::types::{ReplicaList, WatchEvent, WatchParams};

/// Receiving half of a watch subscription
///
/// The producer closes the channel when the underlying stream ends.
pub type EventStream = mpsc::Receiver<WatchEvent>;

/// List and watch access to workload replicas
#[async_trait]
pub trait ReplicaApi: Send + Sync {
    /// List all replicas in `namespace` matching `selector`
    async fn list(&self, namespace: &str, selector: &LabelSelector)
        -> Result<ReplicaList, ApiError>;

    /// Open a watch on replicas in `namespace` matching `selector`
    async fn watch(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        params: WatchParams,
    ) -> Result<EventStream, ApiError>;
}

/// Errors raised by the cluster API layer
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the API server
    #[error("API server returned {code}: {message}")]
    Status { code: u16, message: String },

    /// The requested resource version has been compacted away
    #[error("Resource version expired: {0}")]
    Gone(String),

    /// Response body could not be decoded
    #[error("Decoding error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid client configuration
    #[error("Invalid cluster configuration: {0}")]
    Config(String),

    /// Reading credentials from disk failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Check if a retry could plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Gone(_) | Self::Io(_) => true,
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            Self::Decode(_) | Self::Config(_) => false,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone(_))
    }
}
