//! Unified error handling for collector discovery
//!
//! This module provides a single `Error` enum for everything the discovery
//! client can return to its caller, while keeping the cluster-API error
//! ([`ApiError`]) available as the underlying source.
//!
//! Transient stream faults (disconnects, session expiry, stray payloads) never
//! surface here; the watch loop absorbs and retries them. Only failures the
//! caller has to decide on are represented.
//!
//! # Usage
//!
//! ```rust,ignore
//! use collector_discovery::error::Error;
//!
//! match client.watch(ctx, &selector, on_change).await {
//!     Ok(()) => tracing::info!("discovery stopped"),
//!     Err(e) if e.is_recoverable() => tracing::warn!(error = %e, "restarting discovery"),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use thiserror::Error;

pub use crate::cluster::api::ApiError;

/// Unified error type for the collector-discovery crate
#[derive(Error, Debug)]
pub enum Error {
    /// The cluster API client could not be constructed
    #[error("Failed to initialize cluster client: {0}")]
    Init(#[source] ApiError),

    /// The bootstrap listing failed
    #[error("Failed to list collector replicas: {0}")]
    List(#[source] ApiError),

    /// No watch session could be opened within the retry budget, or opening
    /// failed with an error retrying cannot fix
    #[error("Unable to establish collector watch after {attempts} attempts: {source}")]
    SessionEstablish {
        attempts: u32,
        #[source]
        source: ApiError,
    },
}

impl Error {
    /// Check if this error is recoverable (the caller may retry `watch`)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Init(_) => false,
            Self::List(e) => e.is_recoverable(),
            Self::SessionEstablish { source, .. } => source.is_recoverable(),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_recoverable() {
        let transient = Error::List(ApiError::Status {
            code: 503,
            message: "unavailable".into(),
        });
        assert!(transient.is_recoverable());

        let forbidden = Error::List(ApiError::Status {
            code: 403,
            message: "pods is forbidden".into(),
        });
        assert!(!forbidden.is_recoverable());

        let exhausted = Error::SessionEstablish {
            attempts: 3,
            source: ApiError::Status {
                code: 502,
                message: "bad gateway".into(),
            },
        };
        assert!(exhausted.is_recoverable());

        let init = Error::Init(ApiError::Config("bad url".into()));
        assert!(!init.is_recoverable());
    }

    #[test]
    fn test_session_establish_message() {
        let err = Error::SessionEstablish {
            attempts: 4,
            source: ApiError::Gone("too old".into()),
        };
        assert_eq!(
            err.to_string(),
            "Unable to establish collector watch after 4 attempts: Resource version expired: too old"
        );
    }
}
