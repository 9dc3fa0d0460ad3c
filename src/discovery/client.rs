//! Collector discovery client
//!
//! [`DiscoveryClient`] lists the collector replicas in one namespace, hands
//! the initial membership to a callback, then keeps that membership current
//! through consecutive watch sessions until the caller cancels or the client
//! is closed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::health::DiscoveryHealth;
use super::processor::notify;
use super::session::{live_collectors, WatchSession, WatchSettings};
use super::shutdown::Shutdown;
use crate::cluster::{KubeClient, LabelSelector, ReplicaApi};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::MembershipSet;

/// Watches collector replicas and reports membership changes
///
/// # Example
///
/// ```ignore
/// let client = DiscoveryClient::from_config(&config)?;
/// let selector = config.label_selector()?;
///
/// client
///     .watch(ctx, &selector, |collectors| {
///         println!("{} collectors", collectors.len());
///         Ok(())
///     })
///     .await?;
/// ```
pub struct DiscoveryClient<A: ?Sized = KubeClient> {
    api: Arc<A>,
    namespace: String,
    settings: WatchSettings,
    close: CancellationToken,
    health: DiscoveryHealth,
}

impl DiscoveryClient<KubeClient> {
    /// Build a client talking to the cluster API described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let api = KubeClient::new(&config.cluster)
            .map_err(Error::Init)?
            .with_event_buffer(config.discovery.event_buffer);

        Ok(Self::new(
            Arc::new(api),
            config.cluster.namespace.clone(),
            WatchSettings::from(&config.discovery),
        ))
    }
}

impl<A: ReplicaApi + ?Sized> DiscoveryClient<A> {
    /// Create a client over `api`, registering the discovery metrics if
    /// nothing has yet
    pub fn new(api: Arc<A>, namespace: impl Into<String>, settings: WatchSettings) -> Self {
        if let Err(e) = metrics::init_metrics() {
            warn!(error = %e, "Discovery metrics unavailable");
        }

        Self {
            api,
            namespace: namespace.into(),
            settings,
            close: CancellationToken::new(),
            health: DiscoveryHealth::new(),
        }
    }

    /// Namespace being watched
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// Shared health handle, updated as sessions open and close
    pub fn health(&self) -> DiscoveryHealth {
        self.health.clone()
    }

    /// Watch collector membership until `ctx` is cancelled or the client is closed
    ///
    /// The callback receives the full membership once after the initial
    /// listing, then again after every Added or Deleted event. Errors and
    /// panics from the callback are logged and do not stop discovery. The
    /// `opentelemetry_allocator_collectors_discovered` gauge follows the
    /// same membership.
    ///
    /// Returns `Ok(())` on cancellation or close. Fails with [`Error::List`]
    /// if the initial listing fails and with [`Error::SessionEstablish`] if
    /// a watch session cannot be opened within the retry budget.
    pub async fn watch<F>(
        &self,
        ctx: CancellationToken,
        selector: &LabelSelector,
        mut on_change: F,
    ) -> Result<()>
    where
        F: FnMut(MembershipSet) -> anyhow::Result<()> + Send,
    {
        let shutdown = Shutdown::new(ctx, self.close.clone());
        if let Some(end) = shutdown.check() {
            info!(reason = end.reason().unwrap_or(""), "Collector discovery stopped before start");
            return Ok(());
        }

        info!(
            namespace = %self.namespace,
            selector = %selector,
            "Starting collector discovery"
        );

        let list = tokio::select! {
            biased;
            end = shutdown.wait() => {
                info!(reason = end.reason().unwrap_or(""), "Collector discovery stopped during initial listing");
                return Ok(());
            }
            result = self.api.list(&self.namespace, selector) => result.map_err(|e| {
                error!(error = %e, namespace = %self.namespace, "Failed to list collector replicas");
                Error::List(e)
            })?,
        };

        let collectors = live_collectors(&list);
        metrics::set_collectors_discovered(collectors.len());
        self.health.mark_bootstrapped();
        info!(collectors = collectors.len(), "Discovered initial collectors");
        notify(&mut on_change, &collectors);

        let mut session = WatchSession::new(
            &*self.api,
            &self.namespace,
            selector,
            &self.settings,
            shutdown,
            &self.health,
            collectors,
            list.resource_version,
            on_change,
        );

        loop {
            let end = session.run().await?;
            if let Some(reason) = end.reason() {
                info!(reason, "Collector pod watch event stopped");
                return Ok(());
            }
        }
    }

    /// Stop any running or future watch
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        if !self.close.is_cancelled() {
            info!(namespace = %self.namespace, "Closing collector discovery client");
        }
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.cluster.api_server = "http://127.0.0.1:6443".to_string();
        config.cluster.namespace = "observability".to_string();
        config.discovery.session_timeout_secs = 42;

        let client = DiscoveryClient::from_config(&config).unwrap();

        assert_eq!(client.namespace(), "observability");
        assert_eq!(client.settings().session_timeout.as_secs(), 42);
        assert!(!client.is_closed());
    }

    #[test]
    fn test_from_config_rejects_bad_server() {
        let mut config = Config::default();
        config.cluster.api_server = "not a url".to_string();

        let result = DiscoveryClient::from_config(&config);

        assert!(matches!(result, Err(Error::Init(_))));
    }

    #[test]
    fn test_new_registers_metrics() {
        let mut config = Config::default();
        config.cluster.api_server = "http://127.0.0.1:6443".to_string();
        let _client = DiscoveryClient::from_config(&config).unwrap();

        assert!(metrics::metrics_initialized());
        assert!(metrics::collectors_discovered().is_some());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut config = Config::default();
        config.cluster.api_server = "http://127.0.0.1:6443".to_string();
        let client = DiscoveryClient::from_config(&config).unwrap();

        client.close();
        client.close();

        assert!(client.is_closed());
    }
}
