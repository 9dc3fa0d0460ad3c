//! Configuration management for collector discovery
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Everything the watch loop needs (namespace
//! included) is resolved here and handed to constructors explicitly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::LabelSelector;
use crate::utils::RetryConfig;

/// In-cluster service account token
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// In-cluster service account CA bundle
pub const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Default session lifetime before the watch is renewed (15 minutes)
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 15 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cluster API access
    pub cluster: ClusterConfig,

    /// Membership discovery behavior
    pub discovery: DiscoveryConfig,

    /// Health and metrics server
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cluster API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// API server base URL
    pub api_server: String,

    /// Namespace the collectors run in
    pub namespace: String,

    /// Bearer token file (optional)
    pub token_path: Option<PathBuf>,

    /// CA bundle for the API server certificate (optional)
    pub ca_cert_path: Option<PathBuf>,

    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
}

/// Discovery-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Label selector identifying collector replicas (`k=v,k2=v2`)
    pub label_selector: String,

    /// Maximum lifetime of one watch session in seconds
    pub session_timeout_secs: u64,

    /// Capacity of the per-session event channel
    pub event_buffer: usize,

    /// Longest tolerated gap without an active session before readiness fails
    pub max_inactive_secs: u64,

    /// Backoff for establishing watch sessions
    pub retry: RetryConfig,
}

/// Health and metrics server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable request logging
    pub enable_request_logging: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_server: String::from("https://kubernetes.default.svc"),
            namespace: String::from("default"),
            token_path: None,
            ca_cert_path: None,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            label_selector: String::from(
                "app.kubernetes.io/component=opentelemetry-collector",
            ),
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            event_buffer: crate::cluster::client::DEFAULT_EVENT_BUFFER,
            max_inactive_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_request_logging: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset variables fall back to defaults. Inside a pod the API server
    /// address and service account credentials are picked up automatically.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let (Ok(host), Ok(port)) = (
            std::env::var("KUBERNETES_SERVICE_HOST"),
            std::env::var("KUBERNETES_SERVICE_PORT"),
        ) {
            config.cluster.api_server = if host.contains(':') {
                format!("https://[{host}]:{port}")
            } else {
                format!("https://{host}:{port}")
            };

            if Path::new(SERVICE_ACCOUNT_TOKEN).exists() {
                config.cluster.token_path = Some(PathBuf::from(SERVICE_ACCOUNT_TOKEN));
            }
            if Path::new(SERVICE_ACCOUNT_CA).exists() {
                config.cluster.ca_cert_path = Some(PathBuf::from(SERVICE_ACCOUNT_CA));
            }
        }

        if let Ok(server) = std::env::var("DISCOVERY_API_SERVER") {
            config.cluster.api_server = server;
        }

        if let Ok(namespace) = std::env::var("OTELCOL_NAMESPACE") {
            config.cluster.namespace = namespace;
        }

        if let Ok(path) = std::env::var("DISCOVERY_TOKEN_PATH") {
            config.cluster.token_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("DISCOVERY_CA_CERT_PATH") {
            config.cluster.ca_cert_path = Some(PathBuf::from(path));
        }

        if let Ok(selector) = std::env::var("COLLECTOR_SELECTOR") {
            config.discovery.label_selector = selector;
        }

        if let Some(secs) = env_parse::<u64>("DISCOVERY_SESSION_TIMEOUT_SECS")? {
            config.discovery.session_timeout_secs = secs;
        }

        if let Some(retries) = env_parse::<u32>("DISCOVERY_MAX_RETRIES")? {
            config.discovery.retry.max_retries = retries;
        }

        if let Some(addr) = env_parse::<SocketAddr>("DISCOVERY_BIND_ADDRESS")? {
            config.server.bind_address = addr;
        }

        if let Ok(level) = std::env::var("DISCOVERY_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(format) = std::env::var("DISCOVERY_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cluster.namespace.trim().is_empty() {
            anyhow::bail!("namespace must not be empty");
        }

        if self.cluster.api_server.trim().is_empty() {
            anyhow::bail!("api_server must not be empty");
        }

        let selector = self.label_selector()?;
        if selector.is_empty() {
            anyhow::bail!("label_selector must select at least one label");
        }

        if self.discovery.session_timeout_secs == 0 {
            anyhow::bail!("session_timeout_secs must be greater than 0");
        }

        if self.discovery.event_buffer == 0 {
            anyhow::bail!("event_buffer must be greater than 0");
        }

        self.discovery
            .retry
            .validate()
            .map_err(|reason| anyhow::anyhow!("invalid retry settings: {reason}"))?;

        Ok(())
    }

    /// Parsed collector label selector
    pub fn label_selector(&self) -> Result<LabelSelector> {
        self.discovery
            .label_selector
            .parse()
            .with_context(|| format!("Invalid label selector '{}'", self.discovery.label_selector))
    }

    /// Get session timeout as Duration
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.session_timeout_secs)
    }
}

/// Parse an optional environment variable, failing on malformed values
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: '{value}'")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let mut config = Config::default();
        config.cluster.namespace = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_selector_rejected() {
        let mut config = Config::default();
        config.discovery.label_selector = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_selector_rejected() {
        let mut config = Config::default();
        config.discovery.label_selector = "app".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_session_timeout_rejected() {
        let mut config = Config::default();
        config.discovery.session_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.session_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [cluster]
            namespace = "observability"

            [discovery]
            label_selector = "app=collector"
            session_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster.namespace, "observability");
        assert_eq!(config.discovery.session_timeout_secs, 60);
        assert_eq!(config.discovery.retry, RetryConfig::default());
        assert_eq!(config.logging.format, "text");
        assert!(config.validate().is_ok());
    }
}
