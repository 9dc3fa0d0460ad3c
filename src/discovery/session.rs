//! Watch session lifecycle
//!
//! Opens watch sessions one after another, retrying establishment with
//! exponential backoff, and carries the resource version from one session
//! to the next so no event between sessions is missed. When the server
//! reports the resource version as expired, membership is re-listed before
//! the next session opens. Sessions that fail right after opening back off
//! on the same schedule as failed establishment.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::health::DiscoveryHealth;
use super::processor::{notify, EventProcessor, SessionEnd};
use super::shutdown::Shutdown;
use crate::cluster::{ApiError, EventStream, LabelSelector, ReplicaApi, ReplicaList, WatchParams};
use crate::config::{DiscoveryConfig, DEFAULT_SESSION_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Collector, MembershipSet};
use crate::utils::RetryConfig;

/// Sessions ending sooner than this without progress count as failed
const MIN_SESSION_LIFETIME: Duration = Duration::from_secs(1);

/// Session behavior for the watch loop
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSettings {
    /// Lifetime of one watch session before it is renewed
    pub session_timeout: Duration,

    /// Backoff used when a session cannot be established
    pub retry: RetryConfig,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }
}

impl From<&DiscoveryConfig> for WatchSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            session_timeout: Duration::from_secs(config.session_timeout_secs),
            retry: config.retry.clone(),
        }
    }
}

impl WatchSettings {
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Collectors in a listing, ignoring replicas already being torn down
pub(crate) fn live_collectors(list: &ReplicaList) -> MembershipSet {
    list.items
        .iter()
        .filter(|replica| !replica.is_terminating())
        .map(|replica| Collector::new(replica.name.as_str()))
        .collect()
}

enum Opened {
    Stream {
        events: EventStream,
        started: Instant,
    },
    Stopped(SessionEnd),
}

/// Membership state carried across consecutive watch sessions
pub(crate) struct WatchSession<'a, A: ?Sized, F> {
    api: &'a A,
    namespace: &'a str,
    selector: &'a LabelSelector,
    settings: &'a WatchSettings,
    shutdown: Shutdown,
    health: &'a DiscoveryHealth,
    collectors: MembershipSet,
    resource_version: Option<String>,
    needs_resync: bool,
    failed_sessions: u32,
    on_change: F,
}

impl<'a, A, F> WatchSession<'a, A, F>
where
    A: ReplicaApi + ?Sized,
    F: FnMut(MembershipSet) -> anyhow::Result<()>,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        api: &'a A,
        namespace: &'a str,
        selector: &'a LabelSelector,
        settings: &'a WatchSettings,
        shutdown: Shutdown,
        health: &'a DiscoveryHealth,
        collectors: MembershipSet,
        resource_version: Option<String>,
        on_change: F,
    ) -> Self {
        Self {
            api,
            namespace,
            selector,
            settings,
            shutdown,
            health,
            collectors,
            resource_version,
            needs_resync: false,
            failed_sessions: 0,
            on_change,
        }
    }

    /// Establish one session and process it until it ends
    ///
    /// Fails only when establishment exhausts its retries or hits an error
    /// that retrying cannot fix.
    pub(crate) async fn run(&mut self) -> Result<SessionEnd> {
        if let Some(end) = self.back_off().await {
            metrics::record_session_end(end.as_str());
            return Ok(end);
        }

        let (mut events, started) = match self.establish().await? {
            Opened::Stream { events, started } => (events, started),
            Opened::Stopped(end) => {
                metrics::record_session_end(end.as_str());
                return Ok(end);
            }
        };
        let deadline = started + self.settings.session_timeout;
        let start_version = self.resource_version.clone();

        self.health.session_started();
        info!(
            resource_version = self.resource_version.as_deref().unwrap_or(""),
            "Successfully started a collector pod watcher"
        );

        let end = EventProcessor::new(
            &mut self.collectors,
            &mut self.resource_version,
            &mut self.on_change,
        )
        .run(&mut events, deadline, &self.shutdown)
        .await;

        self.health.session_ended();
        metrics::record_session_end(end.as_str());
        if end.needs_resync() {
            self.needs_resync = true;
        }

        let progressed = self.resource_version != start_version;
        let healthy = match end {
            SessionEnd::Expired | SessionEnd::ResourceExpired => true,
            SessionEnd::StreamError { .. } => progressed,
            _ => progressed || started.elapsed() >= MIN_SESSION_LIFETIME,
        };
        if healthy {
            self.failed_sessions = 0;
        } else {
            self.failed_sessions = self.failed_sessions.saturating_add(1);
        }

        debug!(
            outcome = end.as_str(),
            collectors = self.collectors.len(),
            failed_sessions = self.failed_sessions,
            "Collector watch session ended"
        );
        Ok(end)
    }

    /// Wait before reopening after sessions that failed right away
    async fn back_off(&mut self) -> Option<SessionEnd> {
        if self.failed_sessions == 0 {
            return None;
        }

        let delay = self.settings.retry.calculate_delay(self.failed_sessions);
        debug!(
            failed_sessions = self.failed_sessions,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Delaying collector pod watcher after a failed session"
        );
        tokio::select! {
            biased;
            end = self.shutdown.wait() => Some(end),
            _ = tokio::time::sleep(delay) => None,
        }
    }

    async fn establish(&mut self) -> Result<Opened> {
        let shutdown = self.shutdown.clone();
        let max_attempts = self.settings.retry.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                let delay = self.settings.retry.calculate_delay(attempt);
                debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying collector pod watcher after delay"
                );
                tokio::select! {
                    biased;
                    end = shutdown.wait() => return Ok(Opened::Stopped(end)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            if let Some(end) = shutdown.check() {
                return Ok(Opened::Stopped(end));
            }

            let result = tokio::select! {
                biased;
                end = shutdown.wait() => return Ok(Opened::Stopped(end)),
                result = self.try_open() => result,
            };

            match result {
                Ok(opened) => return Ok(opened),
                Err(e) => {
                    metrics::record_establish_failure();
                    if e.is_gone() {
                        self.needs_resync = true;
                    }
                    attempt += 1;

                    if !e.is_recoverable() {
                        error!(attempts = attempt, error = %e, "Collector pod watcher failed permanently");
                        return Err(Error::SessionEstablish {
                            attempts: attempt,
                            source: e,
                        });
                    }

                    if attempt >= max_attempts {
                        error!(attempts = attempt, error = %e, "Giving up on collector pod watcher");
                        return Err(Error::SessionEstablish {
                            attempts: attempt,
                            source: e,
                        });
                    }

                    warn!(
                        attempt,
                        max_retries = self.settings.retry.max_retries,
                        error = %e,
                        "Unable to create collector pod watcher"
                    );
                }
            }
        }
    }

    async fn try_open(&mut self) -> std::result::Result<Opened, ApiError> {
        if self.needs_resync {
            self.resync().await?;
        }

        let started = Instant::now();
        let params = WatchParams {
            resource_version: self.resource_version.clone(),
            timeout: self.settings.session_timeout,
        };
        let events = self.api.watch(self.namespace, self.selector, params).await?;

        Ok(Opened::Stream { events, started })
    }

    /// Re-list membership after the resource version expired
    async fn resync(&mut self) -> std::result::Result<(), ApiError> {
        info!("Re-listing collectors after resource version expired");
        let list = self.api.list(self.namespace, self.selector).await?;

        self.resource_version = list.resource_version.clone();
        self.needs_resync = false;
        metrics::record_resync();

        if self.collectors.replace_with(live_collectors(&list)) {
            info!(
                collectors = self.collectors.len(),
                "Collector membership changed while the watch was down"
            );
            notify(&mut self.on_change, &self.collectors);
        }
        metrics::set_collectors_discovered(self.collectors.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Replica;

    #[test]
    fn test_live_collectors_skips_terminating() {
        let list = ReplicaList {
            resource_version: Some("7".to_string()),
            items: vec![
                Replica::new("collector-0"),
                Replica::new("collector-1").terminating(),
                Replica::new("collector-2"),
            ],
        };

        let live = live_collectors(&list);

        assert_eq!(
            live.names(),
            vec!["collector-0".to_string(), "collector-2".to_string()]
        );
    }

    #[test]
    fn test_settings_from_config() {
        let config = DiscoveryConfig {
            session_timeout_secs: 30,
            ..Default::default()
        };

        let settings = WatchSettings::from(&config);

        assert_eq!(settings.session_timeout, Duration::from_secs(30));
        assert_eq!(settings.retry, RetryConfig::default());
    }

    #[test]
    fn test_default_settings() {
        let settings = WatchSettings::default().with_retry(RetryConfig::new(2));

        assert_eq!(settings.session_timeout, Duration::from_secs(900));
        assert_eq!(settings.retry.max_attempts(), 3);
    }
}
