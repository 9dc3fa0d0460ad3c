//! Discovery health tracking
//!
//! Records whether bootstrap has completed and how long the watch loop has
//! gone without an active session, so readiness probes can flag a stalled
//! discovery instead of serving a silently stale membership view.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared, cheaply clonable discovery health state
#[derive(Debug, Clone)]
pub struct DiscoveryHealth {
    inner: Arc<HealthState>,
}

#[derive(Debug)]
struct HealthState {
    /// Reference point for the millisecond offsets below
    start_time: Instant,
    bootstrapped: AtomicBool,
    session_active: AtomicBool,
    /// Offset from `start_time` at which the last session ended
    inactive_since_ms: AtomicU64,
    sessions_opened: AtomicU64,
}

/// Point-in-time view of discovery health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub bootstrapped: bool,
    pub session_active: bool,
    pub sessions_opened: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_secs: Option<u64>,
}

impl Default for DiscoveryHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryHealth {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HealthState {
                start_time: Instant::now(),
                bootstrapped: AtomicBool::new(false),
                session_active: AtomicBool::new(false),
                inactive_since_ms: AtomicU64::new(0),
                sessions_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Mark the bootstrap listing as complete
    pub fn mark_bootstrapped(&self) {
        self.inner.bootstrapped.store(true, Ordering::SeqCst);
    }

    /// Record that a watch session is now streaming
    pub fn session_started(&self) {
        self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst);
        self.inner.session_active.store(true, Ordering::SeqCst);
    }

    /// Record that the current watch session ended
    pub fn session_ended(&self) {
        self.inner
            .inactive_since_ms
            .store(self.elapsed_ms(), Ordering::SeqCst);
        self.inner.session_active.store(false, Ordering::SeqCst);
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.inner.bootstrapped.load(Ordering::SeqCst)
    }

    pub fn is_session_active(&self) -> bool {
        self.inner.session_active.load(Ordering::SeqCst)
    }

    /// Number of sessions that reached the streaming state
    pub fn sessions_opened(&self) -> u64 {
        self.inner.sessions_opened.load(Ordering::SeqCst)
    }

    /// How long discovery has been without an active session
    ///
    /// `None` while a session is streaming.
    pub fn inactive_for(&self) -> Option<Duration> {
        if self.is_session_active() {
            return None;
        }
        let since = self.inner.inactive_since_ms.load(Ordering::SeqCst);
        Some(Duration::from_millis(self.elapsed_ms().saturating_sub(since)))
    }

    /// Bootstrapped, and any gap between sessions is within `max_inactive`
    pub fn is_ready(&self, max_inactive: Duration) -> bool {
        self.is_bootstrapped() && self.inactive_for().map_or(true, |gap| gap <= max_inactive)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            bootstrapped: self.is_bootstrapped(),
            session_active: self.is_session_active(),
            sessions_opened: self.sessions_opened(),
            inactive_secs: self.inactive_for().map(|d| d.as_secs()),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.inner.start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
