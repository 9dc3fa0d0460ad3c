//! Watch event processing
//!
//! Applies the events of one watch session to the membership set and
//! notifies the callback with an owned snapshot after every membership
//! change. A session ends when the client is closed, the caller cancels,
//! the session deadline passes, the stream ends, or the stream carries
//! something that is not a collector replica.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::shutdown::Shutdown;
use crate::cluster::{EventObject, EventStream, EventType, Replica, WatchEvent};
use crate::metrics;
use crate::models::{Collector, MembershipSet};

/// How a single watch session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The discovery client was closed
    Closed,

    /// The caller's cancellation token fired
    Cancelled,

    /// The session deadline passed
    Expired,

    /// The event stream closed on its own
    StreamEnded,

    /// The stream delivered an object that is not a collector replica
    UnexpectedPayload,

    /// The server reported the resource version as expired (410 Gone)
    ResourceExpired,

    /// The server reported any other error status
    StreamError { code: u16, message: String },
}

impl SessionEnd {
    /// Whether the watch loop should stop entirely
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    /// Whether membership must be re-listed before the next session
    pub fn needs_resync(&self) -> bool {
        matches!(self, Self::ResourceExpired)
    }

    /// Human readable stop reason for terminal ends
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Closed => Some("kubernetes client closed"),
            Self::Cancelled => Some("context cancelled"),
            _ => None,
        }
    }

    /// Label used for the session outcome metric
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::StreamEnded => "stream_ended",
            Self::UnexpectedPayload => "unexpected_payload",
            Self::ResourceExpired => "resource_expired",
            Self::StreamError { .. } => "stream_error",
        }
    }
}

/// Hand an owned snapshot of `collectors` to the callback
///
/// Errors and panics raised by the callback are logged and counted; they
/// never stop discovery. Returns `true` when the callback succeeded.
pub(crate) fn notify<F>(on_change: &mut F, collectors: &MembershipSet) -> bool
where
    F: FnMut(MembershipSet) -> anyhow::Result<()>,
{
    let snapshot = collectors.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| on_change(snapshot))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            metrics::record_callback_failure();
            error!(error = %e, collectors = collectors.len(), "Membership callback failed");
            false
        }
        Err(payload) => {
            metrics::record_callback_failure();
            error!(
                panic = panic_message(payload.as_ref()),
                collectors = collectors.len(),
                "Membership callback panicked"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Applies one session's events to the shared membership state
pub(crate) struct EventProcessor<'a, F> {
    collectors: &'a mut MembershipSet,
    resource_version: &'a mut Option<String>,
    on_change: &'a mut F,
}

impl<'a, F> EventProcessor<'a, F>
where
    F: FnMut(MembershipSet) -> anyhow::Result<()>,
{
    pub(crate) fn new(
        collectors: &'a mut MembershipSet,
        resource_version: &'a mut Option<String>,
        on_change: &'a mut F,
    ) -> Self {
        Self {
            collectors,
            resource_version,
            on_change,
        }
    }

    /// Consume events until the session ends
    ///
    /// Stop signals are checked before the deadline, and the deadline before
    /// new events. When the deadline passes, events already queued on the
    /// channel are applied before the session reports `Expired`.
    pub(crate) async fn run(
        &mut self,
        events: &mut EventStream,
        deadline: Instant,
        shutdown: &Shutdown,
    ) -> SessionEnd {
        loop {
            metrics::set_collectors_discovered(self.collectors.len());

            tokio::select! {
                biased;
                _ = shutdown.closed() => return SessionEnd::Closed,
                _ = shutdown.cancelled() => return SessionEnd::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return self.drain(events),
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("No event found. Restarting watch");
                        return SessionEnd::StreamEnded;
                    };
                    if let Some(end) = self.apply(event) {
                        return end;
                    }
                }
            }
        }
    }

    fn drain(&mut self, events: &mut EventStream) -> SessionEnd {
        let mut drained = 0usize;
        while let Ok(event) = events.try_recv() {
            drained += 1;
            if let Some(end) = self.apply(event) {
                return end;
            }
        }
        metrics::set_collectors_discovered(self.collectors.len());
        debug!(drained, "Collector watch session expired");
        SessionEnd::Expired
    }

    /// Apply one event, returning the session end it causes, if any
    fn apply(&mut self, event: WatchEvent) -> Option<SessionEnd> {
        match (event.event_type, event.object) {
            (EventType::Error, EventObject::Status(status)) => {
                if status.is_gone() {
                    info!(message = %status.message, "Collector watch resource version expired");
                    Some(SessionEnd::ResourceExpired)
                } else {
                    warn!(code = status.code, message = %status.message, "Collector watch returned an error");
                    Some(SessionEnd::StreamError {
                        code: status.code,
                        message: status.message,
                    })
                }
            }
            (EventType::Error, _) => {
                warn!("Collector watch returned an error without a status");
                Some(SessionEnd::StreamError {
                    code: 0,
                    message: String::from("error event without status"),
                })
            }
            (event_type, EventObject::Replica(replica)) => {
                self.apply_replica(event_type, replica);
                None
            }
            (event_type, EventObject::Status(_)) => {
                error!(event_type = event_type.as_str(), kind = "Status", "Event object is not a collector replica");
                Some(SessionEnd::UnexpectedPayload)
            }
            (event_type, EventObject::Other { kind }) => {
                error!(event_type = event_type.as_str(), kind = %kind, "Event object is not a collector replica");
                Some(SessionEnd::UnexpectedPayload)
            }
        }
    }

    fn apply_replica(&mut self, event_type: EventType, replica: Replica) {
        if let Some(version) = replica.resource_version {
            *self.resource_version = Some(version);
        }

        match event_type {
            EventType::Added => {
                if self.collectors.insert(Collector::new(replica.name.as_str())) {
                    debug!(collector = %replica.name, "Collector added");
                }
                notify(&mut *self.on_change, &*self.collectors);
            }
            EventType::Deleted => {
                if self.collectors.remove(&replica.name).is_some() {
                    debug!(collector = %replica.name, "Collector removed");
                }
                notify(&mut *self.on_change, &*self.collectors);
            }
            EventType::Modified | EventType::Bookmark | EventType::Error => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Status;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    fn shutdown() -> (Shutdown, CancellationToken, CancellationToken) {
        let ctx = CancellationToken::new();
        let close = CancellationToken::new();
        (Shutdown::new(ctx.clone(), close.clone()), ctx, close)
    }

    /// Run one session over `events` and return its end plus every snapshot seen
    async fn run_events(
        collectors: &mut MembershipSet,
        events: Vec<WatchEvent>,
        deadline: Instant,
    ) -> (SessionEnd, Vec<Vec<String>>, Option<String>) {
        let (tx, mut rx) = mpsc::channel(64);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let (shutdown, _ctx, _close) = shutdown();
        let mut seen = Vec::new();
        let mut on_change = |set: MembershipSet| -> anyhow::Result<()> {
            seen.push(set.names());
            Ok(())
        };
        let mut version = None;

        let end = EventProcessor::new(collectors, &mut version, &mut on_change)
            .run(&mut rx, deadline, &shutdown)
            .await;
        (end, seen, version)
    }

    // ========================================================================
    // Membership Changes
    // ========================================================================

    #[tokio::test]
    async fn test_added_then_deleted() {
        let mut collectors = MembershipSet::new();
        let (end, seen, _) = run_events(
            &mut collectors,
            vec![
                WatchEvent::added(Replica::new("collector-0")),
                WatchEvent::added(Replica::new("collector-1")),
                WatchEvent::deleted(Replica::new("collector-0")),
            ],
            far_deadline(),
        )
        .await;

        assert_eq!(end, SessionEnd::StreamEnded);
        assert_eq!(
            seen,
            vec![
                vec!["collector-0".to_string()],
                vec!["collector-0".to_string(), "collector-1".to_string()],
                vec!["collector-1".to_string()],
            ]
        );
        assert_eq!(collectors.names(), vec!["collector-1".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_added_is_idempotent() {
        let mut collectors = MembershipSet::new();
        let (_, seen, _) = run_events(
            &mut collectors,
            vec![
                WatchEvent::added(Replica::new("collector-0")),
                WatchEvent::added(Replica::new("collector-0")),
            ],
            far_deadline(),
        )
        .await;

        assert_eq!(collectors.len(), 1);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_deleting_unknown_collector_still_notifies() {
        let mut collectors: MembershipSet = [Collector::new("collector-0")].into_iter().collect();
        let (_, seen, _) = run_events(
            &mut collectors,
            vec![WatchEvent::deleted(Replica::new("ghost"))],
            far_deadline(),
        )
        .await;

        assert_eq!(seen, vec![vec!["collector-0".to_string()]]);
    }

    #[tokio::test]
    async fn test_modified_and_bookmark_only_track_version() {
        let mut collectors = MembershipSet::new();
        let (_, seen, version) = run_events(
            &mut collectors,
            vec![
                WatchEvent::modified(Replica::new("collector-0").with_resource_version("10")),
                WatchEvent::bookmark("12"),
            ],
            far_deadline(),
        )
        .await;

        assert!(seen.is_empty());
        assert!(collectors.is_empty());
        assert_eq!(version.as_deref(), Some("12"));
    }

    // ========================================================================
    // Session Endings
    // ========================================================================

    #[tokio::test]
    async fn test_unexpected_payload_ends_session() {
        let mut collectors = MembershipSet::new();
        let (end, seen, _) = run_events(
            &mut collectors,
            vec![
                WatchEvent {
                    event_type: EventType::Added,
                    object: EventObject::Other {
                        kind: "ConfigMap".to_string(),
                    },
                },
                WatchEvent::added(Replica::new("collector-0")),
            ],
            far_deadline(),
        )
        .await;

        assert_eq!(end, SessionEnd::UnexpectedPayload);
        assert!(!end.is_terminal());
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_gone_status_requests_resync() {
        let mut collectors = MembershipSet::new();
        let (end, _, _) = run_events(
            &mut collectors,
            vec![WatchEvent::error(Status {
                code: 410,
                reason: "Expired".to_string(),
                message: "too old resource version".to_string(),
            })],
            far_deadline(),
        )
        .await;

        assert_eq!(end, SessionEnd::ResourceExpired);
        assert!(end.needs_resync());
    }

    #[tokio::test]
    async fn test_other_error_status() {
        let mut collectors = MembershipSet::new();
        let (end, _, _) = run_events(
            &mut collectors,
            vec![WatchEvent::error(Status {
                code: 500,
                reason: "InternalError".to_string(),
                message: "etcd unavailable".to_string(),
            })],
            far_deadline(),
        )
        .await;

        assert_eq!(
            end,
            SessionEnd::StreamError {
                code: 500,
                message: "etcd unavailable".to_string()
            }
        );
        assert!(!end.needs_resync());
    }

    #[tokio::test]
    async fn test_expired_deadline_drains_queued_events() {
        let mut collectors = MembershipSet::new();
        let (end, seen, _) = run_events(
            &mut collectors,
            vec![
                WatchEvent::added(Replica::new("collector-0")),
                WatchEvent::added(Replica::new("collector-1")),
            ],
            Instant::now() - Duration::from_secs(1),
        )
        .await;

        assert_eq!(end, SessionEnd::Expired);
        assert_eq!(seen.len(), 2);
        assert_eq!(collectors.len(), 2);
    }

    #[tokio::test]
    async fn test_close_wins_over_queued_events() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(WatchEvent::added(Replica::new("collector-0")))
            .await
            .unwrap();

        let (shutdown, ctx, close) = shutdown();
        ctx.cancel();
        close.cancel();

        let mut collectors = MembershipSet::new();
        let mut version = None;
        let mut calls = 0;
        let mut on_change = |_: MembershipSet| -> anyhow::Result<()> {
            calls += 1;
            Ok(())
        };

        let end = EventProcessor::new(&mut collectors, &mut version, &mut on_change)
            .run(&mut rx, far_deadline(), &shutdown)
            .await;

        assert_eq!(end, SessionEnd::Closed);
        assert_eq!(end.reason(), Some("kubernetes client closed"));
        assert_eq!(calls, 0);
        assert!(collectors.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_idle() {
        let (_tx, mut rx) = mpsc::channel::<WatchEvent>(8);
        let (shutdown, ctx, _close) = shutdown();

        let mut collectors = MembershipSet::new();
        let mut version = None;
        let mut on_change = |_: MembershipSet| -> anyhow::Result<()> { Ok(()) };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx.cancel();
        });

        let end = EventProcessor::new(&mut collectors, &mut version, &mut on_change)
            .run(&mut rx, far_deadline(), &shutdown)
            .await;
        canceller.await.unwrap();

        assert_eq!(end, SessionEnd::Cancelled);
        assert!(end.is_terminal());
    }

    // ========================================================================
    // Callback Isolation
    // ========================================================================

    #[tokio::test]
    async fn test_callback_failures_do_not_stop_processing() {
        let (tx, mut rx) = mpsc::channel(8);
        for name in ["collector-0", "collector-1", "collector-2"] {
            tx.send(WatchEvent::added(Replica::new(name))).await.unwrap();
        }
        drop(tx);

        let (shutdown, _ctx, _close) = shutdown();
        let mut collectors = MembershipSet::new();
        let mut version = None;
        let mut calls = 0;
        let mut on_change = |set: MembershipSet| -> anyhow::Result<()> {
            calls += 1;
            match set.len() {
                1 => anyhow::bail!("allocator busy"),
                2 => panic!("allocator crashed"),
                _ => Ok(()),
            }
        };

        let end = EventProcessor::new(&mut collectors, &mut version, &mut on_change)
            .run(&mut rx, far_deadline(), &shutdown)
            .await;

        assert_eq!(end, SessionEnd::StreamEnded);
        assert_eq!(calls, 3);
        assert_eq!(collectors.len(), 3);
    }

    #[test]
    fn test_notify_hands_out_owned_snapshot() {
        let mut collectors: MembershipSet = [Collector::new("collector-0")].into_iter().collect();
        let mut kept = None;
        let mut on_change = |set: MembershipSet| -> anyhow::Result<()> {
            kept = Some(set);
            Ok(())
        };

        assert!(notify(&mut on_change, &collectors));
        collectors.insert(Collector::new("collector-1"));

        assert_eq!(kept.map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_session_end_labels() {
        assert_eq!(SessionEnd::Expired.as_str(), "expired");
        assert_eq!(SessionEnd::Cancelled.reason(), Some("context cancelled"));
        assert_eq!(SessionEnd::StreamEnded.reason(), None);
    }
}
