//! Common test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use collector_discovery::cluster::{
    ApiError, EventStream, LabelSelector, Replica, ReplicaApi, ReplicaList, WatchEvent, WatchParams,
};
use collector_discovery::MembershipSet;

// ============================================================================
// Fake Replica API
// ============================================================================

/// Scripted outcome of one `watch` call
pub enum Session {
    /// Deliver these events, then end the stream
    Events(Vec<WatchEvent>),

    /// Deliver these events and keep the stream open
    Open(Vec<WatchEvent>),

    /// Hand out a receiver the test feeds itself
    Channel(mpsc::Receiver<WatchEvent>),

    /// Fail to open the session
    Fail(ApiError),
}

/// In-memory [`ReplicaApi`] replaying scripted lists and sessions
///
/// Once the scripted sessions run out, every further watch returns a stream
/// that stays open and silent.
#[derive(Default)]
pub struct FakeReplicaApi {
    lists: Mutex<VecDeque<Result<ReplicaList, ApiError>>>,
    sessions: Mutex<VecDeque<Session>>,
    watch_calls: Mutex<Vec<WatchParams>>,
    list_calls: AtomicUsize,
    idle: Mutex<Vec<mpsc::Sender<WatchEvent>>>,
}

impl FakeReplicaApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(self, list: ReplicaList) -> Self {
        self.lists.lock().unwrap().push_back(Ok(list));
        self
    }

    pub fn with_list_error(self, error: ApiError) -> Self {
        self.lists.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_session(self, session: Session) -> Self {
        self.sessions.lock().unwrap().push_back(session);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> Vec<WatchParams> {
        self.watch_calls.lock().unwrap().clone()
    }

    fn open_channel(&self, events: Vec<WatchEvent>, keep_open: bool) -> EventStream {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        if keep_open {
            self.idle.lock().unwrap().push(tx);
        }
        rx
    }
}

#[async_trait]
impl ReplicaApi for FakeReplicaApi {
    async fn list(
        &self,
        _namespace: &str,
        _selector: &LabelSelector,
    ) -> Result<ReplicaList, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.lists
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ReplicaList::default()))
    }

    async fn watch(
        &self,
        _namespace: &str,
        _selector: &LabelSelector,
        params: WatchParams,
    ) -> Result<EventStream, ApiError> {
        self.watch_calls.lock().unwrap().push(params);

        let session = self.sessions.lock().unwrap().pop_front();
        match session {
            Some(Session::Events(events)) => Ok(self.open_channel(events, false)),
            Some(Session::Open(events)) => Ok(self.open_channel(events, true)),
            Some(Session::Channel(rx)) => Ok(rx),
            Some(Session::Fail(error)) => Err(error),
            None => Ok(self.open_channel(Vec::new(), true)),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Listing of plain replicas at a resource version
pub fn replica_list(resource_version: &str, names: &[&str]) -> ReplicaList {
    ReplicaList {
        resource_version: Some(resource_version.to_string()),
        items: names.iter().map(|name| Replica::new(*name)).collect(),
    }
}

pub fn added(name: &str, resource_version: &str) -> WatchEvent {
    WatchEvent::added(Replica::new(name).with_resource_version(resource_version))
}

pub fn deleted(name: &str, resource_version: &str) -> WatchEvent {
    WatchEvent::deleted(Replica::new(name).with_resource_version(resource_version))
}

pub fn server_error(code: u16) -> ApiError {
    ApiError::Status {
        code,
        message: "injected failure".to_string(),
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Callback Recorder
// ============================================================================

/// Records every membership snapshot handed to the callback
#[derive(Clone, Default)]
pub struct Recorder {
    snapshots: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl FnMut(MembershipSet) -> anyhow::Result<()> + Send + 'static {
        let snapshots = self.snapshots.clone();
        move |collectors: MembershipSet| {
            snapshots.lock().unwrap().push(collectors.names());
            Ok(())
        }
    }

    pub fn snapshots(&self) -> Vec<Vec<String>> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Vec<String>> {
        self.snapshots.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

/// Poll `condition` until it holds, panicking after a generous timeout
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(600), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached in time");
}

/// Await `future`, panicking if it takes unreasonably long
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(600), future)
        .await
        .expect("future did not complete in time")
}
