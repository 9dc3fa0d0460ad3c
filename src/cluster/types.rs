//! Replica and watch-event types
//!
//! These mirror the subset of the core/v1 Pod list+watch wire format that
//! discovery consumes: object name, deletion marker and resource version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Replicas
// ============================================================================

/// One workload replica as seen by the cluster API
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    /// Replica name
    #[serde(default)]
    pub name: String,

    /// Resource version of this object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Deletion marker, set once platform-level teardown has started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Replica {
    /// Create a replica with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the resource version
    pub fn with_resource_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = Some(version.into());
        self
    }

    /// Mark the replica as being deleted
    pub fn terminating(mut self) -> Self {
        self.deletion_timestamp = Some(Utc::now());
        self
    }

    /// Whether teardown of this replica is in progress
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Point-in-time listing of replicas
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaList {
    /// Resource version the listing was taken at
    pub resource_version: Option<String>,

    pub items: Vec<Replica>,
}

// ============================================================================
// Watch Events
// ============================================================================

/// Lifecycle event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Bookmark => "BOOKMARK",
            Self::Error => "ERROR",
        }
    }
}

/// Status object carried by `ERROR` events
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub code: u16,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,
}

impl Status {
    /// HTTP 410: the requested resource version is no longer available
    pub fn is_gone(&self) -> bool {
        self.code == 410 || self.reason == "Expired" || self.reason == "Gone"
    }
}

/// Object payload of a watch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventObject {
    /// The expected replica payload
    Replica(Replica),

    /// An API status (error events)
    Status(Status),

    /// Any other object kind
    Other { kind: String },
}

/// A single lifecycle event from the watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub object: EventObject,
}

impl WatchEvent {
    pub fn added(replica: Replica) -> Self {
        Self {
            event_type: EventType::Added,
            object: EventObject::Replica(replica),
        }
    }

    pub fn modified(replica: Replica) -> Self {
        Self {
            event_type: EventType::Modified,
            object: EventObject::Replica(replica),
        }
    }

    pub fn deleted(replica: Replica) -> Self {
        Self {
            event_type: EventType::Deleted,
            object: EventObject::Replica(replica),
        }
    }

    /// A bookmark carrying only a resource version
    pub fn bookmark(resource_version: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Bookmark,
            object: EventObject::Replica(Replica::default().with_resource_version(resource_version)),
        }
    }

    pub fn error(status: Status) -> Self {
        Self {
            event_type: EventType::Error,
            object: EventObject::Status(status),
        }
    }

    /// Decode one newline-delimited JSON watch frame
    pub fn from_json(frame: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawWatchEvent = serde_json::from_slice(frame)?;

        let kind = raw
            .object
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or("Pod")
            .to_string();

        let object = match kind.as_str() {
            "Pod" => {
                let pod: PodObject = serde_json::from_value(raw.object)?;
                EventObject::Replica(pod.into())
            }
            "Status" => EventObject::Status(serde_json::from_value(raw.object)?),
            _ => EventObject::Other { kind },
        };

        Ok(Self {
            event_type: raw.event_type,
            object,
        })
    }
}

/// Parameters for opening one watch subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchParams {
    /// Resume point; `None` starts from the current state
    pub resource_version: Option<String>,

    /// Server-side lifetime of the subscription
    pub timeout: Duration,
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    event_type: EventType,
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub resource_version: Option<String>,

    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PodObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

impl From<PodObject> for Replica {
    fn from(pod: PodObject) -> Self {
        Self {
            name: pod.metadata.name,
            resource_version: pod.metadata.resource_version,
            deletion_timestamp: pod.metadata.deletion_timestamp,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListMeta {
    #[serde(default)]
    pub resource_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PodList {
    #[serde(default)]
    pub metadata: ListMeta,

    #[serde(default)]
    pub items: Vec<PodObject>,
}

impl From<PodList> for ReplicaList {
    fn from(list: PodList) -> Self {
        Self {
            resource_version: list.metadata.resource_version,
            items: list.items.into_iter().map(Replica::from).collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
