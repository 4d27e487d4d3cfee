// # Remote Store Trait
//
// Defines the interface to the control plane object that holds the node's
// reported state.
//
// ## Purpose
//
// The remote object is shared with other writers. Updates are conditional on
// the object's version token; a stale token is rejected with a conflict
// error, and the caller re-reads and retries.
//
// ## Implementations
//
// - Kubernetes-style REST: `nodestate-remote-http` crate
// - In-memory: `MemoryRemoteStore` (tests, embedding)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::traits::device_source::InterfaceExt;

/// Sync status reported by the configuration controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    /// No status reported yet
    #[default]
    #[serde(rename = "")]
    Unknown,
    InProgress,
    Succeeded,
    Failed,
}

impl SyncStatus {
    /// Whether this status ends a sync (success or failure)
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Succeeded | SyncStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Unknown => "",
            SyncStatus::InProgress => "InProgress",
            SyncStatus::Succeeded => "Succeeded",
            SyncStatus::Failed => "Failed",
        }
    }

    fn is_unknown(&self) -> bool {
        matches!(self, SyncStatus::Unknown)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refresh instruction delivered to the writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMessage {
    pub sync_status: SyncStatus,
    pub last_sync_error: String,
}

impl SyncMessage {
    /// Create a message
    pub fn new(sync_status: SyncStatus, last_sync_error: impl Into<String>) -> Self {
        Self {
            sync_status,
            last_sync_error: last_sync_error.into(),
        }
    }
}

/// Status sub-object of the remote node state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceExt>,

    #[serde(default, skip_serializing_if = "SyncStatus::is_unknown")]
    pub sync_status: SyncStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_sync_error: String,
}

impl NodeStateStatus {
    /// Apply a refresh message on top of this status
    ///
    /// `last_sync_error` is only overwritten by a non-empty error or by a
    /// successful sync. An in-progress or failed message without an error
    /// keeps the previously recorded one.
    pub fn apply(&mut self, interfaces: &[InterfaceExt], msg: &SyncMessage) {
        self.interfaces = interfaces.to_vec();
        if !msg.last_sync_error.is_empty() || msg.sync_status == SyncStatus::Succeeded {
            self.last_sync_error = msg.last_sync_error.clone();
        }
        self.sync_status = msg.sync_status;
    }
}

/// The remote, versioned node state object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Object name (the node name)
    pub name: String,

    /// Namespace the object lives in
    #[serde(default)]
    pub namespace: String,

    /// Opaque optimistic-concurrency token
    #[serde(default)]
    pub resource_version: String,

    /// Desired state, owned by other writers and passed through untouched
    #[serde(default)]
    pub spec: serde_json::Value,

    #[serde(default)]
    pub status: NodeStateStatus,
}

impl NodeState {
    /// Create an empty node state with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Trait for the remote store holding node state objects
///
/// Implementations perform a single request per call. Retry, backoff and
/// heartbeat signaling are owned by the `StatusWriter`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the node state object named `name`
    async fn get(&self, name: &str) -> Result<NodeState, crate::Error>;

    /// Replace the status of `state`, conditional on its `resource_version`
    ///
    /// # Returns
    ///
    /// - `Ok(NodeState)`: The stored object, with a new version token
    /// - `Err(Error::Conflict)`: The version token was stale
    /// - `Err(Error)`: Any other failure
    async fn update_status(&self, state: &NodeState) -> Result<NodeState, crate::Error>;
}

/// Receiver of heartbeat failures
///
/// Called once for every failed remote fetch attempt. Transport layers use
/// it to drop pooled connections that are likely dead.
pub trait HeartbeatHandler: Send + Sync {
    fn on_heartbeat_failure(&self);
}

impl<F> HeartbeatHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_heartbeat_failure(&self) {
        self()
    }
}

/// Heartbeat handler that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHeartbeat;

impl HeartbeatHandler for NoopHeartbeat {
    fn on_heartbeat_failure(&self) {}
}
