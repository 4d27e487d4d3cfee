//! Test doubles and common utilities for writer contract tests
//!
//! The doubles count their calls through shared atomics, so a test can keep
//! a handle while the writer owns a clone.

#![allow(dead_code)]

use nodestate_core::config::WriterConfig;
use nodestate_core::error::{Error, Result};
use nodestate_core::state::MemoryRemoteStore;
use nodestate_core::traits::{
    DeviceSource, HeartbeatHandler, InterfaceExt, MetadataSource, NodeState, PlatformKind,
    PlatformMetadata, RemoteStore,
};
use nodestate_core::WriterEvent;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const NODE: &str = "worker-0";

/// Single physical function named `name`
pub fn interfaces(name: &str) -> Vec<InterfaceExt> {
    vec![
        InterfaceExt::new("0000:3b:00.0")
            .with_name(name)
            .with_driver("mlx5_core"),
    ]
}

/// A DeviceSource returning a fixed snapshot, optionally failing
#[derive(Clone)]
pub struct CountingDeviceSource {
    interfaces: Vec<InterfaceExt>,
    fail: Arc<AtomicBool>,
    discover_call_count: Arc<AtomicUsize>,
    /// Metadata argument seen by the most recent call
    last_metadata: Arc<Mutex<Option<Option<PlatformMetadata>>>>,
}

impl CountingDeviceSource {
    pub fn new(interfaces: Vec<InterfaceExt>) -> Self {
        Self {
            interfaces,
            fail: Arc::new(AtomicBool::new(false)),
            discover_call_count: Arc::new(AtomicUsize::new(0)),
            last_metadata: Arc::new(Mutex::new(None)),
        }
    }

    /// A source whose every discover() call fails
    pub fn failing() -> Self {
        let source = Self::new(Vec::new());
        source.set_failing(true);
        source
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Get the number of times discover() was called
    pub fn discover_call_count(&self) -> usize {
        self.discover_call_count.load(Ordering::SeqCst)
    }

    /// Metadata passed to the last discover() call, `None` if never called
    pub fn last_metadata(&self) -> Option<Option<PlatformMetadata>> {
        self.last_metadata.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DeviceSource for CountingDeviceSource {
    async fn discover(
        &self,
        _platform: PlatformKind,
        metadata: Option<&PlatformMetadata>,
    ) -> Result<Vec<InterfaceExt>> {
        self.discover_call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_metadata.lock().unwrap() = Some(metadata.cloned());

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::discovery("sysfs unavailable"));
        }
        Ok(self.interfaces.clone())
    }
}

/// A RemoteStore over MemoryRemoteStore with scripted failures
///
/// Conflicts are produced by bumping the stored object's version right
/// before delegating the update, the way a concurrent writer would.
#[derive(Clone)]
pub struct ScriptedRemoteStore {
    inner: MemoryRemoteStore,
    conflicts_remaining: Arc<AtomicUsize>,
    fail_get: Arc<AtomicBool>,
    fail_update: Arc<AtomicBool>,
    get_call_count: Arc<AtomicUsize>,
    update_call_count: Arc<AtomicUsize>,
}

impl ScriptedRemoteStore {
    /// Store holding an empty node state for [`NODE`]
    pub async fn with_node() -> Self {
        let inner = MemoryRemoteStore::new();
        inner.insert(NodeState::new(NODE)).await;
        Self::wrap(inner)
    }

    /// Store holding nothing
    pub fn empty() -> Self {
        Self::wrap(MemoryRemoteStore::new())
    }

    fn wrap(inner: MemoryRemoteStore) -> Self {
        Self {
            inner,
            conflicts_remaining: Arc::new(AtomicUsize::new(0)),
            fail_get: Arc::new(AtomicBool::new(false)),
            fail_update: Arc::new(AtomicBool::new(false)),
            get_call_count: Arc::new(AtomicUsize::new(0)),
            update_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `n` updates conflict
    pub fn conflict_next(&self, n: usize) {
        self.conflicts_remaining.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    /// Get the number of times get() was called
    pub fn get_call_count(&self) -> usize {
        self.get_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times update_status() was called
    pub fn update_call_count(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst)
    }

    /// Current stored object
    pub async fn stored(&self) -> NodeState {
        self.inner
            .snapshot(NODE)
            .await
            .expect("node state object exists")
    }
}

#[async_trait::async_trait]
impl RemoteStore for ScriptedRemoteStore {
    async fn get(&self, name: &str) -> Result<NodeState> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Error::remote_store("connection refused"));
        }
        self.inner.get(name).await
    }

    async fn update_status(&self, state: &NodeState) -> Result<NodeState> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(Error::remote_store("500 Internal Server Error"));
        }

        let conflict = self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            if let Some(current) = self.inner.snapshot(&state.name).await {
                self.inner.insert(current).await;
            }
        }

        self.inner.update_status(state).await
    }
}

/// A HeartbeatHandler counting failures
#[derive(Clone, Default)]
pub struct CountingHeartbeat {
    failure_count: Arc<AtomicUsize>,
}

impl CountingHeartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::SeqCst)
    }
}

impl HeartbeatHandler for CountingHeartbeat {
    fn on_heartbeat_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A MetadataSource with independently failing cache and fetch paths
#[derive(Clone)]
pub struct ScriptedMetadataSource {
    metadata: PlatformMetadata,
    cache_ok: bool,
    fetch_ok: bool,
    read_cached_call_count: Arc<AtomicUsize>,
    fetch_call_count: Arc<AtomicUsize>,
}

impl ScriptedMetadataSource {
    pub fn new(metadata: PlatformMetadata, cache_ok: bool, fetch_ok: bool) -> Self {
        Self {
            metadata,
            cache_ok,
            fetch_ok,
            read_cached_call_count: Arc::new(AtomicUsize::new(0)),
            fetch_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn read_cached_call_count(&self) -> usize {
        self.read_cached_call_count.load(Ordering::SeqCst)
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MetadataSource for ScriptedMetadataSource {
    async fn read_cached(&self) -> Result<PlatformMetadata> {
        self.read_cached_call_count.fetch_add(1, Ordering::SeqCst);
        if self.cache_ok {
            Ok(self.metadata.clone())
        } else {
            Err(Error::metadata("config drive not mounted"))
        }
    }

    async fn fetch(&self) -> Result<PlatformMetadata> {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fetch_ok {
            Ok(self.metadata.clone())
        } else {
            Err(Error::metadata("metadata service unreachable"))
        }
    }
}

/// Writer configuration for tests
///
/// The passive timer is set far out so that it never fires unless a test
/// shortens it.
pub fn minimal_config(checkpoint_dir: &Path) -> WriterConfig {
    let mut config = WriterConfig::new(NODE).with_checkpoint_dir(checkpoint_dir);
    config.poll_interval_secs = 3600;
    config
}

/// Wait for the next StatusPushed or PushFailed event
pub async fn next_push_outcome(events: &mut mpsc::Receiver<WriterEvent>) -> WriterEvent {
    loop {
        let event = events.recv().await.expect("writer event channel open");
        if matches!(
            event,
            WriterEvent::StatusPushed { .. } | WriterEvent::PushFailed { .. }
        ) {
            return event;
        }
    }
}

/// Wait for the next PollFailed event
pub async fn next_poll_failure(events: &mut mpsc::Receiver<WriterEvent>) -> WriterEvent {
    loop {
        let event = events.recv().await.expect("writer event channel open");
        if matches!(event, WriterEvent::PollFailed { .. }) {
            return event;
        }
    }
}
