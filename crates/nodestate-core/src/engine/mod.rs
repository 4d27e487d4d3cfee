//! Node state status writer
//!
//! The StatusWriter is responsible for:
//! - Polling the node's network interfaces via DeviceSource
//! - Pushing the interface snapshot and sync status to the RemoteStore
//! - Retrying conflicting updates with backoff
//! - Signaling failed remote fetches to the HeartbeatHandler
//! - Writing the one-shot bootstrap checkpoint in run-once mode
//!
//! ## Architecture
//!
//! ```text
//!   stop ──┐   refresh ──┐   timer ──┐
//!          ▼             ▼           ▼
//!        ┌───────────────────────────────┐
//!        │          StatusWriter         │──── sync complete ───▶
//!        └───────────────────────────────┘
//!             │            │          │
//!             ▼            ▼          ▼
//!     ┌──────────────┐ ┌─────────┐ ┌────────────┐
//!     │ DeviceSource │ │ Remote  │ │ Checkpoint │
//!     │   (poll)     │ │ Store   │ │ (run-once) │
//!     └──────────────┘ └─────────┘ └────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Stop signal → exit
//! 2. Refresh message → poll, push the message, notify if the sync ended
//! 3. Timer → poll, push the last seen message

mod backoff;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{BackoffConfig, WriterConfig};
use crate::error::{Error, Result};
use crate::state::{CheckpointOrigin, CheckpointStore, InitialState};
use crate::traits::{
    DeviceSource, HeartbeatHandler, InterfaceExt, MetadataSource, NodeState, PlatformKind,
    PlatformMetadata, RemoteStore, SyncMessage, SyncStatus,
};
use backoff::Backoff;

/// Events emitted by the StatusWriter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterEvent {
    /// Writer started
    Started { node: String, run_once: bool },

    /// Device poll failed; the iteration was aborted
    PollFailed { error: String },

    /// Status pushed to the remote store
    StatusPushed {
        sync_status: SyncStatus,
        interfaces: usize,
        resource_version: String,
        observed_at: chrono::DateTime<chrono::Utc>,
    },

    /// Status push gave up
    PushFailed { error: String },

    /// Sync-complete notification sent downstream
    SyncCompleted { sync_status: SyncStatus },

    /// Checkpoint file written
    CheckpointWritten { path: std::path::PathBuf },

    /// Valid checkpoint already present, nothing written
    CheckpointReused { path: std::path::PathBuf },

    /// Writer stopped
    Stopped { reason: String },
}

/// Node state status writer
///
/// Owns the last polled interface snapshot and reconciles it into the remote
/// node state object.
///
/// ## Lifecycle
///
/// 1. Create with [`StatusWriter::new()`]
/// 2. Either [`StatusWriter::run_once()`] for a bootstrap pass, or
///    [`StatusWriter::run()`] for the steady loop
/// 3. The loop runs until the stop signal fires
///
/// ## Threading
///
/// The writer runs on a single task and is the only mutator of its own state,
/// so it needs no locks. All remote interaction is serialized: at most one
/// request is in flight at any time.
pub struct StatusWriter {
    /// Name of the node state object
    node_name: String,

    /// Platform kind, selects the discovery variant
    platform: PlatformKind,

    /// Device enumeration
    devices: Box<dyn DeviceSource>,

    /// Platform metadata, virtualized platforms only
    metadata_source: Option<Box<dyn MetadataSource>>,

    /// Remote node state store
    remote: Arc<dyn RemoteStore>,

    /// Notified on every failed remote fetch attempt
    heartbeat: Arc<dyn HeartbeatHandler>,

    /// Bootstrap checkpoint
    checkpoint: CheckpointStore,

    /// Last successfully polled interfaces
    interfaces: Vec<InterfaceExt>,

    /// Cached platform metadata
    metadata: Option<PlatformMetadata>,

    /// Last message received on the refresh channel
    last_message: SyncMessage,

    /// Single bootstrap pass instead of the loop
    run_once: bool,

    /// Passive refresh period
    poll_interval: Duration,

    /// Delay between remote fetch attempts
    fetch_interval: Duration,

    /// Overall budget of one remote fetch
    fetch_timeout: Duration,

    /// Backoff between conflicting updates
    conflict_backoff: BackoffConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<WriterEvent>,
}

impl StatusWriter {
    /// Create a new status writer
    ///
    /// # Parameters
    ///
    /// - `devices`: Device enumeration implementation
    /// - `remote`: Remote store implementation
    /// - `heartbeat`: Handler notified of failed remote fetches
    /// - `config`: Writer configuration
    ///
    /// # Returns
    ///
    /// A tuple of (writer, event_receiver) where event_receiver yields writer events
    pub fn new(
        devices: Box<dyn DeviceSource>,
        remote: Arc<dyn RemoteStore>,
        heartbeat: Arc<dyn HeartbeatHandler>,
        config: WriterConfig,
    ) -> Result<(Self, mpsc::Receiver<WriterEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let writer = Self {
            node_name: config.node_name.clone(),
            platform: config.platform,
            devices,
            metadata_source: None,
            remote,
            heartbeat,
            checkpoint: CheckpointStore::new(&config.checkpoint_dir),
            interfaces: Vec::new(),
            metadata: None,
            last_message: SyncMessage::default(),
            run_once: config.run_once,
            poll_interval: config.poll_interval(),
            fetch_interval: config.fetch.interval(),
            fetch_timeout: config.fetch.timeout(),
            conflict_backoff: config.conflict_backoff,
            event_tx: tx,
        };

        Ok((writer, rx))
    }

    /// Attach a platform metadata source
    pub fn with_metadata_source(mut self, source: Box<dyn MetadataSource>) -> Self {
        self.metadata_source = Some(source);
        self
    }

    /// Last successfully polled interfaces
    pub fn interfaces(&self) -> &[InterfaceExt] {
        &self.interfaces
    }

    /// Checkpoint store used by run-once
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Whether this writer was configured for a single bootstrap pass
    pub fn is_run_once(&self) -> bool {
        self.run_once
    }

    /// Run the steady-state loop
    ///
    /// Events are handled one at a time, in priority order stop > refresh >
    /// timer when several are ready. The stop signal is only observed between
    /// iterations; an in-flight fetch or backoff runs to completion first.
    /// Dropping the stop sender counts as a stop signal.
    ///
    /// # Parameters
    ///
    /// - `stop`: Stop signal
    /// - `refresh`: Refresh messages from the configuration controller
    /// - `sync_complete`: Notified after a refresh whose status is terminal
    pub async fn run(
        &mut self,
        mut stop: oneshot::Receiver<()>,
        mut refresh: mpsc::Receiver<SyncMessage>,
        sync_complete: mpsc::Sender<()>,
    ) -> Result<()> {
        info!("Starting status writer for node {}", self.node_name);
        self.emit_event(WriterEvent::Started {
            node: self.node_name.clone(),
            run_once: false,
        });

        let mut refresh_open = true;

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => {
                    info!("Stop signal received, stopping status writer");
                    self.emit_event(WriterEvent::Stopped {
                        reason: "Stop signal".to_string(),
                    });
                    break;
                }

                msg = refresh.recv(), if refresh_open => {
                    match msg {
                        Some(msg) => self.handle_refresh(msg, &sync_complete).await,
                        None => {
                            warn!("Refresh channel closed, continuing with periodic refresh only");
                            refresh_open = false;
                        }
                    }
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    self.handle_tick().await;
                }
            }
        }

        Ok(())
    }

    /// Single bootstrap pass: poll, push an empty message, write the checkpoint
    ///
    /// A failed poll is logged and the push goes ahead with whatever snapshot
    /// the writer holds. A failed push never writes the checkpoint: a valid
    /// checkpoint already on disk is still returned, otherwise the push error is.
    pub async fn run_once(&mut self) -> Result<InitialState> {
        info!("Running status writer once for node {}", self.node_name);
        self.emit_event(WriterEvent::Started {
            node: self.node_name.clone(),
            run_once: true,
        });

        if let Err(e) = self.poll_device_status().await {
            error!("First poll failed: {}", e);
            self.emit_event(WriterEvent::PollFailed {
                error: e.to_string(),
            });
        }

        let state = match self.push_status(&SyncMessage::default()).await {
            Ok(state) => {
                self.emit_pushed(&state);
                state
            }
            Err(e) => {
                self.emit_event(WriterEvent::PushFailed {
                    error: e.to_string(),
                });
                return self.existing_checkpoint(e).await;
            }
        };

        let initial = self.checkpoint.write_once(&state.status).await?;
        let path = self.checkpoint.path().to_path_buf();
        match initial.origin {
            CheckpointOrigin::Written => self.emit_event(WriterEvent::CheckpointWritten { path }),
            CheckpointOrigin::Existing => self.emit_event(WriterEvent::CheckpointReused { path }),
        }

        Ok(initial)
    }

    /// Fall back to the checkpoint on disk after a failed run-once push
    async fn existing_checkpoint(&self, push_error: Error) -> Result<InitialState> {
        match self.checkpoint.read().await {
            Ok(Some(status)) => {
                warn!(
                    "Push failed ({}), using existing checkpoint {}",
                    push_error,
                    self.checkpoint.path().display()
                );
                self.emit_event(WriterEvent::CheckpointReused {
                    path: self.checkpoint.path().to_path_buf(),
                });
                Ok(InitialState {
                    status,
                    origin: CheckpointOrigin::Existing,
                })
            }
            Ok(None) => Err(push_error),
            Err(e) => {
                debug!("Failed to read checkpoint after failed push: {}", e);
                Err(push_error)
            }
        }
    }

    /// Handle a refresh message
    async fn handle_refresh(&mut self, msg: SyncMessage, sync_complete: &mpsc::Sender<()>) {
        info!("Refresh trigger: syncStatus={:?}", msg.sync_status.as_str());
        self.last_message = msg.clone();

        if let Err(e) = self.poll_device_status().await {
            error!("Device poll failed, skipping status push: {}", e);
            self.emit_event(WriterEvent::PollFailed {
                error: e.to_string(),
            });
            return;
        }

        self.push_and_report(&msg).await;

        if msg.sync_status.is_terminal() {
            if sync_complete.send(()).await.is_err() {
                warn!("Sync-complete receiver dropped, notification lost");
            } else {
                self.emit_event(WriterEvent::SyncCompleted {
                    sync_status: msg.sync_status,
                });
            }
        }
    }

    /// Handle a timer tick
    async fn handle_tick(&mut self) {
        debug!("Periodic refresh");

        if let Err(e) = self.poll_device_status().await {
            error!("Device poll failed, skipping status push: {}", e);
            self.emit_event(WriterEvent::PollFailed {
                error: e.to_string(),
            });
            return;
        }

        let msg = self.last_message.clone();
        self.push_and_report(&msg).await;
    }

    async fn push_and_report(&self, msg: &SyncMessage) {
        match self.push_status(msg).await {
            Ok(state) => self.emit_pushed(&state),
            Err(e) => {
                error!("Failed to push node state status: {}", e);
                self.emit_event(WriterEvent::PushFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Refresh the interface snapshot from the device source
    ///
    /// On virtualized platforms, platform metadata is loaded first if it is
    /// not cached. Failing to load it is not fatal: discovery runs with empty
    /// metadata and loading is tried again on the next poll.
    pub async fn poll_device_status(&mut self) -> Result<()> {
        debug!("Polling device status");

        if self.platform.is_virtual() && self.metadata.is_none() {
            self.metadata = self.load_metadata().await;
        }

        let empty = PlatformMetadata::default();
        let metadata = self
            .platform
            .is_virtual()
            .then(|| self.metadata.as_ref().unwrap_or(&empty));

        let interfaces = self.devices.discover(self.platform, metadata).await?;
        debug!("Discovered {} interface(s)", interfaces.len());
        self.interfaces = interfaces;

        Ok(())
    }

    async fn load_metadata(&self) -> Option<PlatformMetadata> {
        let Some(source) = self.metadata_source.as_ref() else {
            warn!("No platform metadata source configured for {:?}", self.platform);
            return None;
        };

        match source.read_cached().await {
            Ok(metadata) => return Some(metadata),
            Err(e) => error!("Failed to read cached platform metadata: {}", e),
        }

        match source.fetch().await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                error!("Failed to fetch platform metadata: {}", e);
                None
            }
        }
    }

    /// Push the current snapshot and `msg` to the remote node state
    ///
    /// Get-modify-update, retried with backoff when the update conflicts.
    /// Any other failure, including a fetch timeout, ends the attempt.
    pub async fn push_status(&self, msg: &SyncMessage) -> Result<NodeState> {
        let mut backoff = Backoff::new(&self.conflict_backoff);
        let attempts = backoff.steps();
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let mut state = self
                .fetch_remote_state()
                .await
                .map_err(|e| self.update_error(e))?;

            state.status.apply(&self.interfaces, msg);
            info!(
                "Setting node state status: syncStatus={:?}, lastSyncError={:?}",
                state.status.sync_status.as_str(),
                state.status.last_sync_error
            );

            match self.remote.update_status(&state).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() => {
                    warn!(
                        "Update attempt {}/{} for node {} conflicted: {}",
                        attempt, attempts, self.node_name, e
                    );
                    last_conflict = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
                Err(e) => {
                    warn!("Failed to update node state {}: {}", self.node_name, e);
                    return Err(self.update_error(e));
                }
            }
        }

        let source = last_conflict.unwrap_or_else(|| Error::conflict("no update attempted"));
        Err(Error::ConflictRetriesExhausted {
            node: self.node_name.clone(),
            attempts,
            source: Box::new(source),
        })
    }

    /// Fetch the node state, polling until success or the fetch timeout
    ///
    /// The first attempt is immediate. Every failed attempt notifies the
    /// heartbeat handler before waiting for the next one.
    pub async fn fetch_remote_state(&self) -> Result<NodeState> {
        let deadline = Instant::now() + self.fetch_timeout;

        loop {
            match self.remote.get(&self.node_name).await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    warn!(
                        "Failed to fetch node state {} ({}); close all connections and retry...",
                        self.node_name, e
                    );
                    self.heartbeat.on_heartbeat_failure();

                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::FetchTimeout {
                            node: self.node_name.clone(),
                            source: Box::new(e),
                        });
                    }
                    tokio::time::sleep(self.fetch_interval.min(deadline - now)).await;
                }
            }
        }
    }

    fn update_error(&self, e: Error) -> Error {
        Error::StatusUpdate {
            node: self.node_name.clone(),
            source: Box::new(e),
        }
    }

    fn emit_pushed(&self, state: &NodeState) {
        self.emit_event(WriterEvent::StatusPushed {
            sync_status: state.status.sync_status,
            interfaces: state.status.interfaces.len(),
            resource_version: state.resource_version.clone(),
            observed_at: chrono::Utc::now(),
        });
    }

    /// Emit a writer event without blocking the loop
    fn emit_event(&self, event: WriterEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping writer event");
            }
            // No monitor attached
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_events_compare_by_value() {
        let event = WriterEvent::SyncCompleted {
            sync_status: SyncStatus::Succeeded,
        };

        assert_eq!(event.clone(), event);
        assert_ne!(
            event,
            WriterEvent::SyncCompleted {
                sync_status: SyncStatus::Failed
            }
        );
    }
}
