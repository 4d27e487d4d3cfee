// # Checkpoint Store
//
// One-shot capture of the node state status reported at bootstrap.
//
// ## Purpose
//
// The checkpoint records the status the node had when it was first brought
// up, so that later collaborators can compare against the initial state after
// a crash or reboot. It is written once and never updated: as long as the file
// holds a decodable status, writes are skipped.
//
// ## File Format
//
// ```json
// {"interfaces":[{"name":"eth0","pciAddress":"0000:3b:00.0"}],"syncStatus":"Succeeded"}
// ```
//
// ## Concurrency
//
// Single writer only. The file is opened, read and rewritten in place with
// no locking; it is only touched from the run-once path.

use serde::de::Error as _;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::Error;
use crate::traits::NodeStateStatus;

/// Fixed checkpoint file name
pub const CHECKPOINT_FILE_NAME: &str = "sno-initial-node-state.json";

/// Where the effective initial state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOrigin {
    /// The file was empty or corrupt and has just been written
    Written,
    /// The file already held a valid checkpoint
    Existing,
}

/// Bootstrap snapshot exposed to collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialState {
    pub status: NodeStateStatus,
    pub origin: CheckpointOrigin,
}

/// File-backed, write-once checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Create a store for the checkpoint file under `dir`
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(CHECKPOINT_FILE_NAME),
        }
    }

    /// Full path of the checkpoint file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `status` unless a valid checkpoint already exists
    ///
    /// Returns the effective initial state: the decoded existing checkpoint,
    /// or `status` if it was just written.
    pub async fn write_once(&self, status: &NodeStateStatus) -> Result<InitialState, Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !fs::try_exists(parent).await? {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::checkpoint(format!(
                        "Failed to create checkpoint directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let mut options = fs::OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        options.mode(0o644);

        let mut file = options.open(&self.path).await.map_err(|e| {
            Error::checkpoint(format!(
                "Failed to open checkpoint file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::info!("Trying to decode checkpoint file {}", self.path.display());
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;

        match decode(&content) {
            Ok(existing) => {
                tracing::info!("Checkpoint already present, keeping it");
                return Ok(InitialState {
                    status: existing,
                    origin: CheckpointOrigin::Existing,
                });
            }
            Err(e) => {
                tracing::debug!("Failed to decode checkpoint file: {}", e);
            }
        }

        tracing::info!("Writing checkpoint file {}", self.path.display());
        let mut encoded = serde_json::to_vec(status)?;
        encoded.push(b'\n');

        file.set_len(0).await?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&encoded).await?;
        file.flush().await?;
        file.sync_all().await?;

        Ok(InitialState {
            status: status.clone(),
            origin: CheckpointOrigin::Written,
        })
    }

    /// Read the checkpoint without writing
    ///
    /// Returns `Ok(None)` if the file is missing, empty or corrupt.
    pub async fn read(&self) -> Result<Option<NodeStateStatus>, Error> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }

        let content = fs::read(&self.path).await.map_err(|e| {
            Error::checkpoint(format!(
                "Failed to read checkpoint file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(decode(&content).ok())
    }
}

/// Decode the first JSON value in `bytes`; trailing data is ignored
fn decode(bytes: &[u8]) -> Result<NodeStateStatus, serde_json::Error> {
    serde_json::Deserializer::from_slice(bytes)
        .into_iter::<NodeStateStatus>()
        .next()
        .unwrap_or_else(|| Err(serde_json::Error::custom("empty checkpoint file")))
}
