//! Configuration types for the node state writer
//!
//! This module defines the configuration consumed by [`StatusWriter`].
//!
//! [`StatusWriter`]: crate::engine::StatusWriter

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::traits::PlatformKind;

/// Main writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Name of the node state object (the node name)
    pub node_name: String,

    /// Platform the node runs on
    #[serde(default)]
    pub platform: PlatformKind,

    /// Directory holding the checkpoint file
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Run a single poll/push/checkpoint pass instead of the loop
    #[serde(default)]
    pub run_once: bool,

    /// Period of the passive refresh timer (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Remote fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Backoff applied between conflicting status updates
    #[serde(default)]
    pub conflict_backoff: BackoffConfig,

    /// Capacity of the writer event channel
    ///
    /// When full, events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl WriterConfig {
    /// Create a configuration with defaults for the given node
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            platform: PlatformKind::default(),
            checkpoint_dir: default_checkpoint_dir(),
            run_once: false,
            poll_interval_secs: default_poll_interval_secs(),
            fetch: FetchConfig::default(),
            conflict_backoff: BackoffConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Set the platform kind
    pub fn with_platform(mut self, platform: PlatformKind) -> Self {
        self.platform = platform;
        self
    }

    /// Set the checkpoint directory
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.node_name.trim().is_empty() {
            return Err(crate::Error::config("node name cannot be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("poll interval must be > 0"));
        }
        if self.checkpoint_dir.as_os_str().is_empty() {
            return Err(crate::Error::config("checkpoint directory cannot be empty"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event channel capacity must be > 0"));
        }

        self.fetch.validate()?;
        self.conflict_backoff.validate()?;

        Ok(())
    }

    /// Period of the passive refresh timer
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Bounded polling of the remote object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Delay between fetch attempts (in seconds)
    #[serde(default = "default_fetch_interval_secs")]
    pub interval_secs: u64,

    /// Overall time budget for one fetch (in seconds)
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_secs == 0 {
            return Err(crate::Error::config("fetch interval must be > 0"));
        }
        if self.timeout_secs < self.interval_secs {
            return Err(crate::Error::config(
                "fetch timeout must not be shorter than the fetch interval",
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_fetch_interval_secs(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

/// Exponential backoff with jitter
///
/// Defaults match the Kubernetes client's conflict backoff: 4 attempts,
/// 10ms initial delay, factor 5, 10% jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry (in milliseconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied to the delay after every retry
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Up to this fraction of the delay is added at random
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Total number of attempts, including the first one
    #[serde(default = "default_steps")]
    pub steps: usize,
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.steps == 0 {
            return Err(crate::Error::config("backoff steps must be > 0"));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(crate::Error::config("backoff factor must be >= 1.0"));
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(crate::Error::config("backoff jitter must be >= 0.0"));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            factor: default_factor(),
            jitter: default_jitter(),
            steps: default_steps(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("/host/etc/sriov-operator")
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    100
}

fn default_fetch_interval_secs() -> u64 {
    10
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_factor() -> f64 {
    5.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_steps() -> usize {
    4
}
