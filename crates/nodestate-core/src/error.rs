//! Error types for the node state writer
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for node state operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the node state writer
#[derive(Error, Debug)]
pub enum Error {
    /// Device enumeration failed
    #[error("Device discovery error: {0}")]
    Discovery(String),

    /// Platform metadata could not be read or fetched
    #[error("Platform metadata error: {0}")]
    Metadata(String),

    /// Remote store request failed (transport, server error, bad response)
    #[error("Remote store error: {0}")]
    RemoteStore(String),

    /// Version token was stale at submission time
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Remote object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication or authorization rejected by the remote store
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Fetching the remote object did not succeed before the poll deadline
    #[error("Timed out trying to fetch node {node}: {source}")]
    FetchTimeout {
        /// Node state object name
        node: String,
        /// Last fetch error seen before the deadline
        #[source]
        source: Box<Error>,
    },

    /// Every conflict retry was used up
    #[error("Unable to update node {node} after {attempts} attempts: {source}")]
    ConflictRetriesExhausted {
        /// Node state object name
        node: String,
        /// Number of update attempts made
        attempts: usize,
        /// Last conflict error
        #[source]
        source: Box<Error>,
    },

    /// Status update failed for a reason other than a conflict
    #[error("Unable to update node {node}: {source}")]
    StatusUpdate {
        /// Node state object name
        node: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Checkpoint file errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a metadata error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a remote store error
    pub fn remote_store(msg: impl Into<String>) -> Self {
        Self::RemoteStore(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a version conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether this error is, or wraps, a fetch timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::FetchTimeout { .. } => true,
            Self::StatusUpdate { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
