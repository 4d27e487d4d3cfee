// # nodestate-core
//
// Core library for the SR-IOV node state status writer.
//
// ## Architecture Overview
//
// This library keeps a remote node state object in sync with the node's
// network hardware:
// - **DeviceSource**: Trait for enumerating SR-IOV capable interfaces
// - **MetadataSource**: Trait for platform metadata on virtualized nodes
// - **RemoteStore**: Trait for the versioned remote node state object
// - **HeartbeatHandler**: Callback signaled on failed remote fetches
// - **StatusWriter**: Engine that polls devices and pushes status updates
// - **CheckpointStore**: Write-once capture of the bootstrap status
//
// ## Design Principles
//
// 1. **Single Writer**: One task owns the snapshot; no locks on the hot path
// 2. **Optimistic Concurrency**: Conflicting updates are re-read and retried
// 3. **Library-First**: All core functionality can be used as a library

pub mod traits;
pub mod engine;
pub mod config;
pub mod error;
pub mod state;

// Re-export core types for convenience
pub use traits::{DeviceSource, HeartbeatHandler, MetadataSource, RemoteStore};
pub use engine::{StatusWriter, WriterEvent};
pub use config::{BackoffConfig, FetchConfig, WriterConfig};
pub use error::{Error, Result};
pub use state::{CheckpointStore, InitialState, MemoryRemoteStore};
