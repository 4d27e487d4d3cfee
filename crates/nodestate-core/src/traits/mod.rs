//! Core traits for the node state writer
//!
//! This module defines the abstract interfaces to the writer's collaborators.
//!
//! - [`DeviceSource`]: Enumerate network interfaces on the node
//! - [`MetadataSource`]: Platform metadata for virtualized platforms
//! - [`RemoteStore`]: Versioned remote node state object
//! - [`HeartbeatHandler`]: Reaction to failed remote fetches

pub mod device_source;
pub mod metadata_source;
pub mod remote_store;

pub use device_source::{DeviceSource, InterfaceExt, PlatformKind, VirtualFunction};
pub use metadata_source::{
    MetadataSource, OpenStackDevice, OpenStackLink, OpenStackMetaData, OpenStackNetwork,
    OpenStackNetworkData, PlatformMetadata,
};
pub use remote_store::{
    HeartbeatHandler, NodeState, NodeStateStatus, NoopHeartbeat, RemoteStore, SyncMessage,
    SyncStatus,
};
