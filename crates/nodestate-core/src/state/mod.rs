// # State Implementations
//
// Local checkpoint persistence and an in-memory implementation of the
// RemoteStore trait.

pub mod checkpoint;
pub mod memory;

pub use checkpoint::{CHECKPOINT_FILE_NAME, CheckpointOrigin, CheckpointStore, InitialState};
pub use memory::MemoryRemoteStore;
