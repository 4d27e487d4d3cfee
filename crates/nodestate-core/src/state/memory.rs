// # Memory Remote Store
//
// In-memory implementation of RemoteStore.
//
// ## Purpose
//
// Holds node state objects in a HashMap and enforces the same optimistic
// concurrency contract as a real control plane: every successful status
// update bumps the object's resource version, and an update carrying a stale
// version is rejected with a conflict error.
//
// ## When to Use
//
// - Testing environments
// - Embedding the writer without a control plane

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::{NodeState, RemoteStore};

/// In-memory remote store implementation
///
/// Clones share the same underlying objects, so a test can keep a handle
/// while the writer owns another.
///
/// # Example
///
/// ```rust,no_run
/// use nodestate_core::state::MemoryRemoteStore;
/// use nodestate_core::traits::{NodeState, RemoteStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRemoteStore::new();
///     store.insert(NodeState::new("worker-0")).await;
///
///     let state = store.get("worker-0").await?;
///     let updated = store.update_status(&state).await?;
///     assert_ne!(state.resource_version, updated.resource_version);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    objects: Arc<RwLock<HashMap<String, NodeState>>>,
    version: Arc<AtomicU64>,
}

impl MemoryRemoteStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, assigning it a fresh resource version
    pub async fn insert(&self, mut state: NodeState) -> NodeState {
        state.resource_version = self.next_version();
        self.objects
            .write()
            .await
            .insert(state.name.clone(), state.clone());
        state
    }

    /// Snapshot of an object, if present
    pub async fn snapshot(&self, name: &str) -> Option<NodeState> {
        self.objects.read().await.get(name).cloned()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, name: &str) -> Result<NodeState, Error> {
        self.objects
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("node state {}", name)))
    }

    async fn update_status(&self, state: &NodeState) -> Result<NodeState, Error> {
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&state.name)
            .ok_or_else(|| Error::not_found(format!("node state {}", state.name)))?;

        if stored.resource_version != state.resource_version {
            return Err(Error::conflict(format!(
                "node state {} has version {}, update carried {}",
                state.name, stored.resource_version, state.resource_version
            )));
        }

        stored.status = state.status.clone();
        stored.resource_version = self.next_version();
        Ok(stored.clone())
    }
}
