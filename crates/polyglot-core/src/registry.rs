//! The shared registry of [`ServerRecord`]s, keyed by `base_key`.
//!
//! The Manager is the sole owner of this registry; the router, supervisor
//! and HTTP listener each hold a clone of the `Arc` (a non-owning, shared
//! handle) rather than an owning link back to a `Manager` struct.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::model::ServerRecord;

pub type ServerHandle = Arc<Mutex<ServerRecord>>;

/// `Arc<RwLock<...>>` so lookups (the common case: one HTTP request or one
/// inbound message per server) don't contend with each other; only
/// insert/remove (`start_server`/`delete`) take the write lock.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<String, ServerHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, base_key: String, record: ServerRecord) -> ServerHandle {
        let handle = Arc::new(Mutex::new(record));
        self.inner.write().await.insert(base_key, handle.clone());
        handle
    }

    pub async fn get(&self, base_key: &str) -> Option<ServerHandle> {
        self.inner.read().await.get(base_key).cloned()
    }

    pub async fn remove(&self, base_key: &str) -> Option<ServerHandle> {
        self.inner.write().await.remove(base_key)
    }

    pub async fn contains(&self, base_key: &str) -> bool {
        self.inner.read().await.contains_key(base_key)
    }

    pub async fn base_keys(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all_handles(&self) -> Vec<ServerHandle> {
        self.inner.read().await.values().cloned().collect()
    }
}
