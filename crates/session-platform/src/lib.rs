//! Platform capabilities consumed by the session synchronizer.
//!
//! Every collaborator the synchronizer talks to is a trait here, with an
//! in-memory or file-backed implementation so hosts and tests can inject fakes.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// Host-bridge capability and probes.
pub mod bridge;
/// Wall-clock access.
pub mod clock;
/// JSON-file-backed key-value store.
pub mod file_store;
/// Outbound embedding-frame port.
pub mod frame;

pub use bridge::{
    BridgeAuth, BridgeCommunity, BridgeProbe, HostBridge, NoBridge, StaticBridgeProbe,
    StaticHostBridge,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use file_store::FileStore;
pub use frame::{FramePort, RecordingFramePort, TracingFramePort};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("value not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Persisted string values addressed by `(namespace, key)`.
pub trait KeyValueStore: Send + Sync {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError>;

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set_value(namespace, key, value)
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        (**self).get_value(namespace, key)
    }

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        (**self).delete_value(namespace, key)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl InMemoryStore {
    /// Number of stored entries across all namespaces.
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for InMemoryStore {
    fn set_value(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((namespace.to_owned(), key.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_value(&self, namespace: &str, key: &str) -> Result<String, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn delete_value(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        if data
            .remove(&(namespace.to_owned(), key.to_owned()))
            .is_none()
        {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Store view pinned to one namespace.
#[derive(Clone)]
pub struct ScopedStore<S: KeyValueStore> {
    inner: S,
    namespace: String,
}

impl<S: KeyValueStore> ScopedStore<S> {
    pub fn new(inner: S, namespace: impl Into<String>) -> Self {
        Self {
            inner,
            namespace: namespace.into(),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set_value(&self.namespace, key, value)
    }

    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        self.inner.get_value(&self.namespace, key)
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete_value(&self.namespace, key)
    }
}
