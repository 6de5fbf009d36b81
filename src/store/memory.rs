//! In-Memory Stores
//!
//! DashMap-backed stores for running several instances inside one process.
//! A [`MemoryDomain`] plays the role of the shared storage area; every instance
//! connects to it through its own [`SharedMemoryStore`] handle so that
//! notifications skip the instance that caused them.

use dashmap::DashMap;
use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{KeyValueStore, LocalStore, SharedStore, StorageEvent};

/// Instance-local in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

impl LocalStore for MemoryStore {
    fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

/// Shared storage area for one coordination domain
#[derive(Debug, Clone, Default)]
pub struct MemoryDomain {
    inner: Arc<DomainInner>,
}

#[derive(Debug, Default)]
struct DomainInner {
    /// Stored entries (key -> value)
    entries: DashMap<String, String>,
    /// Subscribed instances (origin -> notification sender)
    watchers: DashMap<Uuid, mpsc::UnboundedSender<StorageEvent>>,
}

impl MemoryDomain {
    /// Create an empty domain
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new instance to the domain
    pub fn connect(&self) -> SharedMemoryStore {
        let origin = Uuid::new_v4();
        debug!("Instance {} connected to shared domain", origin);
        SharedMemoryStore {
            origin,
            domain: Arc::clone(&self.inner),
        }
    }

    /// Read an entry without going through an instance handle
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.entries.get(key).map(|v| v.value().clone())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Number of instances currently subscribed to notifications
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.len()
    }
}

impl DomainInner {
    /// Deliver an event to every watcher except its origin
    fn notify(&self, origin: Uuid, event: StorageEvent) {
        let mut closed = Vec::new();

        for watcher in self.watchers.iter() {
            if *watcher.key() == origin {
                continue;
            }
            if watcher.value().send(event.clone()).is_err() {
                closed.push(*watcher.key());
            }
        }

        // Receivers dropped without unsubscribing
        for id in closed {
            trace!("Dropping closed watcher {}", id);
            self.watchers.remove(&id);
        }
    }
}

/// One instance's handle on a [`MemoryDomain`]
#[derive(Debug, Clone)]
pub struct SharedMemoryStore {
    origin: Uuid,
    domain: Arc<DomainInner>,
}

impl KeyValueStore for SharedMemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.domain.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        let previous = self.domain.entries.insert(key.to_string(), value.to_string());

        // Writing an identical value is not a change
        if previous.as_deref() != Some(value) {
            self.domain
                .notify(self.origin, StorageEvent::changed(key, value));
        }
    }

    fn remove(&self, key: &str) {
        if self.domain.entries.remove(key).is_some() {
            self.domain.notify(self.origin, StorageEvent::removed(key));
        }
    }

    fn clear(&self) {
        if self.domain.entries.is_empty() {
            return;
        }
        self.domain.entries.clear();
        self.domain.notify(self.origin, StorageEvent::cleared());
    }
}

impl SharedStore for SharedMemoryStore {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StorageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.domain.watchers.insert(self.origin, tx);
        rx
    }

    fn unsubscribe(&self) {
        self.domain.watchers.remove(&self.origin);
    }
}
