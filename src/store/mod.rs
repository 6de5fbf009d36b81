//! Storage Adapters
//!
//! Key-value stores used by the coordination protocol:
//! - Local store: private to one instance, no notifications
//! - Shared store: visible to every instance, mutations notify the others
//!
//! In-memory implementations live in [`memory`].

pub mod memory;

use std::collections::BTreeMap;
use tokio::sync::mpsc;

pub use memory::{MemoryDomain, MemoryStore, SharedMemoryStore};

/// Change notification delivered to the other instances of a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed, `None` when the whole store was cleared
    pub key: Option<String>,
    /// Value after the change, `None` for removals and clears
    pub new_value: Option<String>,
}

impl StorageEvent {
    /// A key was written
    pub fn changed(key: impl Into<String>, new_value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            new_value: Some(new_value.into()),
        }
    }

    /// A key was removed
    pub fn removed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            new_value: None,
        }
    }

    /// The entire store was cleared
    pub fn cleared() -> Self {
        Self {
            key: None,
            new_value: None,
        }
    }

    /// Check if this event reports a cleared store
    pub fn is_clear(&self) -> bool {
        self.key.is_none()
    }
}

/// String key-value operations common to both stores
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);

    fn clear(&self);
}

/// Per-instance store
pub trait LocalStore: KeyValueStore {
    /// Copy of every entry currently held
    fn snapshot(&self) -> BTreeMap<String, String>;
}

/// Store visible to all instances of a coordination domain
pub trait SharedStore: KeyValueStore {
    /// Start receiving notifications for mutations made by other instances.
    ///
    /// A handle holds at most one subscription; subscribing again replaces it
    /// and closes the previous receiver.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<StorageEvent>;

    /// Stop receiving notifications
    fn unsubscribe(&self);
}
