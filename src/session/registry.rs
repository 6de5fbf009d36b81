//! Instance Registry
//!
//! Tracks live instances through a counter in the shared store and hands out
//! identities. Registration reads then writes the counter without a lock, so two
//! instances registering at the same moment may share an identity.

use log::{debug, info};
use std::sync::Arc;

use super::keys::{INSTANCE_COUNT_KEY, INSTANCE_ID_KEY};
use super::replication::{signal, Channel};
use crate::store::{LocalStore, SharedStore};

pub struct InstanceRegistry {
    local: Arc<dyn LocalStore>,
    shared: Arc<dyn SharedStore>,
}

impl InstanceRegistry {
    pub fn new(local: Arc<dyn LocalStore>, shared: Arc<dyn SharedStore>) -> Self {
        Self { local, shared }
    }

    /// Live instance count; missing or unparsable counts as zero
    pub fn instance_count(&self) -> u64 {
        self.shared
            .get(INSTANCE_COUNT_KEY)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Join the domain, returning the assigned identity
    pub fn register(&self) -> u64 {
        let identity = self.instance_count();
        // A corrupt counter may already sit at the top of the range
        let live = identity.saturating_add(1);
        self.persist_identity(identity);
        self.shared.set(INSTANCE_COUNT_KEY, &live.to_string());

        info!("Registered instance {} ({} live)", identity, live);
        identity
    }

    /// Leave the domain and announce the departure to peers
    pub fn deregister(&self, identity: u64) {
        self.local.remove(INSTANCE_ID_KEY);
        signal(self.shared.as_ref(), Channel::Closed, &identity.to_string());

        let remaining = self.instance_count().saturating_sub(1);
        self.shared.set(INSTANCE_COUNT_KEY, &remaining.to_string());

        info!("Deregistered instance {} ({} live)", identity, remaining);
    }

    pub fn persist_identity(&self, identity: u64) {
        debug!("Persisting identity {}", identity);
        self.local.set(INSTANCE_ID_KEY, &identity.to_string());
    }

}
