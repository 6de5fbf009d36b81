//! Replication Engine
//!
//! Local writes are pushed to peers as whole-store snapshots over the shared
//! store. Every broadcast is a transient signal: the channel key is written and
//! immediately removed, so peers observe the write as "changed now" and nothing
//! durable is left behind.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{SessionError, SessionResult};
use super::keys::{
    ReservedKeys, CLOSED_CHANNEL_KEY, GET_CHANNEL_KEY, INSTANCE_ID_KEY, REMOVE_CHANNEL_KEY,
    SET_CHANNEL_KEY,
};
use crate::store::{LocalStore, SharedStore, StorageEvent};

/// Broadcast channels carried over the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Full snapshot of the sender's local store
    Set,
    /// One key removed
    Remove,
    /// Slave asking the master for a snapshot
    Get,
    /// Instance leaving the domain
    Closed,
}

impl Channel {
    pub fn key(self) -> &'static str {
        match self {
            Self::Set => SET_CHANNEL_KEY,
            Self::Remove => REMOVE_CHANNEL_KEY,
            Self::Get => GET_CHANNEL_KEY,
            Self::Closed => CLOSED_CHANNEL_KEY,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            SET_CHANNEL_KEY => Some(Self::Set),
            REMOVE_CHANNEL_KEY => Some(Self::Remove),
            GET_CHANNEL_KEY => Some(Self::Get),
            CLOSED_CHANNEL_KEY => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Payload of a removal broadcast
#[derive(Debug, Serialize, Deserialize)]
struct RemovePayload {
    key: String,
}

/// Broadcast decoded from a peer's change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    Snapshot(BTreeMap<String, String>),
    Remove(String),
    SyncRequest,
    Closed(u64),
    /// The shared store was cleared
    Cleared,
}

impl Broadcast {
    /// Decode a notification.
    ///
    /// Returns `None` for retractions, keys outside the protocol and payloads
    /// that fail to parse.
    pub fn decode(event: &StorageEvent) -> Option<Self> {
        let Some(key) = event.key.as_deref() else {
            return Some(Self::Cleared);
        };
        let channel = Channel::from_key(key)?;
        let payload = event.new_value.as_deref()?;

        let decoded = match channel {
            Channel::Set => serde_json::from_str(payload)
                .map(Self::Snapshot)
                .map_err(|e| e.to_string()),
            Channel::Remove => serde_json::from_str::<RemovePayload>(payload)
                .map(|p| Self::Remove(p.key))
                .map_err(|e| e.to_string()),
            Channel::Get => Ok(Self::SyncRequest),
            Channel::Closed => payload
                .trim()
                .parse()
                .map(Self::Closed)
                .map_err(|e: std::num::ParseIntError| e.to_string()),
        };

        match decoded {
            Ok(broadcast) => Some(broadcast),
            Err(e) => {
                debug!("Dropping malformed {} broadcast: {}", key, e);
                None
            }
        }
    }
}

/// Write a transient signal on `channel`
pub(crate) fn signal(shared: &dyn SharedStore, channel: Channel, payload: &str) {
    shared.set(channel.key(), payload);
    shared.remove(channel.key());
}

pub struct Replicator {
    local: Arc<dyn LocalStore>,
    shared: Arc<dyn SharedStore>,
    reserved: ReservedKeys,
}

impl Replicator {
    pub fn new(
        local: Arc<dyn LocalStore>,
        shared: Arc<dyn SharedStore>,
        reserved: ReservedKeys,
    ) -> Self {
        Self {
            local,
            shared,
            reserved,
        }
    }

    /// Reject keys the protocol owns
    pub fn check_key(&self, key: &str) -> SessionResult<()> {
        if self.reserved.contains(key) {
            return Err(SessionError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Write a serialized value and replicate it
    pub fn write(&self, key: &str, raw: &str) -> SessionResult<()> {
        self.check_key(key)?;
        self.store(key, raw);
        Ok(())
    }

    /// Remove a key and replicate the removal
    pub fn remove(&self, key: &str) -> SessionResult<()> {
        self.check_key(key)?;
        self.discard(key);
        Ok(())
    }

    pub fn read(&self, key: &str) -> Option<String> {
        self.local.get(key)
    }

    /// Unchecked write, also used for the token and deadline keys
    pub(crate) fn store(&self, key: &str, raw: &str) {
        self.local.set(key, raw);
        self.broadcast_snapshot();
    }

    /// Unchecked removal
    pub(crate) fn discard(&self, key: &str) {
        self.local.remove(key);

        let payload = RemovePayload {
            key: key.to_string(),
        };
        match serde_json::to_string(&payload) {
            Ok(payload) => signal(self.shared.as_ref(), Channel::Remove, &payload),
            Err(e) => warn!("Failed to encode removal of {}: {}", key, e),
        }
    }

    /// Send the whole local store to every peer
    pub fn broadcast_snapshot(&self) {
        let snapshot = self.local.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(payload) => signal(self.shared.as_ref(), Channel::Set, &payload),
            Err(e) => warn!("Failed to encode session snapshot: {}", e),
        }
    }

    /// Ask the master for a full snapshot
    pub fn request_sync(&self, requester: u64) {
        debug!("Instance {} requesting session snapshot", requester);
        signal(self.shared.as_ref(), Channel::Get, &requester.to_string());
    }

    /// Merge a peer snapshot, returning how many entries were applied.
    ///
    /// The local identity is never taken from a snapshot.
    pub fn apply_snapshot(&self, snapshot: &BTreeMap<String, String>) -> usize {
        let mut applied = 0;
        for (key, value) in snapshot {
            if key == INSTANCE_ID_KEY {
                continue;
            }
            self.local.set(key, value);
            applied += 1;
        }
        applied
    }

    pub fn apply_remove(&self, key: &str) {
        self.local.remove(key);
    }
}
