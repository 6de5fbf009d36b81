//! Reserved Keys
//!
//! Names the protocol owns in the local and shared stores.

/// Local store: this instance's identity
pub const INSTANCE_ID_KEY: &str = "instanceId";
/// Shared store: live instance count
pub const INSTANCE_COUNT_KEY: &str = "instanceCount";
/// Shared store: full snapshot broadcast
pub const SET_CHANNEL_KEY: &str = "sessionSet";
/// Shared store: single key removal broadcast
pub const REMOVE_CHANNEL_KEY: &str = "sessionRemove";
/// Shared store: snapshot request from a slave
pub const GET_CHANNEL_KEY: &str = "sessionGet";
/// Shared store: departing instance announcement
pub const CLOSED_CHANNEL_KEY: &str = "instanceClosed";

/// Fixed protocol keys, independent of configuration
pub const PROTOCOL_KEYS: [&str; 6] = [
    INSTANCE_ID_KEY,
    INSTANCE_COUNT_KEY,
    SET_CHANNEL_KEY,
    REMOVE_CHANNEL_KEY,
    GET_CHANNEL_KEY,
    CLOSED_CHANNEL_KEY,
];

pub fn is_protocol_key(key: &str) -> bool {
    PROTOCOL_KEYS.contains(&key)
}

/// Every key callers may not write through the public surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedKeys {
    token: String,
    inactive_timeout: String,
}

impl ReservedKeys {
    pub fn new(token: impl Into<String>, inactive_timeout: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            inactive_timeout: inactive_timeout.into(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        key == self.token || key == self.inactive_timeout || is_protocol_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        PROTOCOL_KEYS
            .into_iter()
            .chain([self.token.as_str(), self.inactive_timeout.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_keys() {
        let reserved = ReservedKeys::new("jwt", "idleUntil");
        assert!(reserved.contains("jwt"));
        assert!(reserved.contains("idleUntil"));
        assert!(reserved.contains(GET_CHANNEL_KEY));
        assert!(!reserved.contains("token"));
        assert_eq!(reserved.iter().count(), 8);
    }
}
