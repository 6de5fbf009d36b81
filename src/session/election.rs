//! Election Policy
//!
//! Roles derive from identity alone: identity 0 is master. Identities stay a
//! dense sequence starting at 0, so when a peer with a lower identity leaves,
//! every survivor above it shifts down by one on its own, without a
//! renumbering broadcast.
//!
//! Two departures at once, or an instance that vanishes without announcing
//! itself, can leave duplicate identities or gaps; nothing repairs them.

use serde::{Deserialize, Serialize};

/// Role of a started instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    pub fn of(identity: u64) -> Self {
        if is_master(identity) {
            Self::Master
        } else {
            Self::Slave
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Slave => write!(f, "slave"),
        }
    }
}

pub fn is_master(identity: u64) -> bool {
    identity == 0
}

/// Effect of a peer departure on this instance's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Succession {
    /// The departed peer was above us
    Retained,
    /// Shifted down but still a slave
    Shifted(u64),
    /// Shifted down to identity 0
    Promoted,
}

impl Succession {
    /// Identity after applying this outcome to `current`
    pub fn identity(&self, current: u64) -> u64 {
        match self {
            Self::Retained => current,
            Self::Shifted(identity) => *identity,
            Self::Promoted => 0,
        }
    }
}

/// Re-derive `mine` after the peer holding `closed` left
pub fn succession(mine: u64, closed: u64) -> Succession {
    if closed >= mine {
        return Succession::Retained;
    }
    match mine - 1 {
        0 => Succession::Promoted,
        next => Succession::Shifted(next),
    }
}
