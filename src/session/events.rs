//! Session Events
//!
//! Signals the host environment feeds into a coordinator, and the events a
//! coordinator publishes back.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// User interaction kinds that may count as activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Click,
    KeyPress,
    Touch,
    Scroll,
    MouseMove,
    Focus,
}

impl ActivityKind {
    /// Kinds that reset the inactivity deadline unless configured otherwise
    pub fn defaults() -> Vec<Self> {
        vec![Self::Click, Self::KeyPress, Self::Touch, Self::Scroll]
    }
}

/// Why a started session went back to idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// `end()` was called on this instance
    Ended,
    /// The inactivity deadline elapsed on this instance
    TimedOut,
    /// Another instance cleared the shared store
    ClearedByPeer,
}

impl SessionEnd {
    /// Whether this instance decided to end the session for everyone
    pub fn is_self_initiated(&self) -> bool {
        matches!(self, Self::Ended | Self::TimedOut)
    }
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ended => write!(f, "ended"),
            Self::TimedOut => write!(f, "timed out"),
            Self::ClearedByPeer => write!(f, "cleared by peer"),
        }
    }
}

/// Session data change received from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionUpdate {
    /// A peer snapshot was merged into the local store
    Synced { entries: usize },
    /// A peer removed a key
    Removed { key: String },
}

/// Events published by a coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// This instance took identity 0
    BecameMaster { identity: u64 },
    /// Replicated data changed
    Updated { update: SessionUpdate },
    /// The session ended on this instance
    Ended { reason: SessionEnd },
    /// This instance left the domain without ending the session
    Closed { identity: u64 },
}

/// Broadcast source for host-environment notifications
#[derive(Debug, Clone)]
pub struct SignalSource<T: Clone> {
    tx: broadcast::Sender<T>,
}

/// User activity notifications
pub type ActivitySource = SignalSource<ActivityKind>;

/// "About to terminate" notifications
pub type LifecycleSource = SignalSource<()>;

impl<T: Clone> SignalSource<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Deliver a signal, returning how many subscribers received it
    pub fn notify(&self, signal: T) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Default for SignalSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::Ended {
            reason: SessionEnd::TimedOut,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"ended\""));
        assert!(json.contains("timed_out"));
    }

    #[test]
    fn test_signal_without_subscribers() {
        let source = ActivitySource::new();
        assert_eq!(source.notify(ActivityKind::Click), 0);

        let mut rx = source.subscribe();
        assert_eq!(source.notify(ActivityKind::Scroll), 1);
        assert_eq!(rx.try_recv().unwrap(), ActivityKind::Scroll);
    }

    #[test]
    fn test_self_initiated_ends() {
        assert!(SessionEnd::Ended.is_self_initiated());
        assert!(SessionEnd::TimedOut.is_self_initiated());
        assert!(!SessionEnd::ClearedByPeer.is_self_initiated());
    }
}
