//! Session Coordination Module
//!
//! One logical session across every instance sharing a storage domain:
//! - Instance registration through a shared live-instance counter
//! - Master election derived from identity, with hand-off on departure
//! - Snapshot replication over transient shared-store signals
//! - Inactivity deadline synchronized across instances

pub mod config;
pub mod coordinator;
pub mod election;
pub mod error;
pub mod events;
pub mod inactivity;
pub mod keys;
pub mod registry;
pub mod replication;

pub use config::{SessionConfig, SessionSettings};
pub use coordinator::{CoordinatorBuilder, SessionCoordinator};
pub use election::Role;
pub use error::{SessionError, SessionResult};
pub use events::{
    ActivityKind, ActivitySource, LifecycleSource, SessionEnd, SessionEvent, SessionUpdate,
    SignalSource,
};
