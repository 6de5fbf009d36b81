//! Session Mesh
//!
//! Coordinates concurrently running instances of one application that share a
//! key-value store, so they behave as a single session: one master, replicated
//! session data and a common inactivity timeout.
//!
//! Stores, timers and host signals are injected; in-memory and Tokio-backed
//! implementations are provided for running several instances in one process.

pub mod session;
pub mod store;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use session::{
    ActivityKind, ActivitySource, LifecycleSource, Role, SessionConfig, SessionCoordinator,
    SessionEnd, SessionError, SessionEvent, SessionResult, SessionSettings,
};
pub use store::{KeyValueStore, LocalStore, MemoryDomain, MemoryStore, SharedStore};
pub use timer::{Clock, SystemClock, TimerService, TokioTimer};
