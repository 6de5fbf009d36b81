//! Session Coordinator
//!
//! Façade tying registry, election, replication and inactivity tracking into
//! one logical session shared by every instance of a domain.
//!
//! A started coordinator owns a driver task that handles one external event at
//! a time: shared-store notifications, its inactivity timer, activity signals
//! and the lifecycle signal. User callbacks never run while internal state is
//! locked, so they may call back into the coordinator.

use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::config::{Callbacks, SessionConfig, SessionSettings};
use super::election::{self, Role, Succession};
use super::error::SessionResult;
use super::events::{
    ActivityKind, ActivitySource, LifecycleSource, SessionEnd, SessionEvent, SessionUpdate,
};
use super::inactivity::{Activity, InactivityTracker};
use super::registry::InstanceRegistry;
use super::replication::{Broadcast, Replicator};
use crate::store::{LocalStore, SharedStore, StorageEvent};
use crate::timer::{Clock, SystemClock, TimerCallback, TimerService, TokioTimer};

/// Signals routed into the driver from outside the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverSignal {
    DeadlineReached,
}

/// Running driver task of a started coordinator
struct Driver {
    signal_tx: mpsc::UnboundedSender<DriverSignal>,
    stop_tx: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

impl Driver {
    fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
struct CoordinatorState {
    /// Assigned identity, `None` while idle
    identity: Option<u64>,
    driver: Option<Driver>,
}

struct Inner {
    settings: SessionSettings,
    callbacks: Callbacks,
    local: Arc<dyn LocalStore>,
    shared: Arc<dyn SharedStore>,
    registry: InstanceRegistry,
    replicator: Replicator,
    tracker: InactivityTracker,
    activity: Option<ActivitySource>,
    lifecycle: Option<LifecycleSource>,
    state: Mutex<CoordinatorState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

/// Builder injecting the collaborators of a [`SessionCoordinator`]
pub struct CoordinatorBuilder {
    config: SessionConfig,
    local: Arc<dyn LocalStore>,
    shared: Arc<dyn SharedStore>,
    timer: Option<Arc<dyn TimerService>>,
    clock: Option<Arc<dyn Clock>>,
    activity: Option<ActivitySource>,
    lifecycle: Option<LifecycleSource>,
}

impl CoordinatorBuilder {
    /// Timer used for the inactivity deadline, [`TokioTimer`] by default
    pub fn with_timer(mut self, timer: Arc<dyn TimerService>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Clock used for deadlines, [`SystemClock`] by default
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Source of user activity; without one the deadline is only reset by `start`
    pub fn with_activity(mut self, source: ActivitySource) -> Self {
        self.activity = Some(source);
        self
    }

    /// Source of the "about to terminate" signal that triggers [`SessionCoordinator::close`]
    pub fn with_lifecycle(mut self, source: LifecycleSource) -> Self {
        self.lifecycle = Some(source);
        self
    }

    /// Validate the settings and assemble the coordinator
    pub fn build(self) -> SessionResult<SessionCoordinator> {
        let SessionConfig {
            settings,
            callbacks,
        } = self.config;
        settings.validate()?;

        let timer = self
            .timer
            .unwrap_or_else(|| Arc::new(TokioTimer::new()) as Arc<dyn TimerService>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let registry = InstanceRegistry::new(Arc::clone(&self.local), Arc::clone(&self.shared));
        let replicator = Replicator::new(
            Arc::clone(&self.local),
            Arc::clone(&self.shared),
            settings.reserved_keys(),
        );
        let tracker = InactivityTracker::new(
            settings.inactive_timeout_key.clone(),
            settings.time_limit(),
            clock,
            timer,
        );
        let (event_tx, _) = broadcast::channel(256);

        Ok(SessionCoordinator {
            inner: Arc::new(Inner {
                settings,
                callbacks,
                local: self.local,
                shared: self.shared,
                registry,
                replicator,
                tracker,
                activity: self.activity,
                lifecycle: self.lifecycle,
                state: Mutex::new(CoordinatorState::default()),
                event_tx,
            }),
        })
    }
}

/// One instance's view of the shared session
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Create an idle coordinator with the default timer and clock
    pub fn new(
        config: SessionConfig,
        local: Arc<dyn LocalStore>,
        shared: Arc<dyn SharedStore>,
    ) -> SessionResult<Self> {
        Self::builder(config, local, shared).build()
    }

    /// Start building a coordinator with custom collaborators
    pub fn builder(
        config: SessionConfig,
        local: Arc<dyn LocalStore>,
        shared: Arc<dyn SharedStore>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            local,
            shared,
            timer: None,
            clock: None,
            activity: None,
            lifecycle: None,
        }
    }

    /// Join the domain and start the session on this instance.
    ///
    /// Calling `start` on a started coordinator does nothing. Must be called
    /// from within a Tokio runtime.
    pub fn start(&self) -> &Self {
        self.inner.start();
        self
    }

    /// End the session on every instance
    pub fn end(&self) {
        self.inner.terminate(SessionEnd::Ended);
    }

    /// Leave the domain without ending the session for peers
    pub fn close(&self) {
        self.inner.close();
    }

    /// Store a value and replicate it to every instance
    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SessionResult<()> {
        self.inner.replicator.check_key(key)?;
        let raw = serde_json::to_string(value)?;
        self.inner.replicator.write(key, &raw)
    }

    /// Remove a value on every instance
    pub fn remove_item(&self, key: &str) -> SessionResult<()> {
        self.inner.replicator.remove(key)
    }

    /// Read a replicated value as JSON
    pub fn get_item(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read_json(key)
    }

    /// Read a replicated value into `T`
    pub fn get_item_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.read_json(key)
    }

    /// Whether the inactivity deadline is still ahead.
    ///
    /// Unless `no_refresh` is set, a live deadline reschedules the timer for
    /// the remaining time and an elapsed one ends the session.
    pub fn check_inactivity(&self, no_refresh: bool) -> bool {
        self.inner.check_inactivity(no_refresh)
    }

    /// Live instance count of the domain
    pub fn instances(&self) -> u64 {
        self.inner.registry.instance_count()
    }

    /// Identity within the domain, `None` while idle
    pub fn identity(&self) -> Option<u64> {
        self.inner.identity()
    }

    /// Role derived from the current identity
    pub fn role(&self) -> Option<Role> {
        self.identity().map(Role::of)
    }

    /// Check if this instance is master
    pub fn master(&self) -> bool {
        self.role() == Some(Role::Master)
    }

    /// Check if this instance is a started slave
    pub fn slave(&self) -> bool {
        self.role() == Some(Role::Slave)
    }

    /// Whether this coordinator holds an identity
    pub fn is_started(&self) -> bool {
        self.identity().is_some()
    }

    /// Whether a session exists anywhere in the domain.
    ///
    /// True when this instance holds a token with a live deadline, or when any
    /// instance is registered (this one may not have synced the token yet).
    pub fn is_session_started(&self) -> bool {
        let has_token = self.inner.local.get(&self.inner.settings.token_key).is_some();
        (has_token && self.check_inactivity(true)) || self.instances() > 0
    }

    /// Stored inactivity deadline
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.inner.tracker.deadline(self.inner.local.as_ref())
    }

    /// Local key holding the inactivity deadline
    pub fn inactive_timeout_key(&self) -> &str {
        &self.inner.settings.inactive_timeout_key
    }

    /// Inactivity limit as a duration
    pub fn inactive_time_limit(&self) -> Duration {
        self.inner.tracker.limit()
    }

    /// Local key holding the session token
    pub fn token_key(&self) -> &str {
        &self.inner.settings.token_key
    }

    /// Read the session token
    pub fn token<T: DeserializeOwned>(&self) -> Option<T> {
        self.inner.read_json(&self.inner.settings.token_key)
    }

    /// Store the session token and replicate it
    pub fn set_token<T: Serialize + ?Sized>(&self, token: &T) -> SessionResult<()> {
        let raw = serde_json::to_string(token)?;
        self.inner
            .replicator
            .store(&self.inner.settings.token_key, &raw);
        Ok(())
    }

    /// Remove the session token on every instance
    pub fn clear_token(&self) {
        self.inner
            .replicator
            .discard(&self.inner.settings.token_key);
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("identity", &self.identity())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl Inner {
    fn identity(&self) -> Option<u64> {
        self.state.lock().identity
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.replicator.read(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Unreadable session value {}: {}", key, e);
                None
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn start(self: &Arc<Self>) {
        let identity = {
            let mut state = self.state.lock();
            if state.identity.is_some() {
                debug!("Session already started on this instance");
                return;
            }

            let identity = self.registry.register();
            state.identity = Some(identity);
            state.driver = Some(self.spawn_driver());

            // Arm first so the master's reply already carries our deadline
            self.arm();
            if !election::is_master(identity) {
                self.replicator.request_sync(identity);
            }
            identity
        };

        info!(
            "Session started as {} (identity {})",
            Role::of(identity),
            identity
        );
        if election::is_master(identity) {
            self.become_master(identity);
        }
    }

    /// Reset the deadline and restart the timer
    fn arm(self: &Arc<Self>) {
        self.tracker.arm(&self.replicator, self.deadline_callback());
    }

    fn deadline_callback(self: &Arc<Self>) -> TimerCallback {
        let inner = Arc::downgrade(self);
        Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.signal_driver(DriverSignal::DeadlineReached);
            }
        })
    }

    fn signal_driver(&self, signal: DriverSignal) {
        match self.state.lock().driver.as_ref() {
            Some(driver) => {
                let _ = driver.signal_tx.send(signal);
            }
            None => trace!("Ignoring {:?} on idle coordinator", signal),
        }
    }

    fn check_inactivity(self: &Arc<Self>, no_refresh: bool) -> bool {
        match self.tracker.status(self.local.as_ref()) {
            Activity::Active { remaining } => {
                if !no_refresh && self.identity().is_some() {
                    trace!("Deadline still {:?} away, rescheduling", remaining);
                    self.tracker
                        .reschedule(remaining, self.deadline_callback());
                }
                true
            }
            Activity::Elapsed => {
                if !no_refresh {
                    self.terminate(SessionEnd::TimedOut);
                }
                false
            }
        }
    }

    /// Tear the session down on this instance; only the first call has effect
    fn terminate(&self, reason: SessionEnd) {
        {
            let mut state = self.state.lock();
            if state.identity.take().is_none() {
                return;
            }

            self.local.clear();
            if reason.is_self_initiated() {
                self.shared.clear();
            }
            self.tracker.cancel();
            self.shared.unsubscribe();
            if let Some(driver) = state.driver.take() {
                driver.stop();
            }
        }

        info!("Session {}", reason);
        if let Some(callback) = &self.callbacks.on_session_timeout {
            callback(reason);
        }
        self.emit(SessionEvent::Ended { reason });
    }

    fn close(&self) {
        let identity = {
            let mut state = self.state.lock();
            let Some(identity) = state.identity.take() else {
                return;
            };

            self.tracker.cancel();
            self.shared.unsubscribe();
            self.registry.deregister(identity);
            if let Some(driver) = state.driver.take() {
                driver.stop();
            }
            identity
        };

        self.emit(SessionEvent::Closed { identity });
    }

    fn become_master(&self, identity: u64) {
        info!("Instance {} is now master", identity);
        if let Some(callback) = &self.callbacks.on_become_master {
            callback();
        }
        self.emit(SessionEvent::BecameMaster { identity });
    }

    fn notify_update(&self, update: SessionUpdate) {
        if let Some(callback) = &self.callbacks.on_session_update {
            callback(&update);
        }
        self.emit(SessionEvent::Updated { update });
    }

    fn handle_storage_event(self: &Arc<Self>, event: &StorageEvent) {
        let Some(identity) = self.identity() else {
            trace!("Ignoring storage event on idle coordinator");
            return;
        };
        let Some(broadcast) = Broadcast::decode(event) else {
            return;
        };

        match broadcast {
            Broadcast::Snapshot(snapshot) => {
                let entries = self.replicator.apply_snapshot(&snapshot);
                self.notify_update(SessionUpdate::Synced { entries });
            }
            Broadcast::Remove(key) => {
                self.replicator.apply_remove(&key);
                self.notify_update(SessionUpdate::Removed { key });
            }
            Broadcast::SyncRequest => {
                if election::is_master(identity) {
                    self.replicator.broadcast_snapshot();
                }
            }
            Broadcast::Closed(closed) => self.on_peer_closed(closed),
            Broadcast::Cleared => self.terminate(SessionEnd::ClearedByPeer),
        }
    }

    fn on_peer_closed(&self, closed: u64) {
        let promoted = {
            let mut state = self.state.lock();
            let Some(current) = state.identity else {
                return;
            };

            let outcome = election::succession(current, closed);
            if outcome == Succession::Retained {
                return;
            }
            let next = outcome.identity(current);
            debug!("Peer {} left, identity {} -> {}", closed, current, next);
            state.identity = Some(next);
            self.registry.persist_identity(next);
            outcome == Succession::Promoted
        };

        if promoted {
            self.become_master(0);
        }
    }

    fn on_activity(self: &Arc<Self>, kind: ActivityKind) {
        if !self.settings.activity_events.contains(&kind) {
            return;
        }
        if self.identity().is_some() {
            trace!("Activity {:?}, re-arming inactivity deadline", kind);
            self.arm();
        }
    }

    fn on_deadline(self: &Arc<Self>) {
        if self.identity().is_none() {
            debug!("Stale inactivity timer ignored");
            return;
        }
        self.check_inactivity(false);
    }

    fn spawn_driver(self: &Arc<Self>) -> Driver {
        let storage_rx = self.shared.subscribe();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let activity_rx = self.activity.as_ref().map(|s| s.subscribe());
        let lifecycle_rx = self.lifecycle.as_ref().map(|s| s.subscribe());

        let task = tokio::spawn(run_driver(
            Arc::downgrade(self),
            storage_rx,
            signal_rx,
            stop_rx,
            activity_rx,
            lifecycle_rx,
        ));

        Driver {
            signal_tx,
            stop_tx: Some(stop_tx),
            _task: task,
        }
    }
}

/// What woke the driver
enum Wake {
    Storage(StorageEvent),
    Signal(DriverSignal),
    Activity(ActivityKind),
    Unload,
}

async fn run_driver(
    inner: Weak<Inner>,
    mut storage_rx: mpsc::UnboundedReceiver<StorageEvent>,
    mut signal_rx: mpsc::UnboundedReceiver<DriverSignal>,
    mut stop_rx: oneshot::Receiver<()>,
    mut activity_rx: Option<broadcast::Receiver<ActivityKind>>,
    mut lifecycle_rx: Option<broadcast::Receiver<()>>,
) {
    loop {
        let wake = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            event = storage_rx.recv() => match event {
                Some(event) => Wake::Storage(event),
                None => break,
            },
            Some(signal) = signal_rx.recv() => Wake::Signal(signal),
            kind = next_signal(&mut activity_rx) => Wake::Activity(kind),
            _ = next_signal(&mut lifecycle_rx) => Wake::Unload,
        };

        let Some(coordinator) = inner.upgrade() else {
            break;
        };
        match wake {
            Wake::Storage(event) => coordinator.handle_storage_event(&event),
            Wake::Signal(DriverSignal::DeadlineReached) => coordinator.on_deadline(),
            Wake::Activity(kind) => coordinator.on_activity(kind),
            Wake::Unload => {
                coordinator.close();
                break;
            }
        }
    }
    trace!("Session driver stopped");
}

/// Next signal from an optional source; pends forever once the source is gone
async fn next_signal<T: Clone>(source: &mut Option<broadcast::Receiver<T>>) -> T {
    loop {
        let Some(rx) = source.as_mut() else {
            return std::future::pending().await;
        };
        let received = rx.recv().await;
        match received {
            Ok(signal) => return signal,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Skipped {} host signals", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => *source = None,
        }
    }
}
