//! Inactivity Tracker
//!
//! Keeps the "inactive after" deadline in the local store and a single pending
//! timer. A timer firing only means "look again": the stored deadline is the
//! authority, since a peer may have pushed it out after the timer was set.

use chrono::{DateTime, Utc};
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::replication::Replicator;
use crate::store::LocalStore;
use crate::timer::{Clock, TimerCallback, TimerHandle, TimerService};

/// Result of comparing the deadline with the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Deadline still ahead
    Active { remaining: Duration },
    /// Deadline passed or missing
    Elapsed,
}

pub struct InactivityTracker {
    key: String,
    limit: Duration,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn TimerService>,
    pending: Mutex<Option<TimerHandle>>,
}

impl InactivityTracker {
    pub fn new(
        key: impl Into<String>,
        limit: Duration,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn TimerService>,
    ) -> Self {
        Self {
            key: key.into(),
            limit,
            clock,
            timer,
            pending: Mutex::new(None),
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Stored deadline, if present and readable
    pub fn deadline(&self, local: &dyn LocalStore) -> Option<DateTime<Utc>> {
        let raw = local.get(&self.key)?;
        match serde_json::from_str(&raw) {
            Ok(deadline) => Some(deadline),
            Err(e) => {
                debug!("Unreadable inactivity deadline {:?}: {}", raw, e);
                None
            }
        }
    }

    pub fn status(&self, local: &dyn LocalStore) -> Activity {
        let now = self.clock.now();
        match self.deadline(local) {
            Some(deadline) if now < deadline => Activity::Active {
                remaining: (deadline - now).to_std().unwrap_or_default(),
            },
            _ => Activity::Elapsed,
        }
    }

    /// Push the deadline to now + limit, replicate it and restart the timer
    pub fn arm(&self, replicator: &Replicator, callback: TimerCallback) -> DateTime<Utc> {
        let now = self.clock.now();
        let deadline = chrono::Duration::from_std(self.limit)
            .ok()
            .and_then(|limit| now.checked_add_signed(limit))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        match serde_json::to_string(&deadline) {
            Ok(raw) => replicator.store(&self.key, &raw),
            Err(e) => debug!("Failed to encode inactivity deadline: {}", e),
        }
        self.reschedule(self.limit, callback);

        trace!("Inactivity deadline armed for {}", deadline);
        deadline
    }

    /// Replace any pending timer with one firing after `delay`
    pub fn reschedule(&self, delay: Duration, callback: TimerCallback) {
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            self.timer.cancel(handle);
        }
        *pending = Some(self.timer.schedule(delay, callback));
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            self.timer.cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::keys::ReservedKeys;
    use crate::store::{KeyValueStore, MemoryDomain, MemoryStore};
    use crate::testing::{ManualClock, ManualTimer};

    const LIMIT: Duration = Duration::from_secs(15 * 60);

    struct Fixture {
        tracker: InactivityTracker,
        replicator: Replicator,
        local: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        timer: Arc<ManualTimer>,
    }

    fn fixture() -> Fixture {
        let domain = MemoryDomain::new();
        let local = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let timer = Arc::new(ManualTimer::default());
        let replicator = Replicator::new(
            local.clone(),
            Arc::new(domain.connect()),
            ReservedKeys::new("token", "inactiveTimeout"),
        );
        let tracker = InactivityTracker::new("inactiveTimeout", LIMIT, clock.clone(), timer.clone());
        Fixture {
            tracker,
            replicator,
            local,
            clock,
            timer,
        }
    }

    #[test]
    fn test_missing_deadline_is_elapsed() {
        let f = fixture();
        assert_eq!(f.tracker.status(f.local.as_ref()), Activity::Elapsed);

        f.local.set("inactiveTimeout", "yesterday");
        assert_eq!(f.tracker.deadline(f.local.as_ref()), None);
        assert_eq!(f.tracker.status(f.local.as_ref()), Activity::Elapsed);
    }

    #[test]
    fn test_arm_sets_deadline_and_timer() {
        let f = fixture();
        let start = f.clock.now();

        let deadline = f.tracker.arm(&f.replicator, Box::new(|| {}));
        assert_eq!(deadline, start + chrono::Duration::minutes(15));
        assert_eq!(f.tracker.deadline(f.local.as_ref()), Some(deadline));
        assert_eq!(f.timer.pending_delays(), vec![LIMIT]);

        f.clock.advance(Duration::from_secs(10 * 60));
        assert_eq!(
            f.tracker.status(f.local.as_ref()),
            Activity::Active {
                remaining: Duration::from_secs(5 * 60)
            }
        );

        f.clock.advance(Duration::from_secs(5 * 60));
        assert_eq!(f.tracker.status(f.local.as_ref()), Activity::Elapsed);
    }

    #[test]
    fn test_rearm_replaces_pending_timer() {
        let f = fixture();
        f.tracker.arm(&f.replicator, Box::new(|| {}));
        f.clock.advance(Duration::from_secs(10 * 60));
        f.tracker.arm(&f.replicator, Box::new(|| {}));

        assert_eq!(f.timer.pending_delays(), vec![LIMIT]);

        f.tracker.cancel();
        assert!(f.timer.pending_delays().is_empty());
    }
}
