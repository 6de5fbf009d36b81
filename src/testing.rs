//! Deterministic clock and timer used by the unit tests

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::timer::{Clock, TimerCallback, TimerHandle, TimerService};

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("duration in range");
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Timer whose callbacks run only when a test fires them
#[derive(Default)]
pub struct ManualTimer {
    next_id: AtomicU64,
    pending: Mutex<Vec<(TimerHandle, Duration, TimerCallback)>>,
}

impl ManualTimer {
    /// Delays of the timers still pending, in scheduling order
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending.lock().iter().map(|(_, delay, _)| *delay).collect()
    }

    /// Remove every pending timer without running it
    pub fn take_all(&self) -> Vec<TimerCallback> {
        self.pending
            .lock()
            .drain(..)
            .map(|(_, _, callback)| callback)
            .collect()
    }

    /// Run every pending timer, returning how many fired
    pub fn fire_all(&self) -> usize {
        let callbacks = self.take_all();
        let fired = callbacks.len();
        for callback in callbacks {
            callback();
        }
        fired
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push((handle, delay, callback));
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        self.pending.lock().retain(|(pending, _, _)| *pending != handle);
    }
}

/// Let spawned driver tasks drain their queues
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
