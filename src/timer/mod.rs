//! Timer Service
//!
//! One-shot delayed callbacks and the wall clock deadlines are measured against.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle identifying a scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Callback run once when a timer fires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules and cancels one-shot callbacks
pub trait TimerService: Send + Sync {
    /// Run `callback` once after `delay`
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Cancel a pending callback; unknown or fired handles are ignored
    fn cancel(&self, handle: TimerHandle);
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Timer backed by Tokio tasks.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Default)]
pub struct TokioTimer {
    next_id: AtomicU64,
    /// Pending timers (timer id -> sleeping task)
    pending: Arc<DashMap<u64, JoinHandle<()>>>,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have not fired or been cancelled
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl TimerService for TokioTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove(&id);
            callback();
        });

        self.pending.insert(id, handle);
        // A zero delay may complete before the handle is recorded
        self.pending.remove_if(&id, |_, task| task.is_finished());
        trace!("Scheduled timer {} in {:?}", id, delay);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some((_, task)) = self.pending.remove(&handle.0) {
            task.abort();
            trace!("Cancelled timer {}", handle.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timer.schedule(
            Duration::from_secs(15 * 60),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(timer.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(14 * 60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let handle = timer.schedule(
            Duration::from_secs(60),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel(handle);
        timer.cancel(handle);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.pending_count(), 0);
    }
}
