//! Delayed callbacks
//!
//! Scheduled work is never cancelled; callers make stale fires harmless.

use std::time::Duration;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Schedules a callback to run once after a delay
pub trait TimerFacility: Send + Sync {
    fn schedule(&self, delay: Duration, callback: TimerCallback);
}

/// Timer backed by `tokio::time::sleep`; must be used inside a runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl TimerFacility for TokioTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}

/// Timer that fires only when told to
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ManualTimer {
    pending: std::sync::Mutex<Vec<(Duration, TimerCallback)>>,
}

#[cfg(test)]
impl ManualTimer {
    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.pending.lock().unwrap().iter().map(|(d, _)| *d).collect()
    }

    /// Run every pending callback, returning how many fired
    pub(crate) fn fire_all(&self) -> usize {
        let due: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        let fired = due.len();
        for (_, callback) in due {
            callback();
        }
        fired
    }
}

#[cfg(test)]
impl TimerFacility for ManualTimer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) {
        self.pending.lock().unwrap().push((delay, callback));
    }
}
