//! Single-shot, re-armable deadline timer.
//!
//! Backs the coordinator's timeout handling: one pending callback at most,
//! re-arming replaces the previous callback, and the fire/settle race is left
//! to the caller (the coordinator resolves it through its pending-request
//! map).

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// Arms and disarms a single delayed callback.
///
/// The armed callback runs on a spawned task after the duration elapses;
/// disarming aborts the task. Dropping the timer disarms it.
pub struct DeadlineTimer {
    handle: Mutex<Option<AbortHandle>>,
}

impl DeadlineTimer {
    pub fn new() -> Self {
        DeadlineTimer { handle: Mutex::new(None) }
    }

    /// Arm the timer.
    ///
    /// A `None` or zero duration never fires and is not an error. Arming
    /// always disarms any previously armed callback first, so only the
    /// latest callback can fire.
    pub fn arm<F>(&self, duration: Option<Duration>, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();

        let duration = match duration {
            Some(duration) if !duration.is_zero() => duration,
            _ => return,
        };

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire();
        });

        *self.handle.lock() = Some(task.abort_handle());
    }

    /// Cancel the pending callback, if any. No-op when nothing is armed.
    pub fn disarm(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// True while a callback is pending.
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Default for DeadlineTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
