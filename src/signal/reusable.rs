//! A cancellation source that survives cancel cycles.
//!
//! Wraps an inner disposable [`Controller`] and owns its own registry of
//! non-once listeners. On every cancel, the inner controller is aborted and
//! replaced with a fresh one, and the owned registrations carry over —
//! observer continuity across supersession cycles without re-fetching the
//! source. Once-only listeners attach to the live inner controller and die
//! with it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::ListenerId;
use crate::reason::AbortReason;

use super::{AbortSignal, CancelCallback, Controller};

/// Which listener classes survive a cancel cycle.
#[derive(Debug, Clone, Copy)]
pub struct AttractListeners {
    /// Preserve listeners registered via `add_listener`.
    pub event_listeners: bool,
    /// Preserve the primary `on_abort` handler.
    pub on_abort: bool,
}

impl Default for AttractListeners {
    fn default() -> Self {
        AttractListeners { event_listeners: true, on_abort: true }
    }
}

/// Cancellation source whose signal can be re-armed after each cancel.
pub struct ReusableController {
    inner: Mutex<Controller>,
    registry: Mutex<Vec<(ListenerId, CancelCallback)>>,
    on_abort: Mutex<Option<CancelCallback>>,
    attract: AttractListeners,
}

impl ReusableController {
    pub fn new() -> Self {
        Self::with_attract(AttractListeners::default())
    }

    pub fn with_attract(attract: AttractListeners) -> Self {
        ReusableController {
            inner: Mutex::new(Controller::new()),
            registry: Mutex::new(Vec::new()),
            on_abort: Mutex::new(None),
            attract,
        }
    }

    /// The current usable signal. Replaced by every [`cancel`](Self::cancel);
    /// re-fetch after cancelling to observe the fresh controller.
    pub fn signal(&self) -> AbortSignal {
        self.inner.lock().signal()
    }

    /// Install the primary handler invoked ahead of listeners on cancel.
    pub fn set_on_abort<F>(&self, callback: F)
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        *self.on_abort.lock() = Some(Arc::new(callback));
    }

    /// Register a listener that fires on every cancel cycle (subject to the
    /// [`AttractListeners`] configuration).
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.registry.lock().push((id, Arc::new(callback)));
        id
    }

    /// Register a listener on the current controller only; it fires at most
    /// once ever and is not migrated to the replacement.
    pub fn add_listener_once<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        self.inner.lock().signal().register(Arc::new(callback), true)
    }

    /// Remove a migrating listener by id. Absent registrations are ignored.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.len();
        registry.retain(|(listener_id, _)| *listener_id != id);
        registry.len() != before
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().is_cancelled()
    }

    /// Cancel the current controller and reset.
    ///
    /// The primary handler fires first, then the owned registry in
    /// registration order, then the inner controller's own listeners and
    /// async waiters. Afterwards a fresh controller is installed; listener
    /// classes disabled by the configuration are dropped instead of
    /// migrated.
    pub fn cancel(&self, reason: AbortReason) {
        let primary = self.on_abort.lock().clone();
        if let Some(callback) = primary {
            callback(&reason);
        }

        let snapshot: Vec<CancelCallback> = self
            .registry
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in snapshot {
            callback(&reason);
        }

        let replaced = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut *inner, Controller::new())
        };
        replaced.cancel(reason);

        if !self.attract.event_listeners {
            tracing::info!("listener sync disabled for event listeners, dropping registry");
            self.registry.lock().clear();
        }
        if !self.attract.on_abort {
            tracing::info!("listener sync disabled for the on_abort handler, dropping it");
            *self.on_abort.lock() = None;
        }
    }
}

impl Default for ReusableController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReusableController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusableController")
            .field("cancelled", &self.is_cancelled())
            .field("listeners", &self.registry.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_survive_cancel_cycles() {
        let controller = ReusableController::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        controller.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.cancel(AbortReason::aborted("first"));
        controller.cancel(AbortReason::aborted("second"));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // The replacement controller is fresh and usable again.
        assert!(!controller.is_cancelled());
    }

    #[test]
    fn once_listeners_fire_at_most_once_ever() {
        let controller = ReusableController::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        controller.add_listener_once(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.cancel(AbortReason::aborted("first"));
        controller.cancel(AbortReason::aborted("second"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_abort_fires_ahead_of_listeners_each_cycle() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let controller = ReusableController::new();

        let log = order.clone();
        controller.set_on_abort(move |_| log.lock().push("on_abort"));
        let log = order.clone();
        controller.add_listener(move |_| log.lock().push("listener"));

        controller.cancel(AbortReason::aborted("first"));
        controller.cancel(AbortReason::aborted("second"));

        assert_eq!(
            *order.lock(),
            vec!["on_abort", "listener", "on_abort", "listener"]
        );
    }

    #[test]
    fn disabled_attraction_drops_listeners_after_the_first_cycle() {
        let controller = ReusableController::with_attract(AttractListeners {
            event_listeners: false,
            on_abort: false,
        });
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        controller.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = calls.clone();
        controller.set_on_abort(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.cancel(AbortReason::aborted("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        controller.cancel(AbortReason::aborted("second"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removed_listeners_do_not_migrate() {
        let controller = ReusableController::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let id = controller.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(controller.remove_listener(id));

        controller.cancel(AbortReason::aborted("stop"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
