//! Cancellation controller and the signal handed to operations.
//!
//! A [`Controller`] is a one-shot cancellation source: the first `cancel`
//! wins, stores the [`AbortReason`], notifies listeners exactly once, and
//! wakes every task awaiting [`AbortSignal::cancelled`]. A cancelled
//! controller stays cancelled; the coordinator discards it and creates a
//! fresh one per attempt. For a source that survives cancel cycles see
//! [`ReusableController`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{AborterError, Result, ABORTED_WITHOUT_MESSAGE};
use crate::events::ListenerId;
use crate::reason::AbortReason;

mod reusable;

pub use reusable::{AttractListeners, ReusableController};

/// Callback invoked with the cancellation reason.
pub type CancelCallback = Arc<dyn Fn(&AbortReason) + Send + Sync>;

struct CancelEntry {
    id: ListenerId,
    callback: CancelCallback,
    once: bool,
}

struct Shared {
    token: CancellationToken,
    reason: Mutex<Option<AbortReason>>,
    listeners: Mutex<Vec<CancelEntry>>,
}

/// One-shot cancellation source.
///
/// Cheap to clone; all clones share the same cancellation state. Owned by
/// whoever is entitled to cancel — the signal side never can.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            shared: Arc::new(Shared {
                token: CancellationToken::new(),
                reason: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The signal handed to operations.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal { shared: self.shared.clone() }
    }

    /// Cancel with the given reason.
    ///
    /// Idempotent: the first call wins; later calls neither re-notify
    /// listeners nor error. Listeners run synchronously in registration
    /// order (once-listeners are consumed), then async waiters wake.
    pub fn cancel(&self, reason: AbortReason) {
        {
            let mut slot = self.shared.reason.lock();
            if slot.is_some() {
                tracing::debug!("controller already cancelled, ignoring repeated cancel");
                return;
            }
            *slot = Some(reason.clone());
        }

        let snapshot: Vec<CancelCallback> = {
            let mut listeners = self.shared.listeners.lock();
            let snapshot = listeners.iter().map(|entry| entry.callback.clone()).collect();
            listeners.retain(|entry| !entry.once);
            snapshot
        };
        for callback in snapshot {
            callback(&reason);
        }

        self.shared.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.reason.lock().is_some()
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Cancellation signal passed to operations.
///
/// Queryable for "already cancelled", subscribable for the cancellation
/// event, and awaitable. Clones observe the same underlying controller.
#[derive(Clone)]
pub struct AbortSignal {
    shared: Arc<Shared>,
}

impl AbortSignal {
    pub fn is_cancelled(&self) -> bool {
        self.shared.reason.lock().is_some()
    }

    /// The cancellation reason, once cancelled.
    pub fn reason(&self) -> Option<AbortReason> {
        self.shared.reason.lock().clone()
    }

    /// Resolves with the reason when the controller is cancelled.
    pub async fn cancelled(&self) -> AbortReason {
        self.shared.token.cancelled().await;
        self.reason()
            .unwrap_or_else(|| AbortReason::aborted(ABORTED_WITHOUT_MESSAGE))
    }

    /// Register a callback invoked on cancellation.
    ///
    /// A listener registered after cancellation never fires; use
    /// [`check`](Self::check) or [`cancelled`](Self::cancelled) to observe a
    /// cancellation that already happened.
    pub fn on_cancel<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        self.register(Arc::new(callback), false)
    }

    /// Register a callback invoked at most once, on the first cancellation
    /// of this controller instance.
    pub fn on_cancel_once<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        self.register(Arc::new(callback), true)
    }

    pub(crate) fn register(&self, callback: CancelCallback, once: bool) -> ListenerId {
        let id = ListenerId::new();
        if self.is_cancelled() {
            tracing::debug!(listener_id = %id, "listener registered on a cancelled signal never fires");
            return id;
        }
        self.shared.listeners.lock().push(CancelEntry { id, callback, once });
        id
    }

    /// Remove a listener by id. Absent registrations are ignored.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Errs with the cancellation reason if the signal is already cancelled.
    ///
    /// For operations that do not automatically observe the signal, called
    /// at their own suspension points.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(AborterError::Abort(reason)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::AbortKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn first_cancel_wins_and_later_cancels_are_ignored() {
        let controller = Controller::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        controller.signal().on_cancel(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.cancel(AbortReason::aborted("first"));
        controller.cancel(AbortReason::aborted("second"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.signal().reason().unwrap().message, "first");
    }

    #[test]
    fn once_listeners_are_consumed_by_the_first_cancel() {
        let controller = Controller::new();
        let signal = controller.signal();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        signal.on_cancel_once(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        controller.cancel(AbortReason::aborted("stop"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_registered_after_cancellation_never_fire() {
        let controller = Controller::new();
        controller.cancel(AbortReason::aborted("stop"));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        controller.signal().on_cancel(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(controller.signal().check().is_err());
    }

    #[test]
    fn removed_listeners_stop_firing() {
        let controller = Controller::new();
        let signal = controller.signal();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let id = signal.on_cancel(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(signal.remove_listener(id));
        assert!(!signal.remove_listener(id));

        controller.cancel(AbortReason::aborted("stop"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn waiters_wake_with_the_reason() {
        let controller = Controller::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        controller.cancel(AbortReason::cancelled("superseded"));
        let reason = waiter.await.unwrap();
        assert_eq!(reason.kind, AbortKind::Cancelled);
        assert_eq!(reason.message, "superseded");
    }
}
