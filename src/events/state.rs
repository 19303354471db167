//! Lifecycle state of attempts, and the observer that publishes it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::ListenerId;

/// Lifecycle state of an attempt.
///
/// Each attempt moves from `Pending` to exactly one terminal state:
/// `Fulfilled` on success, `Rejected` on a genuine failure, `Cancelled` when
/// superseded by a newer attempt, `Aborted` when terminated externally or by
/// a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Pending,
    Fulfilled,
    Rejected,
    Cancelled,
    Aborted,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Pending)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Pending => "pending",
            RequestState::Fulfilled => "fulfilled",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
            RequestState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Callback invoked with every state transition.
pub type StateCallback = Arc<dyn Fn(RequestState) + Send + Sync>;

/// Holds the current lifecycle state and notifies subscribers on change.
///
/// Subscribers are invoked in subscription order, then the single optional
/// primary `on_state_change` callback. Emission is restricted to the owning
/// coordinator.
pub struct StateObserver {
    value: Mutex<Option<RequestState>>,
    subscribers: Mutex<Vec<(ListenerId, StateCallback)>>,
    on_state_change: Mutex<Option<StateCallback>>,
}

impl StateObserver {
    pub(crate) fn new(on_state_change: Option<StateCallback>) -> Self {
        StateObserver {
            value: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            on_state_change: Mutex::new(on_state_change),
        }
    }

    /// The current state, or `None` before the first emission.
    pub fn value(&self) -> Option<RequestState> {
        *self.value.lock()
    }

    /// Subscribe a callback to state changes.
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(RequestState) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a previously subscribed callback. Returns false when the id is
    /// not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(listener_id, _)| *listener_id != id);
        subscribers.len() != before
    }

    /// Set the state and notify observers.
    ///
    /// The listener set is snapshotted before iteration: subscribing or
    /// unsubscribing from within a callback takes effect on the next
    /// emission, not the one in progress.
    pub(crate) fn emit(&self, state: RequestState) {
        *self.value.lock() = Some(state);

        let snapshot: Vec<StateCallback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in snapshot {
            callback(state);
        }

        let primary = self.on_state_change.lock().clone();
        if let Some(callback) = primary {
            callback(state);
        }
    }

    pub(crate) fn clear(&self) {
        self.subscribers.lock().clear();
        *self.on_state_change.lock() = None;
        *self.value.lock() = None;
    }
}

impl fmt::Debug for StateObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateObserver")
            .field("value", &self.value())
            .field("subscribers", &self.subscribers.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn observer() -> Arc<StateObserver> {
        Arc::new(StateObserver::new(None))
    }

    #[test]
    fn subscribers_run_in_subscription_order_before_primary() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        let observer = Arc::new(StateObserver::new(Some(Arc::new(move |_| {
            log.lock().push("primary");
        }))));

        let log = order.clone();
        observer.subscribe(move |_| log.lock().push("first"));
        let log = order.clone();
        observer.subscribe(move |_| log.lock().push("second"));

        observer.emit(RequestState::Pending);

        assert_eq!(*order.lock(), vec!["first", "second", "primary"]);
        assert_eq!(observer.value(), Some(RequestState::Pending));
    }

    #[test]
    fn unsubscribed_callbacks_stop_firing() {
        let observer = observer();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let id = observer.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observer.emit(RequestState::Pending);
        assert!(observer.unsubscribe(id));
        observer.emit(RequestState::Fulfilled);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!observer.unsubscribe(id));
    }

    #[test]
    fn subscribing_during_emission_does_not_affect_the_snapshot() {
        let observer = observer();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let inner_observer = observer.clone();
        let counter = late_calls.clone();
        observer.subscribe(move |_| {
            let counter = counter.clone();
            inner_observer.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        observer.emit(RequestState::Pending);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        observer.emit(RequestState::Fulfilled);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }
}
