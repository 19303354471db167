//! Typed publish/subscribe for cancellation-family events.
//!
//! [`Listeners`] is the observer surface of an [`Aborter`](crate::Aborter):
//! a typed event channel for `aborted`/`cancelled`/`timeout` events plus the
//! [`StateObserver`] publishing lifecycle state, mirroring how the
//! coordinator hands both to callers as one object.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reason::{AbortKind, AbortReason};

pub mod state;

pub use state::{RequestState, StateCallback, StateObserver};

/// Domain events published by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An attempt was terminated externally or by a timeout.
    Aborted,
    /// An attempt was superseded by a newer one.
    Cancelled,
    /// A deadline timer fired.
    Timeout,
}

impl EventKind {
    /// Cancellation-family events trigger the primary `on_abort` callback
    /// ahead of the subscriber list.
    pub fn is_cancellation_family(&self) -> bool {
        matches!(self, EventKind::Aborted | EventKind::Cancelled | EventKind::Timeout)
    }
}

impl From<AbortKind> for EventKind {
    fn from(kind: AbortKind) -> Self {
        match kind {
            AbortKind::Aborted => EventKind::Aborted,
            AbortKind::Cancelled => EventKind::Cancelled,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Aborted => "aborted",
            EventKind::Cancelled => "cancelled",
            EventKind::Timeout => "timeout",
        };
        write!(f, "{}", name)
    }
}

/// Identifier of a registered listener, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub(crate) fn new() -> Self {
        ListenerId(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Callback invoked with the reason of a dispatched event.
pub type EventCallback = Arc<dyn Fn(&AbortReason) + Send + Sync>;

struct EventEntry {
    id: ListenerId,
    callback: EventCallback,
    once: bool,
}

/// Observer surface of the coordinator: typed event subscriptions plus the
/// lifecycle state observer.
pub struct Listeners {
    registry: Mutex<HashMap<EventKind, Vec<EventEntry>>>,
    on_abort: Mutex<Option<EventCallback>>,
    state: StateObserver,
}

impl Listeners {
    pub(crate) fn new(
        on_abort: Option<EventCallback>,
        on_state_change: Option<StateCallback>,
    ) -> Self {
        Listeners {
            registry: Mutex::new(HashMap::new()),
            on_abort: Mutex::new(on_abort),
            state: StateObserver::new(on_state_change),
        }
    }

    /// The lifecycle state observer.
    pub fn state(&self) -> &StateObserver {
        &self.state
    }

    /// Register a callback for events of the given kind.
    pub fn add_listener<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(callback), false)
    }

    /// Register a callback that fires at most once, then is removed.
    pub fn add_listener_once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(callback), true)
    }

    fn register(&self, kind: EventKind, callback: EventCallback, once: bool) -> ListenerId {
        let id = ListenerId::new();
        self.registry
            .lock()
            .entry(kind)
            .or_default()
            .push(EventEntry { id, callback, once });
        id
    }

    /// Remove a listener by id. Absent registrations are ignored.
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        match registry.get_mut(&kind) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                entries.len() != before
            }
            None => false,
        }
    }

    /// Dispatch an event to registered listeners.
    ///
    /// Cancellation-family events invoke the primary `on_abort` callback
    /// first. `once` listeners are removed before iteration, so a dispatch
    /// from within a callback cannot re-fire them.
    pub fn dispatch(&self, kind: EventKind, reason: &AbortReason) {
        if kind.is_cancellation_family() {
            let primary = self.on_abort.lock().clone();
            if let Some(callback) = primary {
                callback(reason);
            }
        }

        let snapshot: Vec<EventCallback> = {
            let mut registry = self.registry.lock();
            match registry.get_mut(&kind) {
                Some(entries) => {
                    let snapshot = entries.iter().map(|entry| entry.callback.clone()).collect();
                    entries.retain(|entry| !entry.once);
                    snapshot
                }
                None => Vec::new(),
            }
        };
        for callback in snapshot {
            callback(reason);
        }
    }

    /// Drop every registration: event listeners, the primary callback, and
    /// all state subscriptions.
    pub(crate) fn clear(&self) {
        self.registry.lock().clear();
        *self.on_abort.lock() = None;
        self.state.clear();
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: usize = self.registry.lock().values().map(Vec::len).sum();
        f.debug_struct("Listeners")
            .field("registered", &registered)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn listeners() -> Listeners {
        Listeners::new(None, None)
    }

    #[test]
    fn once_listeners_fire_exactly_once() {
        let listeners = listeners();
        let once_calls = Arc::new(AtomicUsize::new(0));
        let always_calls = Arc::new(AtomicUsize::new(0));

        let counter = once_calls.clone();
        listeners.add_listener_once(EventKind::Aborted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = always_calls.clone();
        listeners.add_listener(EventKind::Aborted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let reason = AbortReason::aborted("stop");
        listeners.dispatch(EventKind::Aborted, &reason);
        listeners.dispatch(EventKind::Aborted, &reason);

        assert_eq!(once_calls.load(Ordering::SeqCst), 1);
        assert_eq!(always_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn on_abort_runs_before_subscribers_for_cancellation_family() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        let listeners = Listeners::new(
            Some(Arc::new(move |_: &AbortReason| log.lock().push("on_abort"))),
            None,
        );
        let log = order.clone();
        listeners.add_listener(EventKind::Cancelled, move |_| log.lock().push("subscriber"));

        listeners.dispatch(EventKind::Cancelled, &AbortReason::cancelled("superseded"));

        assert_eq!(*order.lock(), vec!["on_abort", "subscriber"]);
    }

    #[test]
    fn removal_is_graceful_for_unknown_ids() {
        let listeners = listeners();
        let id = listeners.add_listener(EventKind::Aborted, |_| {});

        assert!(listeners.remove_listener(EventKind::Aborted, id));
        // Absent id / wrong kind: no error, just false.
        assert!(!listeners.remove_listener(EventKind::Aborted, id));
        assert!(!listeners.remove_listener(EventKind::Timeout, id));
    }

    #[test]
    fn dispatch_only_reaches_matching_kind() {
        let listeners = listeners();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        listeners.add_listener(EventKind::Cancelled, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.dispatch(EventKind::Aborted, &AbortReason::aborted("stop"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_receives_the_dispatched_reason() {
        let listeners = listeners();
        let seen = Arc::new(Mutex::new(None));

        let slot = seen.clone();
        listeners.add_listener(EventKind::Aborted, move |reason| {
            *slot.lock() = Some(reason.message.clone());
        });

        listeners.dispatch(EventKind::Aborted, &AbortReason::aborted("user gave up"));
        assert_eq!(seen.lock().as_deref(), Some("user gave up"));
    }
}
