//! The cancellation coordinator.
//!
//! [`Aborter`] wraps caller-supplied asynchronous operations with automatic
//! supersession semantics: starting a new attempt under an identity cancels
//! the prior in-flight attempt with that identity, timeouts race against
//! settlement through a deadline timer, and every transition is published to
//! the attached [`Listeners`].
//!
//! Settling policy: by default a cancelled attempt resolves to `Ok(None)` —
//! the cancellation never reaches the caller's error path. Callers that want
//! a catchable cancellation error opt in per attempt with
//! [`AttemptOptions::with_native_errors`]; a timeout configured with
//! [`TimeoutSpec::hard`] rejects regardless.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::{
    is_abort_error, normalized_message, AborterError, Result, ABORTED_WITHOUT_MESSAGE,
    PREVIOUS_ATTEMPT_CANCELLED,
};
use crate::events::{EventKind, Listeners, RequestState};
use crate::http::HttpResponse;
use crate::reason::{AbortKind, AbortReason, Initiator};
use crate::signal::{AbortSignal, Controller};
use crate::timer::DeadlineTimer;

mod types;

pub use types::{
    AborterOptions, AttemptId, AttemptOptions, TimeoutSpec, DEFAULT_REQUEST_NAME,
};

use types::PendingRequest;

/// Coordinates cancellable attempts.
///
/// Tracks at most one in-flight attempt per identity. Share across tasks by
/// wrapping in an `Arc`; all methods take `&self`.
pub struct Aborter {
    inner: Arc<Inner>,
}

struct Inner {
    listeners: Listeners,
    pending: Mutex<HashMap<String, PendingRequest>>,
    /// Controller of the most recent attempt, or the replacement installed
    /// by `abort_with_recovery`. Backs the `signal()` getter.
    current: Mutex<Controller>,
}

impl Aborter {
    pub fn new() -> Self {
        Self::with_options(AborterOptions::default())
    }

    pub fn with_options(options: AborterOptions) -> Self {
        Aborter {
            inner: Arc::new(Inner {
                listeners: Listeners::new(options.on_abort, options.on_state_change),
                pending: Mutex::new(HashMap::new()),
                current: Mutex::new(Controller::new()),
            }),
        }
    }

    /// The observer surface: event subscriptions and the state observer.
    pub fn listeners(&self) -> &Listeners {
        &self.inner.listeners
    }

    /// The current lifecycle state, or `None` before the first attempt.
    pub fn state(&self) -> Option<RequestState> {
        self.inner.listeners.state().value()
    }

    /// The signal of the most recent attempt (or recovery controller).
    pub fn signal(&self) -> AbortSignal {
        self.inner.current.lock().signal()
    }

    /// True when the coordinator has signalled an abort and the lifecycle
    /// state reflects it.
    pub fn aborted(&self) -> bool {
        self.inner.current.lock().is_cancelled()
            && self.state() == Some(RequestState::Aborted)
    }

    /// True while any attempt is in flight.
    pub fn is_in_progress(&self) -> bool {
        !self.inner.pending.lock().is_empty()
    }

    /// Number of attempts currently in flight.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether an error is recognized as a cancellation signal.
    ///
    /// See [`is_abort_error`](crate::error::is_abort_error) for the
    /// classification rule.
    pub fn is_error(error: &AborterError) -> bool {
        is_abort_error(error)
    }

    /// Run an operation with cancellation of the previous attempt under the
    /// same identity.
    ///
    /// The prior attempt (if any) is superseded synchronously, before this
    /// call returns its future: its timer is disarmed, its controller is
    /// cancelled with a `Cancelled`-kind reason, and the `Cancelled` event
    /// and state are published. The superseded attempt's own future settles
    /// according to its settling policy.
    ///
    /// Resolves `Ok(Some(value))` on success, `Ok(None)` when the attempt
    /// was cancelled under the default policy, and `Err` for genuine
    /// failures (or cancellations under the native policy).
    pub fn attempt<T, F, Fut>(
        &self,
        operation: F,
        options: AttemptOptions,
    ) -> impl Future<Output = Result<Option<T>>>
    where
        T: Send + 'static,
        F: FnOnce(AbortSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_REQUEST_NAME.to_string());
        let native = options.is_error_native_behavior;
        let timeout = options.timeout;
        let attempt_id = AttemptId::new();

        // Supersession happens synchronously, before the new controller
        // exists: no observer ever sees two pending attempts of one
        // identity overlap.
        inner.supersede(&name);

        let controller = Controller::new();
        let signal = controller.signal();
        inner.pending.lock().insert(
            name.clone(),
            PendingRequest {
                attempt_id,
                controller: controller.clone(),
                timer: DeadlineTimer::new(),
            },
        );
        *inner.current.lock() = controller;

        async move {
            // An abort or a newer attempt may have landed before the first
            // poll; a stale attempt must not emit `Pending` after a
            // terminal state.
            if !inner.is_current(&name, attempt_id) {
                tracing::info!(
                    attempt_id = %attempt_id,
                    name = %name,
                    "attempt cancelled before it started"
                );
                let reason = signal
                    .reason()
                    .unwrap_or_else(|| AbortReason::cancelled(PREVIOUS_ATTEMPT_CANCELLED));
                return settle_cancelled(reason, native);
            }

            inner.listeners.state().emit(RequestState::Pending);
            tracing::debug!(attempt_id = %attempt_id, name = %name, "attempt pending");

            if let Some(spec) = timeout {
                inner.arm_timeout(&name, attempt_id, spec);
            }

            tokio::select! {
                biased;

                reason = signal.cancelled() => {
                    // The canceller (supersession, explicit abort, or the
                    // deadline timer) already performed the terminal
                    // transition; only the settling policy remains.
                    tracing::debug!(
                        attempt_id = %attempt_id,
                        name = %name,
                        kind = %reason.kind,
                        initiator = %reason.initiator,
                        "attempt cancelled while in flight"
                    );
                    settle_cancelled(reason, native)
                }

                result = operation(signal.clone()) => match result {
                    Ok(value) => {
                        if inner.remove_if_current(&name, attempt_id) {
                            counter!("supersede_attempts_fulfilled_total", "name" => name.clone())
                                .increment(1);
                            inner.listeners.state().emit(RequestState::Fulfilled);
                            tracing::debug!(attempt_id = %attempt_id, name = %name, "attempt fulfilled");
                            Ok(Some(value))
                        } else {
                            // Settled after losing the race to a canceller;
                            // the result is not honored.
                            tracing::info!(
                                attempt_id = %attempt_id,
                                name = %name,
                                "late settlement of a superseded attempt ignored"
                            );
                            let reason = signal.reason().unwrap_or_else(|| {
                                AbortReason::cancelled(PREVIOUS_ATTEMPT_CANCELLED)
                            });
                            settle_cancelled(reason, native)
                        }
                    }
                    Err(error) => {
                        if is_abort_error(&error) && !native {
                            // The operation observed a cancellation on its
                            // own; recover it locally.
                            let reason = reason_from_error(&error);
                            if inner.remove_if_current(&name, attempt_id) {
                                inner.listeners.dispatch(EventKind::Aborted, &reason);
                                inner.listeners.state().emit(RequestState::Aborted);
                            }
                            tracing::info!(
                                attempt_id = %attempt_id,
                                name = %name,
                                "cancellation signal recovered, settling suppressed"
                            );
                            Ok(None)
                        } else {
                            if inner.remove_if_current(&name, attempt_id) {
                                counter!("supersede_attempts_rejected_total", "name" => name.clone())
                                    .increment(1);
                                inner.listeners.state().emit(RequestState::Rejected);
                            }
                            tracing::warn!(
                                attempt_id = %attempt_id,
                                name = %name,
                                error = %normalized_message(&error),
                                "attempt rejected"
                            );
                            Err(error)
                        }
                    }
                }
            }
        }
    }

    /// [`attempt`](Self::attempt) for operations returning a structured
    /// [`HttpResponse`]: on fulfillment the body is decoded as JSON into
    /// `T`. A decode failure rejects the returned future. Callers that want
    /// the raw response use `attempt` directly.
    pub fn attempt_json<T, F, Fut>(
        &self,
        operation: F,
        options: AttemptOptions,
    ) -> impl Future<Output = Result<Option<T>>>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(AbortSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        let attempt = self.attempt(operation, options);
        async move {
            match attempt.await? {
                Some(response) => response.json().map(Some),
                None => Ok(None),
            }
        }
    }

    /// Cancel every in-flight attempt with the default reason.
    ///
    /// A no-op (log only) when nothing is in flight.
    pub fn abort(&self) {
        self.inner.abort_all(None);
    }

    /// Cancel every in-flight attempt with the given reason.
    ///
    /// Non-reason values (strings, JSON) are normalized: wrapped with the
    /// default message, the `User` initiator, and the original value
    /// preserved as metadata.
    pub fn abort_with(&self, reason: impl Into<AbortReason>) {
        self.inner.abort_all(Some(reason.into()));
    }

    /// Cancel only the named attempts, leaving others running.
    pub fn abort_named(&self, names: &[&str], reason: Option<AbortReason>) {
        self.inner.abort_named(names, reason);
    }

    /// Abort, then immediately install a replacement controller so a fresh
    /// signal is available without starting a new attempt. Returns the new
    /// controller.
    pub fn abort_with_recovery(&self, reason: Option<AbortReason>) -> Controller {
        self.inner.abort_all(reason);
        let fresh = Controller::new();
        *self.inner.current.lock() = fresh.clone();
        fresh
    }

    /// Release every resource: cancels in-flight attempts (their futures
    /// settle under the default suppression policy), disarms timers, and
    /// drops all subscriptions.
    pub fn dispose(&self) {
        let entries: Vec<(String, PendingRequest)> =
            self.inner.pending.lock().drain().collect();
        for (name, entry) in entries {
            entry.timer.disarm();
            entry
                .controller
                .cancel(AbortReason::cancelled("coordinator disposed"));
            tracing::debug!(attempt_id = %entry.attempt_id, name = %name, "attempt dropped on dispose");
        }
        self.inner.listeners.clear();
        tracing::info!("resources have been released");
    }
}

impl Default for Aborter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Aborter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aborter")
            .field("pending", &self.pending_count())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn is_current(&self, name: &str, attempt_id: AttemptId) -> bool {
        self.pending
            .lock()
            .get(name)
            .map(|entry| entry.attempt_id == attempt_id)
            .unwrap_or(false)
    }

    /// Remove the attempt's pending entry if it is still the current one
    /// under its identity, disarming its timer. Returns false when a newer
    /// attempt or a canceller got there first.
    fn remove_if_current(&self, name: &str, attempt_id: AttemptId) -> bool {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.get(name) {
                Some(entry) if entry.attempt_id == attempt_id => pending.remove(name),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                entry.timer.disarm();
                true
            }
            None => false,
        }
    }

    /// Cancel the in-flight attempt under `name` because a newer attempt
    /// with the same identity is starting.
    fn supersede(&self, name: &str) {
        let entry = self.pending.lock().remove(name);
        let Some(entry) = entry else { return };

        entry.timer.disarm();
        let reason = AbortReason::cancelled(PREVIOUS_ATTEMPT_CANCELLED);
        tracing::info!(
            attempt_id = %entry.attempt_id,
            name = %name,
            "previous attempt cancelled by a newer one"
        );
        counter!("supersede_supersessions_total", "name" => name.to_string()).increment(1);

        self.listeners.dispatch(EventKind::Cancelled, &reason);
        entry.controller.cancel(reason);
        self.listeners.state().emit(RequestState::Cancelled);
    }

    fn arm_timeout(self: &Arc<Self>, name: &str, attempt_id: AttemptId, spec: TimeoutSpec) {
        let Some(duration) = spec.duration() else {
            tracing::debug!(name, "zero timeout configured, deadline timer not armed");
            return;
        };

        let weak = Arc::downgrade(self);
        let fire_name = name.to_string();
        let pending = self.pending.lock();
        let Some(entry) = pending.get(name) else { return };
        if entry.attempt_id != attempt_id {
            return;
        }
        entry.timer.arm(Some(duration), move || {
            if let Some(inner) = weak.upgrade() {
                inner.fire_timeout(&fire_name, attempt_id, spec);
            }
        });
    }

    /// Deadline fire action: cancels the attempt unless it already settled.
    /// The settle-vs-fire race is resolved through the pending map — exactly
    /// one party performs the terminal transition.
    fn fire_timeout(&self, name: &str, attempt_id: AttemptId, spec: TimeoutSpec) {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.get(name) {
                Some(entry) if entry.attempt_id == attempt_id => pending.remove(name),
                _ => None,
            }
        };
        let Some(entry) = entry else { return };

        let reason = AbortReason::timeout(spec.ms, spec.has_throw);
        tracing::info!(
            attempt_id = %attempt_id,
            name = %name,
            ms = spec.ms,
            "request cancelled due to a timeout"
        );
        counter!("supersede_timeouts_total", "name" => name.to_string()).increment(1);

        self.listeners.dispatch(EventKind::Timeout, &reason);
        entry.controller.cancel(reason);
        let state = if spec.has_throw {
            RequestState::Rejected
        } else {
            RequestState::Aborted
        };
        self.listeners.state().emit(state);
    }

    fn abort_all(&self, reason: Option<AbortReason>) {
        let entries: Vec<(String, PendingRequest)> = self.pending.lock().drain().collect();
        if entries.is_empty() {
            tracing::info!("no attempt in progress, abort ignored");
            return;
        }
        self.abort_entries(entries, reason);
    }

    fn abort_named(&self, names: &[&str], reason: Option<AbortReason>) {
        let entries: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock();
            names
                .iter()
                .filter_map(|name| pending.remove_entry(*name))
                .collect()
        };
        if entries.is_empty() {
            tracing::info!(?names, "no matching attempt in progress, abort ignored");
            return;
        }
        self.abort_entries(entries, reason);
    }

    fn abort_entries(&self, entries: Vec<(String, PendingRequest)>, reason: Option<AbortReason>) {
        let reason = reason.unwrap_or_else(|| AbortReason::aborted(ABORTED_WITHOUT_MESSAGE));
        counter!("supersede_aborts_total").increment(1);

        for (name, entry) in &entries {
            entry.timer.disarm();
            tracing::info!(
                attempt_id = %entry.attempt_id,
                name = %name,
                kind = %reason.kind,
                initiator = %reason.initiator,
                "attempt aborted"
            );
        }

        self.listeners.dispatch(EventKind::from(reason.kind), &reason);
        for (_, entry) in entries {
            entry.controller.cancel(reason.clone());
        }
        self.listeners.state().emit(state_from_kind(reason.kind));
    }
}

fn state_from_kind(kind: AbortKind) -> RequestState {
    match kind {
        AbortKind::Aborted => RequestState::Aborted,
        AbortKind::Cancelled => RequestState::Cancelled,
    }
}

/// Outcome of a cancelled attempt under the configured settling policy.
fn settle_cancelled<T>(reason: AbortReason, native: bool) -> Result<Option<T>> {
    if native || reason.is_hard_timeout() {
        Err(AborterError::Abort(reason))
    } else {
        Ok(None)
    }
}

fn reason_from_error(error: &AborterError) -> AbortReason {
    match error {
        AborterError::Abort(reason) => reason.clone(),
        AborterError::DeadlineExceeded { ms, has_throw } => {
            AbortReason::timeout(*ms, *has_throw)
        }
        other => AbortReason::aborted(normalized_message(other))
            .with_initiator(Initiator::System),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_attempt_resolves_with_the_value() {
        let aborter = Aborter::new();
        let result = aborter
            .attempt(|_signal| async { Ok("result") }, AttemptOptions::default())
            .await
            .unwrap();

        assert_eq!(result, Some("result"));
        assert_eq!(aborter.state(), Some(RequestState::Fulfilled));
        assert!(!aborter.is_in_progress());
    }

    #[tokio::test]
    async fn sequential_attempts_all_succeed() {
        let aborter = Aborter::new();
        for expected in ["result1", "result2", "result3"] {
            let result = aborter
                .attempt(move |_signal| async move { Ok(expected) }, AttemptOptions::default())
                .await
                .unwrap();
            assert_eq!(result, Some(expected));
        }
    }

    #[tokio::test]
    async fn genuine_failures_are_propagated() {
        let aborter = Aborter::new();
        let result: Result<Option<()>> = aborter
            .attempt(
                |_signal| async { Err(AborterError::Operation(anyhow::anyhow!("boom"))) },
                AttemptOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(AborterError::Operation(_))));
        assert_eq!(aborter.state(), Some(RequestState::Rejected));
    }

    #[tokio::test]
    async fn operation_observed_cancellations_are_recovered() {
        let aborter = Aborter::new();
        let result: Result<Option<()>> = aborter
            .attempt(
                |_signal| async {
                    Err(AborterError::Abort(AbortReason::aborted("request dropped")))
                },
                AttemptOptions::default(),
            )
            .await;

        assert!(matches!(result, Ok(None)));
        assert_eq!(aborter.state(), Some(RequestState::Aborted));
    }

    #[tokio::test]
    async fn abort_without_pending_attempt_is_a_noop() {
        let aborter = Aborter::new();
        aborter.abort();
        aborter.abort_with("nothing running");

        assert_eq!(aborter.state(), None);
        assert!(!aborter.aborted());
    }

    #[tokio::test]
    async fn recovery_installs_a_fresh_signal() {
        let aborter = Aborter::new();
        let old_signal = aborter.signal();

        let recovered = aborter.abort_with_recovery(None);
        assert!(!recovered.is_cancelled());
        assert!(!old_signal.is_cancelled());
    }
}
