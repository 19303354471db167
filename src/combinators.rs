//! Small cancellation-aware building blocks.
//!
//! These compose operations with an [`AbortSignal`] outside the coordinator:
//! racing a future against cancellation, delaying a cancellable operation,
//! debouncing bursts of calls, and adapting results by their cancellation
//! classification.

use std::future::Future;
use std::time::Duration;

use crate::aborter::{Aborter, AttemptOptions};
use crate::error::{is_abort_error, AborterError, Result};
use crate::reason::{AbortReason, Initiator};
use crate::signal::AbortSignal;

const SIGNAL_BEFORE_DELAY: &str = "the signal was interrupted before the delay was armed";

/// Race a future against a signal.
///
/// Resolves with the future's output, or errs with the signal's cancellation
/// reason — including a cancellation that happened before the call.
pub async fn abortable<T, F>(signal: &AbortSignal, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    if let Some(reason) = signal.reason() {
        return Err(AborterError::Abort(reason));
    }

    tokio::select! {
        biased;
        reason = signal.cancelled() => Err(AborterError::Abort(reason)),
        value = future => Ok(value),
    }
}

/// Run an operation after a delay, cancellable throughout.
///
/// A signal cancelled before the call fails fast with a reason wrapping the
/// original one. Cancellation during the delay or the operation errs with
/// the signal's reason; the operation also receives the signal for its own
/// propagation.
pub async fn delayed<T, F, Fut>(signal: &AbortSignal, delay: Duration, operation: F) -> Result<T>
where
    F: FnOnce(AbortSignal) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(reason) = signal.reason() {
        if reason.message.is_empty() {
            tracing::warn!("signal interrupted before the delay was armed, with no message");
        }
        let message = if reason.message.is_empty() {
            SIGNAL_BEFORE_DELAY.to_string()
        } else {
            reason.message.clone()
        };
        return Err(AborterError::Abort(
            AbortReason::new(message, reason.kind, Initiator::Custom("delayed".to_string()))
                .with_cause(AborterError::Abort(reason)),
        ));
    }

    tokio::select! {
        biased;
        reason = signal.cancelled() => Err(AborterError::Abort(reason)),
        result = async {
            tokio::time::sleep(delay).await;
            operation(signal.clone()).await
        } => result,
    }
}

/// Leading-edge debouncer: each call supersedes the previous delayed
/// invocation, so only the last call within a burst runs.
///
/// Built on an internal [`Aborter`]; superseded callers observe the
/// coordinator's default suppressed outcome (`Ok(None)`).
pub struct Debouncer {
    aborter: Aborter,
    delay: Duration,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Debouncer { aborter: Aborter::new(), delay }
    }

    /// Schedule the operation after the debounce delay, cancelling any
    /// previously scheduled invocation.
    pub fn call<T, F, Fut>(&self, operation: F) -> impl Future<Output = Result<Option<T>>>
    where
        T: Send + 'static,
        F: FnOnce(AbortSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let delay = self.delay;
        self.aborter.attempt(
            move |signal| async move { delayed(&signal, delay, operation).await },
            AttemptOptions::default(),
        )
    }

    /// Cancel the currently scheduled invocation, if any.
    pub fn cancel(&self) {
        self.aborter.abort();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer").field("delay", &self.delay).finish_non_exhaustive()
    }
}

/// Silence cancellation errors, keeping everything else.
///
/// `Ok(v)` maps to `Ok(Some(v))`, abort-classified errors to `Ok(None)`,
/// and genuine failures propagate.
pub fn suppress_abort<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if is_abort_error(&error) => Ok(None),
        Err(error) => Err(error),
    }
}

/// Propagate cancellation errors, recovering everything else.
///
/// The inverse of [`suppress_abort`]: abort-classified errors propagate,
/// genuine failures map to `Ok(None)` for local handling.
pub fn rethrow_abort<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if is_abort_error(&error) => Err(error),
        Err(_) => Ok(None),
    }
}
