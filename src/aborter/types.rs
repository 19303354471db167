//! Vocabulary types for the coordinator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::events::{EventCallback, StateCallback};
use crate::reason::AbortReason;
use crate::signal::Controller;
use crate::timer::DeadlineTimer;

/// Identity used for attempts started without an explicit name.
pub const DEFAULT_REQUEST_NAME: &str = "default";

/// Unique identifier for a single attempt.
///
/// Distinguishes an attempt from its successors under the same identity, so
/// a late settlement of a superseded attempt is never honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub(crate) fn new() -> Self {
        AttemptId(Uuid::new_v4())
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for AttemptId {
    fn from(uuid: Uuid) -> Self {
        AttemptId(uuid)
    }
}

/// Timeout configuration for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSpec {
    /// Time in milliseconds after which the attempt is cancelled.
    pub ms: u64,
    /// When true, the timeout is surfaced as a hard rejection instead of
    /// silent aborted semantics.
    pub has_throw: bool,
}

impl TimeoutSpec {
    pub fn new(ms: u64) -> Self {
        TimeoutSpec { ms, has_throw: false }
    }

    /// A timeout that rejects the attempt instead of silently aborting it.
    pub fn hard(ms: u64) -> Self {
        TimeoutSpec { ms, has_throw: true }
    }

    /// The duration to arm the deadline timer with; `None` for a zero
    /// timeout, which never fires.
    pub fn duration(&self) -> Option<Duration> {
        if self.ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.ms))
        }
    }
}

impl From<u64> for TimeoutSpec {
    fn from(ms: u64) -> Self {
        TimeoutSpec::new(ms)
    }
}

impl From<Duration> for TimeoutSpec {
    fn from(duration: Duration) -> Self {
        TimeoutSpec::new(duration.as_millis() as u64)
    }
}

/// Per-attempt settings.
#[derive(Debug, Clone, Default)]
pub struct AttemptOptions {
    /// Identity of the attempt; attempts sharing a name supersede each
    /// other. Defaults to [`DEFAULT_REQUEST_NAME`].
    pub name: Option<String>,

    /// Automatic cancellation deadline.
    pub timeout: Option<TimeoutSpec>,

    /// When true, cancellations reject the attempt with a catchable error
    /// instead of being suppressed.
    pub is_error_native_behavior: bool,
}

impl AttemptOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<TimeoutSpec>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_native_errors(mut self) -> Self {
        self.is_error_native_behavior = true;
        self
    }
}

/// Construction settings for an [`Aborter`](crate::Aborter).
#[derive(Default)]
pub struct AborterOptions {
    /// Callback invoked ahead of subscribers for every cancellation-family
    /// event.
    pub on_abort: Option<EventCallback>,

    /// Callback invoked after subscribers on every state transition.
    pub on_state_change: Option<StateCallback>,
}

impl AborterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_abort<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AbortReason) + Send + Sync + 'static,
    {
        self.on_abort = Some(Arc::new(callback));
        self
    }

    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(crate::events::RequestState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for AborterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AborterOptions")
            .field("on_abort", &self.on_abort.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

/// Record of one in-flight attempt, owned exclusively by the coordinator.
///
/// Created at invocation start and removed on settle (success, failure, or
/// cancellation) or explicit abort.
pub(crate) struct PendingRequest {
    pub(crate) attempt_id: AttemptId,
    pub(crate) controller: Controller,
    pub(crate) timer: DeadlineTimer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_spec_conversions() {
        let from_ms: TimeoutSpec = 1500u64.into();
        assert_eq!(from_ms, TimeoutSpec { ms: 1500, has_throw: false });

        let from_duration: TimeoutSpec = Duration::from_secs(2).into();
        assert_eq!(from_duration.ms, 2000);

        assert!(TimeoutSpec::hard(10).has_throw);
        assert_eq!(TimeoutSpec::new(0).duration(), None);
        assert_eq!(
            TimeoutSpec::new(250).duration(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn attempt_id_display_is_truncated() {
        let id = AttemptId::new();
        assert_eq!(id.to_string().len(), 8);
    }
}
