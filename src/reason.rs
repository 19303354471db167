//! Cancellation reasons attached to aborted and superseded attempts.
//!
//! Every cancellation in this crate carries an [`AbortReason`]: a tagged value
//! recording what happened ([`AbortKind`]), who triggered it ([`Initiator`]),
//! an optional nested cause, and optional structured metadata. Reasons are
//! immutable once constructed; composing them is done by wrapping an existing
//! error as the `cause` of a new reason, never by mutation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AborterError, ABORTED_WITHOUT_MESSAGE, REQUEST_TIMED_OUT};

/// The kind of cancellation.
///
/// `Cancelled` marks supersession by a newer attempt; `Aborted` marks
/// externally or timeout-triggered termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortKind {
    Aborted,
    Cancelled,
}

impl fmt::Display for AbortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortKind::Aborted => write!(f, "aborted"),
            AbortKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The initiator or source of a cancellation.
///
/// The well-known initiators are `User` (explicit abort), `System`
/// (supersession and other internal cancellations) and `Timeout`. Arbitrary
/// string identifiers are preserved as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Initiator {
    User,
    System,
    Timeout,
    Custom(String),
}

impl From<String> for Initiator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" => Initiator::User,
            "system" => Initiator::System,
            "timeout" => Initiator::Timeout,
            _ => Initiator::Custom(value),
        }
    }
}

impl From<Initiator> for String {
    fn from(value: Initiator) -> Self {
        match value {
            Initiator::User => "user".to_string(),
            Initiator::System => "system".to_string(),
            Initiator::Timeout => "timeout".to_string(),
            Initiator::Custom(name) => name,
        }
    }
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initiator::User => write!(f, "user"),
            Initiator::System => write!(f, "system"),
            Initiator::Timeout => write!(f, "timeout"),
            Initiator::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Reason attached to a cancelled attempt.
///
/// Carries a human-readable message, the cancellation [`AbortKind`], the
/// [`Initiator`], an optional nested cause, arbitrary metadata and a creation
/// timestamp. Kind and initiator never change after construction.
#[derive(Debug, Clone, Serialize)]
pub struct AbortReason {
    /// Human-readable description of the cancellation.
    pub message: String,

    /// Whether the attempt was superseded (`Cancelled`) or terminated
    /// externally (`Aborted`).
    pub kind: AbortKind,

    /// What triggered the cancellation.
    pub initiator: Initiator,

    /// The error that led to this cancellation, if any.
    #[serde(skip)]
    pub cause: Option<Arc<AborterError>>,

    /// Arbitrary structured data associated with the cancellation.
    /// Never overwritten once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// When the reason was constructed.
    pub created_at: DateTime<Utc>,
}

impl AbortReason {
    pub fn new(message: impl Into<String>, kind: AbortKind, initiator: Initiator) -> Self {
        AbortReason {
            message: message.into(),
            kind,
            initiator,
            cause: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// An `Aborted`-kind reason with the default `User` initiator.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(message, AbortKind::Aborted, Initiator::User)
    }

    /// A `Cancelled`-kind reason with the `System` initiator, used when a
    /// newer attempt supersedes an older one.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(message, AbortKind::Cancelled, Initiator::System)
    }

    /// The reason produced when a deadline timer fires: `Aborted`-kind,
    /// `Timeout` initiator, with a [`AborterError::DeadlineExceeded`] cause
    /// carrying the configured duration and escalation flag.
    pub fn timeout(ms: u64, has_throw: bool) -> Self {
        Self::new(REQUEST_TIMED_OUT, AbortKind::Aborted, Initiator::Timeout)
            .with_cause(AborterError::DeadlineExceeded { ms, has_throw })
    }

    pub fn with_cause(mut self, cause: AborterError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        if self.metadata.is_none() {
            self.metadata = Some(metadata);
        }
        self
    }

    pub fn with_initiator(mut self, initiator: Initiator) -> Self {
        self.initiator = initiator;
        self
    }

    /// True when the reason was produced by a deadline timer configured to
    /// surface the timeout as a hard failure instead of a silent abort.
    pub fn is_hard_timeout(&self) -> bool {
        matches!(
            self.cause.as_deref(),
            Some(AborterError::DeadlineExceeded { has_throw: true, .. })
        )
    }
}

/// Normalizes an arbitrary caller-supplied value into an [`AbortReason`].
///
/// Strings and other non-reason values are wrapped with the default message,
/// the `User` initiator, and the original value preserved as metadata.
impl From<&str> for AbortReason {
    fn from(value: &str) -> Self {
        AbortReason::aborted(ABORTED_WITHOUT_MESSAGE)
            .with_metadata(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for AbortReason {
    fn from(value: String) -> Self {
        AbortReason::aborted(ABORTED_WITHOUT_MESSAGE)
            .with_metadata(serde_json::Value::String(value))
    }
}

impl From<serde_json::Value> for AbortReason {
    fn from(value: serde_json::Value) -> Self {
        AbortReason::aborted(ABORTED_WITHOUT_MESSAGE).with_metadata(value)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AbortReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn std::error::Error + 'static))
    }
}
