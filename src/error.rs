//! Error types for the cancellation coordinator.

use thiserror::Error;

use crate::reason::AbortReason;

/// Result type alias using the supersede error type.
pub type Result<T> = std::result::Result<T, AborterError>;

/// Default message used when a cancellation is requested without one.
pub const ABORTED_WITHOUT_MESSAGE: &str = "signal is aborted without message";

/// Message attached to timeout cancellations.
pub const REQUEST_TIMED_OUT: &str = "the request timed out and an automatic abort occurred";

/// Message attached to supersession cancellations.
pub const PREVIOUS_ATTEMPT_CANCELLED: &str = "cancellation of the previous attempt";

/// Whole messages recognized as cancellations when classifying foreign errors.
///
/// This is the crate's single interop heuristic: an error whose entire
/// message equals one of these phrasings is treated as a cancellation.
/// Substring matching is deliberately not performed.
pub const ABORT_MESSAGES: [&str; 4] = [
    ABORTED_WITHOUT_MESSAGE,
    REQUEST_TIMED_OUT,
    PREVIOUS_ATTEMPT_CANCELLED,
    "abort",
];

/// Main error type for the cancellation coordinator.
#[derive(Error, Debug)]
pub enum AborterError {
    /// An attempt was cancelled or aborted; carries the full reason.
    #[error(transparent)]
    Abort(#[from] AbortReason),

    /// A deadline timer fired before the operation settled.
    ///
    /// Normally wrapped as the `cause` of an [`AbortReason`]; surfaces
    /// directly only when constructed by callers.
    #[error("the request timed out and an automatic abort occurred")]
    DeadlineExceeded {
        /// The configured timeout duration in milliseconds.
        ms: u64,
        /// When true, the timeout escalates to a hard rejection instead of
        /// silent aborted semantics.
        has_throw: bool,
    },

    /// Failed to decode a structured response body.
    #[error("error decoding response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any other error produced by the wrapped operation. Always propagated
    /// to the caller via rejection.
    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

impl AborterError {
    /// The cancellation reason carried by this error, if it is one.
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            AborterError::Abort(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Returns true if the error is recognized as a cancellation signal.
///
/// Classification rule, fixed crate-wide:
/// - the error is the crate's cancellation type (`Abort` or
///   `DeadlineExceeded`), or
/// - its whole message equals one of [`ABORT_MESSAGES`] (exact match, never a
///   substring), or
/// - its direct cause satisfies the same rule (one level only, no unbounded
///   traversal).
pub fn is_abort_error(error: &AborterError) -> bool {
    match error {
        AborterError::Abort(_) => true,
        AborterError::DeadlineExceeded { .. } => true,
        AborterError::Decode(_) => false,
        AborterError::Operation(inner) => {
            if inner.downcast_ref::<AbortReason>().is_some() {
                return true;
            }
            if is_abort_message(&inner.to_string()) {
                return true;
            }
            match inner.chain().nth(1) {
                Some(cause) => {
                    cause.downcast_ref::<AbortReason>().is_some()
                        || is_abort_message(&cause.to_string())
                }
                None => false,
            }
        }
    }
}

fn is_abort_message(message: &str) -> bool {
    ABORT_MESSAGES.iter().any(|known| *known == message)
}

/// The error's message, falling back to its direct cause's message when the
/// error renders empty, else the empty string.
pub fn normalized_message(error: &AborterError) -> String {
    let message = error.to_string();
    if !message.is_empty() {
        return message;
    }
    if let AborterError::Operation(inner) = error {
        if let Some(cause) = inner.chain().nth(1) {
            return cause.to_string();
        }
    }
    String::new()
}

/// Helper functions for serializing and deserializing errors to/from JSON.
///
/// Used to hand cancellation errors to structured logging sinks and to
/// observers living outside the process. Formatting is driven by an explicit
/// [`ReportOptions`] value rather than any process-wide flag.
pub mod serialization {
    use serde::{Deserialize, Serialize};

    use super::AborterError;

    /// Controls how much of an error is included in a serialized report.
    #[derive(Debug, Clone, Copy)]
    pub struct ReportOptions {
        /// Include the chain of source errors.
        pub include_sources: bool,
    }

    impl Default for ReportOptions {
        fn default() -> Self {
            ReportOptions { include_sources: true }
        }
    }

    /// Serialized error format that preserves the message and source chain.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SerializedError {
        /// The main error message
        pub message: String,
        /// Chain of source errors, if any
        pub sources: Vec<String>,
    }

    /// Serializes an [`AborterError`] to a JSON string.
    pub fn serialize_error(error: &AborterError, options: ReportOptions) -> String {
        let sources = if options.include_sources {
            let mut sources = Vec::new();
            let mut current = std::error::Error::source(error);
            while let Some(cause) = current {
                sources.push(cause.to_string());
                current = cause.source();
            }
            sources
        } else {
            Vec::new()
        };

        let serialized = SerializedError {
            message: error.to_string(),
            sources,
        };
        serde_json::to_string(&serialized).unwrap_or_else(|_| {
            format!(
                r#"{{"message":"{}","sources":[]}}"#,
                error.to_string().replace('"', "\\\"")
            )
        })
    }

    /// Deserializes an error from a JSON string.
    ///
    /// Returns an `anyhow::Error` with the original message and, when
    /// present, the source chain appended.
    pub fn deserialize_error(json: &str) -> anyhow::Error {
        match serde_json::from_str::<SerializedError>(json) {
            Ok(serialized) => {
                let mut error_msg = serialized.message;
                if !serialized.sources.is_empty() {
                    error_msg.push_str("\nCaused by:\n");
                    for (i, source) in serialized.sources.iter().enumerate() {
                        error_msg.push_str(&format!("  {}: {}\n", i + 1, source));
                    }
                }
                anyhow::anyhow!(error_msg)
            }
            Err(_) => {
                // Fallback: treat the entire string as an error message
                anyhow::anyhow!("Deserialization failed: {}", json)
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::reason::AbortReason;

        #[test]
        fn serialize_deserialize_simple_error() {
            let error = AborterError::Operation(anyhow::anyhow!("Test error"));
            let serialized = serialize_error(&error, ReportOptions::default());
            let deserialized = deserialize_error(&serialized);
            assert_eq!(error.to_string(), deserialized.to_string());
        }

        #[test]
        fn serialize_preserves_cause_chain() {
            let reason = AbortReason::timeout(100, false);
            let error = AborterError::Abort(reason);
            let serialized = serialize_error(&error, ReportOptions::default());
            let parsed: SerializedError = serde_json::from_str(&serialized).unwrap();
            assert_eq!(parsed.message, super::super::REQUEST_TIMED_OUT);
            assert_eq!(parsed.sources.len(), 1);
        }

        #[test]
        fn sources_omitted_when_disabled() {
            let error = AborterError::Abort(AbortReason::timeout(100, false));
            let serialized =
                serialize_error(&error, ReportOptions { include_sources: false });
            let parsed: SerializedError = serde_json::from_str(&serialized).unwrap();
            assert!(parsed.sources.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::{AbortKind, Initiator};

    #[test]
    fn freshly_constructed_cancellation_classifies_as_abort() {
        let error = AborterError::Abort(AbortReason::new(
            "whatever",
            AbortKind::Cancelled,
            Initiator::System,
        ));
        assert!(is_abort_error(&error));

        let timeout = AborterError::DeadlineExceeded { ms: 10, has_throw: false };
        assert!(is_abort_error(&timeout));
    }

    #[test]
    fn plain_errors_are_not_cancellations() {
        let error = AborterError::Operation(anyhow::anyhow!("connection reset by peer"));
        assert!(!is_abort_error(&error));
    }

    #[test]
    fn whole_message_matching_is_exact_not_substring() {
        let exact = AborterError::Operation(anyhow::anyhow!("abort"));
        assert!(is_abort_error(&exact));

        let substring = AborterError::Operation(anyhow::anyhow!("abort: pipeline stalled"));
        assert!(!is_abort_error(&substring));
    }

    #[test]
    fn one_level_of_cause_is_traversed() {
        let inner = anyhow::anyhow!(PREVIOUS_ATTEMPT_CANCELLED);
        let wrapped = AborterError::Operation(inner.context("request handler failed"));
        assert!(is_abort_error(&wrapped));
    }

    #[test]
    fn second_level_causes_are_ignored() {
        let deep = anyhow::anyhow!(PREVIOUS_ATTEMPT_CANCELLED)
            .context("middle layer")
            .context("outer layer");
        assert!(!is_abort_error(&AborterError::Operation(deep)));
    }

    #[test]
    fn normalized_message_falls_back_to_cause() {
        let inner = anyhow::anyhow!("root cause message");
        let wrapped = AborterError::Operation(inner.context(""));
        assert_eq!(normalized_message(&wrapped), "root cause message");
    }
}
