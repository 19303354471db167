//! Request cancellation with automatic supersession of in-flight attempts.
//!
//! This crate provides an [`Aborter`] that wraps caller-supplied asynchronous
//! operations (typically HTTP requests): starting a new attempt cancels any
//! prior in-flight attempt with the same identity, timeouts race against
//! settlement, and lifecycle state is published to observers. Cancellations
//! are distinguished from genuine failures — by default a cancelled attempt
//! resolves to `Ok(None)` rather than surfacing an error.
//!
//! ```no_run
//! use supersede::{Aborter, AttemptOptions};
//!
//! # async fn example() -> supersede::Result<()> {
//! let aborter = Aborter::new();
//!
//! // A newer attempt supersedes the one before it.
//! let stale = aborter.attempt(
//!     |signal| async move { signal.check()?; Ok("first") },
//!     AttemptOptions::default(),
//! );
//! let fresh = aborter.attempt(
//!     |_signal| async move { Ok("second") },
//!     AttemptOptions::new().with_timeout(5_000u64),
//! );
//!
//! let (stale, fresh) = tokio::join!(stale, fresh);
//! assert_eq!(stale?, None);
//! assert_eq!(fresh?, Some("second"));
//! # Ok(())
//! # }
//! ```

pub mod aborter;
pub mod combinators;
pub mod error;
pub mod events;
pub mod http;
pub mod reason;
pub mod signal;
pub mod timer;

// Re-export commonly used types
pub use aborter::{
    Aborter, AborterOptions, AttemptId, AttemptOptions, TimeoutSpec, DEFAULT_REQUEST_NAME,
};
pub use combinators::{abortable, delayed, rethrow_abort, suppress_abort, Debouncer};
pub use error::{is_abort_error, AborterError, Result};
pub use events::{EventKind, ListenerId, Listeners, RequestState, StateObserver};
pub use http::HttpResponse;
pub use reason::{AbortKind, AbortReason, Initiator};
pub use signal::{AbortSignal, AttractListeners, Controller, ReusableController};
pub use timer::DeadlineTimer;
