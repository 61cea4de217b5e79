//! Error types for stream consumption.
//!
//! Every fallible operation in the crate returns [`Error`]. The variants
//! fall into four classes ([`ErrorClass`]) that drive the reconnect
//! supervisor in [`crate::retry`]:
//!
//! - **Stopped**: the server terminated the stream cleanly; reconnect
//!   immediately without backoff.
//! - **Cancelled**: the caller cancelled the run; exit cleanly.
//! - **Transient**: network, timeout or I/O failure; back off and retry
//!   from the last persisted cursor.
//! - **Fatal**: callback failure, cursor store failure or configuration
//!   error; propagate to the caller without retry.

use thiserror::Error;

/// Boxed error type carried by consumer callback failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced while consuming a stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The server terminated the stream cleanly.
    #[error("stream stopped")]
    Stopped,

    /// A bounded stream reached the head of the log.
    ///
    /// Only produced by streams opened with
    /// [`StreamOptions::stream_to_head`](crate::StreamOptions::stream_to_head).
    /// The runner converts this into successful completion of a bounded
    /// run, so callers normally never observe it.
    #[error("stream head reached")]
    HeadReached,

    /// The run was cancelled by its cancellation token.
    #[error("run cancelled")]
    Cancelled,

    /// Failed to reach or stay connected to the stream producer.
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation timed out.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The cursor store failed to read or persist a position.
    #[error("cursor store error: {0}")]
    CursorStore(String),

    /// A consumer callback returned an error; surfaced verbatim.
    #[error("consumer {name} failed: {source}")]
    Consumer {
        /// Name of the failing consumer.
        name: String,
        /// The callback's error.
        #[source]
        source: BoxError,
    },

    /// Invalid configuration of a spec, option set or dispatcher.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An internal error that does not fit other categories.
    #[error("internal error: {0}")]
    Internal(String),

    /// An I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps an arbitrary callback error for the named consumer.
    pub fn consumer(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Consumer {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Returns `true` for a clean server-side stream termination.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped)
    }

    /// Returns `true` if the run was cancelled by its token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns the supervision class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Stopped => ErrorClass::Stopped,
            Error::Cancelled => ErrorClass::Cancelled,
            Error::Connection(_) | Error::Timeout(_) | Error::Io(_) => ErrorClass::Transient,
            Error::HeadReached
            | Error::CursorStore(_)
            | Error::Consumer { .. }
            | Error::Configuration(_)
            | Error::Internal(_) => ErrorClass::Fatal,
        }
    }
}

/// Supervision classes for [`Error`] values.
///
/// The default reconnect policy maps each class to an action; see
/// [`crate::retry::RunPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Clean server disconnect; reconnect immediately.
    Stopped,
    /// Caller-driven cancellation; exit cleanly.
    Cancelled,
    /// Likely to succeed on retry after a backoff interval.
    Transient,
    /// Propagate to the caller without retry.
    Fatal,
}
