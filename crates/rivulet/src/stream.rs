//! Stream contracts: ordered, resumable, cancellable event sequences.
//!
//! A [`StreamFactory`] produces a [`StreamClient`] positioned strictly
//! after a given cursor. The factory is the only thing the consumption
//! engine knows about a producer; gRPC servers, blob readers and
//! database pollers all hide behind it.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::event::Event;

/// An open, ordered event stream.
///
/// `recv` blocks until the next event is available, the owning run is
/// cancelled, or the stream ends. Implementations must surface
/// [`Error::Stopped`] for clean server-side termination so the
/// supervisor can reconnect without backoff, and [`Error::HeadReached`]
/// when a stream opened with [`StreamOptions::stream_to_head`] exhausts
/// the head. The stream is released by dropping it.
#[async_trait]
pub trait StreamClient: Send {
    /// Receives the next event in stream order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stopped`] on clean termination,
    /// [`Error::HeadReached`] when a bounded stream is exhausted, or a
    /// transient error on connection failure.
    async fn recv(&mut self) -> Result<Event, Error>;
}

/// Produces ordered, resumable event streams.
///
/// `open` returns a stream positioned strictly after `after`; the empty
/// cursor means "from the beginning". Factories are shared between the
/// parallel dispatcher's child runners, so they must be `Send + Sync`.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Opens a stream yielding events strictly after the given cursor.
    ///
    /// `options` carries hints the producer may honor; see
    /// [`StreamOptions`].
    ///
    /// # Errors
    ///
    /// Returns a transient error when the producer is unreachable, or
    /// [`Error::Cancelled`] when the token fires first.
    async fn open(
        &self,
        ctx: &CancellationToken,
        after: &str,
        options: &StreamOptions,
    ) -> Result<Box<dyn StreamClient>, Error>;
}

/// Hints passed to [`StreamFactory::open`].
///
/// This is a closed set: producers may honor or ignore each hint, but
/// the engine never grows the vocabulary per producer.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Start at the current head, skipping historical events.
    pub stream_from_head: bool,

    /// Start strictly after the current head; only events produced
    /// after `open` returns are delivered.
    pub stream_after_head: bool,

    /// End the stream once the head is reached, with
    /// [`Error::HeadReached`], instead of blocking for new events.
    pub stream_to_head: bool,

    /// Producer-side lag: hold events back until they are at least this
    /// old.
    pub stream_lag: Option<Duration>,

    /// Restrict delivery to these event kinds. Empty means all kinds.
    pub stream_types: Vec<i32>,
}

impl StreamOptions {
    /// Creates options with no hints set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts at the current head, skipping historical events.
    #[must_use]
    pub fn from_head(mut self) -> Self {
        self.stream_from_head = true;
        self
    }

    /// Starts strictly after the current head.
    #[must_use]
    pub fn after_head(mut self) -> Self {
        self.stream_after_head = true;
        self
    }

    /// Ends the stream at the head with [`Error::HeadReached`].
    #[must_use]
    pub fn to_head(mut self) -> Self {
        self.stream_to_head = true;
        self
    }

    /// Asks the producer to hold events back until they are `lag` old.
    #[must_use]
    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.stream_lag = Some(lag);
        self
    }

    /// Restricts delivery to the given event kinds.
    #[must_use]
    pub fn with_types(mut self, types: impl Into<Vec<i32>>) -> Self {
        self.stream_types = types.into();
        self
    }

    /// Returns `true` if the options admit the given event kind.
    #[must_use]
    pub fn wants_type(&self, kind: i32) -> bool {
        self.stream_types.is_empty() || self.stream_types.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let opts = StreamOptions::new()
            .from_head()
            .to_head()
            .with_lag(Duration::from_secs(30))
            .with_types(vec![1, 2]);

        assert!(opts.stream_from_head);
        assert!(!opts.stream_after_head);
        assert!(opts.stream_to_head);
        assert_eq!(opts.stream_lag, Some(Duration::from_secs(30)));
        assert_eq!(opts.stream_types, vec![1, 2]);
    }

    #[test]
    fn test_wants_type() {
        let all = StreamOptions::new();
        assert!(all.wants_type(1));
        assert!(all.wants_type(99));

        let some = StreamOptions::new().with_types(vec![1, 3]);
        assert!(some.wants_type(1));
        assert!(!some.wants_type(2));
        assert!(some.wants_type(3));
    }
}
