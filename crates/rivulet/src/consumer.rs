//! Consumer contract and function-backed consumers.
//!
//! A consumer is a named unit of processing logic. The name is the
//! primary key in the cursor store, so renaming a consumer forks a
//! fresh position. Most applications build consumers from async
//! closures via [`new`]; the [`Consumer`] trait exists for stateful
//! implementations and for the wrappers in [`crate::ack`] and
//! [`crate::parallel`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::event::Event;

/// Boxed future returned by consumer callbacks.
pub(crate) type ConsumeFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// A named unit of event processing.
#[async_trait]
pub trait Consumer: Send {
    /// The stable name identifying this consumer in the cursor store.
    fn name(&self) -> &str;

    /// Processes one event. Returning `Ok` commits the event's cursor in
    /// the baseline pattern.
    ///
    /// # Errors
    ///
    /// Any error aborts the current run and is returned to the caller
    /// verbatim; the run loop never retries a callback.
    async fn consume(&mut self, ctx: CancellationToken, event: Event) -> Result<(), Error>;

    /// Returns `true` if this consumer wants the event. Rejected events
    /// are delivered semantically as no-ops: the cursor still advances
    /// past them.
    fn matches(&self, _event: &Event) -> bool {
        true
    }

    /// Staleness cutoff: events older than this are skipped (cursor
    /// still advances). `None` disables the cutoff.
    fn max_lag(&self) -> Option<Duration> {
        None
    }

    /// Liveness window for the activity gauge; see
    /// [`RunMetrics::is_active`](crate::RunMetrics::is_active).
    fn activity_ttl(&self) -> Option<Duration> {
        None
    }
}

/// A consumer backed by an async closure.
///
/// Built by [`new`]; configured with the builder methods.
pub struct FnConsumer {
    name: String,
    f: Box<dyn FnMut(CancellationToken, Event) -> ConsumeFuture + Send>,
    filter: Option<Box<dyn Fn(&Event) -> bool + Send + Sync>>,
    lag: Option<Duration>,
    activity_ttl: Option<Duration>,
}

/// Creates a consumer from a name and an async closure.
///
/// ```rust,ignore
/// let consumer = rivulet::consumer::new("orders", |_ctx, event: Event| async move {
///     process(event).await
/// });
/// ```
pub fn new<F, Fut>(name: impl Into<String>, mut f: F) -> FnConsumer
where
    F: FnMut(CancellationToken, Event) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    FnConsumer {
        name: name.into(),
        f: Box::new(move |ctx, event| Box::pin(f(ctx, event))),
        filter: None,
        lag: None,
        activity_ttl: None,
    }
}

impl FnConsumer {
    /// Restricts the consumer to events the predicate accepts. Rejected
    /// events are skipped with the cursor still advancing.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Skips events older than `lag` at delivery time.
    #[must_use]
    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = Some(lag);
        self
    }

    /// Sets the liveness window for the activity gauge.
    #[must_use]
    pub fn with_activity_ttl(mut self, ttl: Duration) -> Self {
        self.activity_ttl = Some(ttl);
        self
    }
}

impl std::fmt::Debug for FnConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnConsumer").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Consumer for FnConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&mut self, ctx: CancellationToken, event: Event) -> Result<(), Error> {
        (self.f)(ctx, event).await
    }

    fn matches(&self, event: &Event) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    fn max_lag(&self) -> Option<Duration> {
        self.lag
    }

    fn activity_ttl(&self) -> Option<Duration> {
        self.activity_ttl
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::SystemTime;

    use super::*;

    #[tokio::test]
    async fn test_fn_consumer_invokes_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);

        let mut consumer = new("counter", move |_ctx, _event| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });

        assert_eq!(consumer.name(), "counter");
        consumer
            .consume(CancellationToken::new(), Event::new("1", 0))
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_fn_consumer_error_passthrough() {
        let mut consumer = new("failing", |_ctx, _event| async {
            Err(Error::consumer("failing", "boom"))
        });

        let err = consumer
            .consume(CancellationToken::new(), Event::new("1", 0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_filter() {
        let consumer =
            new("typed", |_ctx, _event| async { Ok(()) }).with_filter(|e| e.kind == 2);

        assert!(!consumer.matches(&Event::new("1", 1)));
        assert!(consumer.matches(&Event::new("2", 2)));
    }

    #[test]
    fn test_lag_and_ttl() {
        let consumer = new("lagged", |_ctx, _event| async { Ok(()) })
            .with_lag(Duration::from_secs(60))
            .with_activity_ttl(Duration::from_secs(300));

        assert_eq!(consumer.max_lag(), Some(Duration::from_secs(60)));
        assert_eq!(consumer.activity_ttl(), Some(Duration::from_secs(300)));

        let fresh = Event::new("1", 0).with_timestamp(SystemTime::now());
        assert!(fresh.age() < Duration::from_secs(60));
    }
}
