//! Acknowledgement pattern: explicit, per-event cursor commits.
//!
//! The baseline loop couples callback success to cursor advancement.
//! [`AckConsumer`] decouples them: the callback receives an
//! [`AckEvent`] whose [`ack`](AckEvent::ack) operation commits *that*
//! event's cursor, so applications can batch events and acknowledge only
//! the last of each batch, or skip acknowledgement entirely and have the
//! events re-delivered after a restart.
//!
//! ```rust,ignore
//! let consumer = AckConsumer::new("batcher", store, move |ctx, e: AckEvent| async move {
//!     batch.lock().push(e);
//!     if batch.lock().len() >= size {
//!         let last = batch.lock().last().cloned();
//!         last.unwrap().ack(&ctx).await?; // commits the whole batch
//!         batch.lock().clear();
//!     }
//!     Ok(())
//! });
//! let mut spec = ack::spec(factory, consumer);
//! rivulet::run(&ctx, &mut spec).await?;
//! ```

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::consumer::{ConsumeFuture, Consumer};
use crate::cursor::CursorStore;
use crate::error::Error;
use crate::event::Event;
use crate::metrics::RunMetrics;
use crate::runner::or_cancelled;
use crate::runner::Spec;
use crate::stream::StreamFactory;

/// An event paired with its acknowledgement operation.
///
/// The event's id is bound into the value at delivery time: calling
/// [`ack`](AckEvent::ack) commits the cursor up to and including *this*
/// event, which implicitly commits every previously delivered event.
/// Dereferences to the wrapped [`Event`].
pub struct AckEvent {
    event: Event,
    consumer: Arc<str>,
    store: Arc<dyn CursorStore>,
    metrics: Arc<RunMetrics>,
}

impl AckEvent {
    /// Commits this event's cursor and flushes it to durable storage.
    ///
    /// The store error, if any, is returned to the callback, which may
    /// return it (aborting the run) or swallow it and retry on a later
    /// event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CursorStore`] when the commit cannot be made
    /// durable, or [`Error::Cancelled`] when the token fires first.
    pub async fn ack(&self, ctx: &CancellationToken) -> Result<(), Error> {
        or_cancelled(ctx, self.store.set(&self.consumer, &self.event.id)).await?;
        or_cancelled(ctx, self.store.flush()).await?;
        self.metrics.record_flush();
        self.metrics.record_ack(&self.event.id);
        Ok(())
    }
}

impl Deref for AckEvent {
    type Target = Event;

    fn deref(&self) -> &Event {
        &self.event
    }
}

impl Clone for AckEvent {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            consumer: Arc::clone(&self.consumer),
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl std::fmt::Debug for AckEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckEvent")
            .field("id", &self.event.id)
            .field("consumer", &self.consumer)
            .finish()
    }
}

/// A consumer whose callback acknowledges events explicitly.
///
/// The runner never auto-advances the cursor for an ack consumer; the
/// only intra-run advances happen inside [`AckEvent::ack`]. Events
/// delivered but never acked are re-delivered after a restart
/// (at-least-once).
pub struct AckConsumer {
    name: Arc<str>,
    store: Arc<dyn CursorStore>,
    f: Box<dyn FnMut(CancellationToken, AckEvent) -> ConsumeFuture + Send>,
    metrics: Arc<RunMetrics>,
    filter: Option<Box<dyn Fn(&Event) -> bool + Send + Sync>>,
    lag: Option<Duration>,
    activity_ttl: Option<Duration>,
}

impl AckConsumer {
    /// Creates an ack consumer from a name, the cursor store acks commit
    /// to, and an async callback.
    pub fn new<F, Fut>(name: impl Into<String>, store: Arc<dyn CursorStore>, mut f: F) -> Self
    where
        F: FnMut(CancellationToken, AckEvent) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            store,
            f: Box::new(move |ctx, event| Box::pin(f(ctx, event))),
            metrics: Arc::new(RunMetrics::new()),
            filter: None,
            lag: None,
            activity_ttl: None,
        }
    }

    /// Restricts the callback to events the predicate accepts. Rejected
    /// events are not delivered and, unlike the baseline pattern, do not
    /// move the cursor: only acks do.
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

    /// Handle to the consumer's metrics (acks, pending count, last
    /// acked id).
    #[must_use]
    pub fn metrics(&self) -> Arc<RunMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl std::fmt::Debug for AckConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckConsumer").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Consumer for AckConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&mut self, ctx: CancellationToken, event: Event) -> Result<(), Error> {
        self.metrics.record_pending();
        let ack_event = AckEvent {
            event,
            consumer: Arc::clone(&self.name),
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
        };
        (self.f)(ctx, ack_event).await
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

/// Bundles a stream factory and an ack consumer into a runnable
/// [`Spec`] in manual-advance mode.
///
/// The runner reads the cursor store once at startup and performs
/// exactly one final best-effort flush on exit; every other advance
/// happens inside [`AckEvent::ack`]. The total number of flushes across
/// a run therefore equals the number of acks plus one.
pub fn spec(stream_factory: Arc<dyn StreamFactory>, consumer: AckConsumer) -> Spec {
    let store = Arc::clone(&consumer.store);
    let metrics = consumer.metrics();
    Spec::new(stream_factory, store, consumer)
        .manual_advance()
        .with_shared_metrics(metrics)
}
