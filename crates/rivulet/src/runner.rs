//! The baseline run loop wiring stream, consumer and cursor store.
//!
//! A [`Spec`] bundles everything one run needs; [`run`] drives it until
//! cancellation, stream end or error. The loop is strictly sequential:
//! events are consumed in stream order, the cursor for event E is
//! recorded before event E+1 is consumed, and a final best-effort flush
//! runs on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::consumer::Consumer;
use crate::cursor::CursorStore;
use crate::error::{Error, ErrorClass};
use crate::metrics::RunMetrics;
use crate::stream::{StreamFactory, StreamOptions};

/// Tuning knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Flush the cursor store after this many cursor advances.
    pub flush_every: usize,

    /// Deadline for the best-effort final flush on exit.
    pub final_flush_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            flush_every: 1,
            final_flush_timeout: Duration::from_secs(1),
        }
    }
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushes after every `n` cursor advances (minimum 1).
    #[must_use]
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n.max(1);
        self
    }

    /// Bounds the final flush attempted on exit.
    #[must_use]
    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout = timeout;
        self
    }
}

/// How the runner advances the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Advance past every received event; callback success commits.
    Auto,
    /// Never advance; commits happen only through explicit acks.
    Manual,
}

/// Everything one run needs: stream factory, cursor store, consumer and
/// options.
///
/// A spec is reusable: the supervisor in [`crate::retry`] re-runs the
/// same spec across reconnects, resuming each time from the most
/// recently persisted cursor.
pub struct Spec {
    pub(crate) stream_factory: Arc<dyn StreamFactory>,
    pub(crate) store: Arc<dyn CursorStore>,
    pub(crate) consumer: Box<dyn Consumer>,
    pub(crate) stream_options: StreamOptions,
    pub(crate) run_options: RunOptions,
    pub(crate) advance: Advance,
    pub(crate) metrics: Arc<RunMetrics>,
}

impl Spec {
    /// Creates a spec with default stream and run options.
    pub fn new(
        stream_factory: Arc<dyn StreamFactory>,
        store: Arc<dyn CursorStore>,
        consumer: impl Consumer + 'static,
    ) -> Self {
        Self {
            stream_factory,
            store,
            consumer: Box::new(consumer),
            stream_options: StreamOptions::default(),
            run_options: RunOptions::default(),
            advance: Advance::Auto,
            metrics: Arc::new(RunMetrics::new()),
        }
    }

    /// Replaces the stream options.
    #[must_use]
    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    /// Replaces the run options.
    #[must_use]
    pub fn with_run_options(mut self, options: RunOptions) -> Self {
        self.run_options = options;
        self
    }

    /// Switches the spec to manual cursor advancement (ack pattern).
    pub(crate) fn manual_advance(mut self) -> Self {
        self.advance = Advance::Manual;
        self
    }

    /// Shares an externally created metrics instance (ack pattern).
    pub(crate) fn with_shared_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The consumer's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.consumer.name()
    }

    /// Handle to the run's metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<RunMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl std::fmt::Debug for Spec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spec")
            .field("consumer", &self.consumer.name())
            .field("advance", &self.advance)
            .finish()
    }
}

/// Races a fallible future against the cancellation token.
pub(crate) async fn or_cancelled<T>(
    ctx: &CancellationToken,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        () = ctx.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Drives one consumer against one stream until cancellation, stream end
/// or error.
///
/// The loop resumes from the consumer's persisted cursor, delivers
/// events in stream order, advances the cursor past filtered and stale
/// events without invoking the callback, and flushes on the configured
/// boundary. A final flush bounded by
/// [`RunOptions::final_flush_timeout`] is attempted on every exit path.
///
/// Returns `Ok(())` when a stream opened with
/// [`StreamOptions::stream_to_head`] reaches the head.
///
/// # Errors
///
/// - [`Error::Stopped`] on clean server termination (reconnect without
///   backoff; see [`crate::retry`]).
/// - [`Error::Cancelled`] when the token fires.
/// - Consumer callback errors, verbatim.
/// - Transient stream errors and fatal cursor store errors.
pub async fn run(ctx: &CancellationToken, spec: &mut Spec) -> Result<(), Error> {
    spec.metrics.set_activity_ttl(spec.consumer.activity_ttl());

    let result = run_loop(ctx, spec).await;
    if let Err(err) = &result {
        if matches!(err.class(), ErrorClass::Transient | ErrorClass::Fatal) {
            spec.metrics.record_error();
        }
    }

    match final_flush(spec).await {
        Ok(()) => spec.metrics.record_flush(),
        Err(flush_err) => {
            if result.is_ok() {
                // A bounded run must not report success without durability.
                return Err(flush_err);
            }
            tracing::warn!(
                consumer = spec.consumer.name(),
                error = %flush_err,
                "final cursor flush failed"
            );
        }
    }

    result
}

async fn run_loop(ctx: &CancellationToken, spec: &mut Spec) -> Result<(), Error> {
    let name = spec.consumer.name().to_string();

    let cursor = or_cancelled(ctx, spec.store.get(&name)).await?;
    tracing::debug!(consumer = %name, cursor = %cursor, "opening stream");
    let mut stream = or_cancelled(
        ctx,
        spec.stream_factory.open(ctx, &cursor, &spec.stream_options),
    )
    .await?;

    let mut since_flush = 0usize;
    loop {
        let event = tokio::select! {
            () = ctx.cancelled() => return Err(Error::Cancelled),
            received = stream.recv() => match received {
                Ok(event) => event,
                Err(Error::HeadReached) => return Ok(()),
                Err(err) => return Err(err),
            },
        };

        let stale = spec
            .consumer
            .max_lag()
            .is_some_and(|lag| event.age() > lag);
        if !stale && spec.consumer.matches(&event) {
            or_cancelled(ctx, spec.consumer.consume(ctx.clone(), event.clone())).await?;
            spec.metrics.record_event();
        } else {
            spec.metrics.record_skip();
        }

        if spec.advance == Advance::Auto {
            or_cancelled(ctx, spec.store.set(&name, &event.id)).await?;
            since_flush += 1;
            if since_flush >= spec.run_options.flush_every {
                or_cancelled(ctx, spec.store.flush()).await?;
                spec.metrics.record_flush();
                since_flush = 0;
            }
        }
    }
}

async fn final_flush(spec: &mut Spec) -> Result<(), Error> {
    let timeout = spec.run_options.final_flush_timeout;
    match tokio::time::timeout(timeout, spec.store.flush()).await {
        Ok(result) => result,
        Err(_) => Err(Error::CursorStore(format!(
            "final flush timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// A stream source bound to a cursor store, reusable across consumers.
///
/// Binds `(stream factory, cursor store, options)` once so several
/// consumers can be driven from one source definition:
///
/// ```rust,ignore
/// let consumable = Consumable::new(factory, store);
/// consumable.consume(&ctx, consumer::new("audit", handle)).await?;
/// ```
pub struct Consumable {
    stream_factory: Arc<dyn StreamFactory>,
    store: Arc<dyn CursorStore>,
    stream_options: StreamOptions,
    run_options: RunOptions,
}

impl Consumable {
    /// Binds a stream factory to a cursor store.
    pub fn new(stream_factory: Arc<dyn StreamFactory>, store: Arc<dyn CursorStore>) -> Self {
        Self {
            stream_factory,
            store,
            stream_options: StreamOptions::default(),
            run_options: RunOptions::default(),
        }
    }

    /// Replaces the stream options used for every consumer.
    #[must_use]
    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    /// Replaces the run options used for every consumer.
    #[must_use]
    pub fn with_run_options(mut self, options: RunOptions) -> Self {
        self.run_options = options;
        self
    }

    /// Runs the consumer against this source once; see [`run`].
    ///
    /// # Errors
    ///
    /// Propagates the result of [`run`].
    pub async fn consume(
        &self,
        ctx: &CancellationToken,
        consumer: impl Consumer + 'static,
    ) -> Result<(), Error> {
        let mut spec = Spec::new(
            Arc::clone(&self.stream_factory),
            Arc::clone(&self.store),
            consumer,
        )
        .with_stream_options(self.stream_options.clone())
        .with_run_options(self.run_options.clone());
        run(ctx, &mut spec).await
    }
}
