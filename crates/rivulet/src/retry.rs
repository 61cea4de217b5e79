//! Reconnect supervision and backoff policy.
//!
//! [`run`](crate::run) performs exactly one run and surfaces every
//! error; the retry policy that turns a spec into a long-running
//! consumer lives here. [`run_with_policy`] implements the canonical
//! loop: reconnect immediately on a clean server stop, back off and
//! retry on transient failures (resuming from the last persisted
//! cursor), exit on cancellation, and propagate fatal errors. The
//! default policy is a fixed five-second backoff; applications replace
//! it with [`RunPolicy`] builders or their own loop over
//! [`run`](crate::run).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorClass};
use crate::runner::{run, Spec};

const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Delay schedule between retries of a transient failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Multiplier applied per consecutive failure.
    pub multiplier: f64,
    /// Ceiling on the delay.
    pub max: Duration,
}

impl Backoff {
    /// A constant interval between retries.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            multiplier: 1.0,
            max: interval,
        }
    }

    /// Exponential escalation, doubling up to `max`.
    #[must_use]
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max,
        }
    }

    /// Delay before the given 1-based attempt.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // consecutive-failure counts stay small
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt as i32).saturating_sub(1);
        let delay = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max.as_secs_f64()))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(DEFAULT_BACKOFF)
    }
}

/// Classifier override mapping errors to supervision actions.
pub type Classifier = Arc<dyn Fn(&Error) -> ErrorClass + Send + Sync>;

/// The replaceable reconnect policy used by [`run_with_policy`].
#[derive(Clone, Default)]
pub struct RunPolicy {
    backoff: Backoff,
    classifier: Option<Classifier>,
}

impl RunPolicy {
    /// The default policy: fixed 5-second backoff, default
    /// classification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replaces the error classification. The default is
    /// [`Error::class`].
    #[must_use]
    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&Error) -> ErrorClass + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Classifies an error under this policy.
    #[must_use]
    pub fn classify(&self, err: &Error) -> ErrorClass {
        match &self.classifier {
            Some(classifier) => classifier(err),
            None => err.class(),
        }
    }
}

impl std::fmt::Debug for RunPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPolicy")
            .field("backoff", &self.backoff)
            .field("custom_classifier", &self.classifier.is_some())
            .finish()
    }
}

/// Runs the spec under the default policy until cancellation, fatal
/// error, or bounded completion.
///
/// # Errors
///
/// See [`run_with_policy`].
pub async fn run_forever(ctx: &CancellationToken, spec: &mut Spec) -> Result<(), Error> {
    run_with_policy(ctx, spec, &RunPolicy::default()).await
}

/// Runs the spec under the given policy until cancellation, fatal
/// error, or bounded completion.
///
/// Each inner run resumes from the most recently persisted cursor.
/// Clean server stops reconnect immediately and reset the backoff;
/// consecutive transient failures escalate it.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] when the token fires, or the first
/// fatal error (consumer callback failures verbatim, cursor store
/// failures, configuration errors).
pub async fn run_with_policy(
    ctx: &CancellationToken,
    spec: &mut Spec,
    policy: &RunPolicy,
) -> Result<(), Error> {
    let mut attempt = 0usize;
    loop {
        let err = match run(ctx, spec).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        match policy.classify(&err) {
            ErrorClass::Stopped => {
                attempt = 0;
                tracing::debug!(consumer = spec.name(), "stream stopped, reconnecting");
            }
            ErrorClass::Cancelled | ErrorClass::Fatal => return Err(err),
            ErrorClass::Transient => {
                attempt += 1;
                let delay = policy.backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    consumer = spec.name(),
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient stream error, backing off"
                );
                tokio::select! {
                    () = ctx.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::consumer;
    use crate::testing::{events_with_ids, MemCursorStore, MockStreamFactory, StreamEnd};
    use crate::{CursorStore, StreamFactory};

    #[test]
    fn test_backoff_fixed() {
        let backoff = Backoff::fixed(Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(7), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(400));
        // Capped at the ceiling.
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_policy_classifier_override() {
        let policy = RunPolicy::new().with_classifier(|_err| ErrorClass::Fatal);
        assert_eq!(policy.classify(&Error::Stopped), ErrorClass::Fatal);

        let default_policy = RunPolicy::new();
        assert_eq!(default_policy.classify(&Error::Stopped), ErrorClass::Stopped);
    }

    #[tokio::test]
    async fn test_reconnects_on_stopped_without_backoff() {
        let store = Arc::new(MemCursorStore::new());
        let factory = Arc::new(
            MockStreamFactory::new(events_with_ids(&["1", "2", "3"]))
                .with_ends(vec![StreamEnd::Stopped, StreamEnd::HeadReached]),
        );

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let consumer = consumer::new("reconnector", move |_ctx, event: crate::Event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(event.id);
                Ok(())
            }
        });

        let mut spec = Spec::new(
            Arc::clone(&factory) as Arc<dyn StreamFactory>,
            Arc::clone(&store) as Arc<dyn CursorStore>,
            consumer,
        );
        run_forever(&CancellationToken::new(), &mut spec)
            .await
            .unwrap();

        // First connection consumed everything; the reconnect resumed
        // after the persisted cursor and saw no new events.
        assert_eq!(factory.opens(), 2);
        assert_eq!(*seen.lock(), vec!["1", "2", "3"]);
        assert_eq!(store.cursor("reconnector"), "3");
    }

    #[tokio::test]
    async fn test_transient_error_retries_with_backoff() {
        let store = Arc::new(MemCursorStore::new());
        let factory = Arc::new(
            MockStreamFactory::new(events_with_ids(&["1"]))
                .with_ends(vec![
                    StreamEnd::Error("connection reset".into()),
                    StreamEnd::HeadReached,
                ]),
        );

        let consumer = consumer::new("retrier", |_ctx, _event| async { Ok(()) });
        let mut spec = Spec::new(
            Arc::clone(&factory) as Arc<dyn StreamFactory>,
            Arc::clone(&store) as Arc<dyn CursorStore>,
            consumer,
        );
        let policy = RunPolicy::new().with_backoff(Backoff::fixed(Duration::from_millis(1)));

        run_with_policy(&CancellationToken::new(), &mut spec, &policy)
            .await
            .unwrap();

        assert_eq!(factory.opens(), 2);
        assert_eq!(store.cursor("retrier"), "1");
    }

    #[tokio::test]
    async fn test_fatal_error_propagates() {
        let store = Arc::new(MemCursorStore::new());
        let factory = Arc::new(MockStreamFactory::new(events_with_ids(&["1"])));

        let consumer = consumer::new("fatal", |_ctx, _event| async {
            Err(Error::consumer("fatal", "unprocessable"))
        });
        let mut spec = Spec::new(factory, Arc::clone(&store) as Arc<dyn CursorStore>, consumer);

        let err = run_forever(&CancellationToken::new(), &mut spec)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unprocessable"));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let store = Arc::new(MemCursorStore::new());
        let factory = Arc::new(
            MockStreamFactory::new(Vec::new())
                .with_ends(vec![StreamEnd::Error("flaky".into())]),
        );

        let consumer = consumer::new("cancelled", |_ctx, _event| async { Ok(()) });
        let mut spec = Spec::new(factory, Arc::clone(&store) as Arc<dyn CursorStore>, consumer);
        let policy = RunPolicy::new().with_backoff(Backoff::fixed(Duration::from_secs(3600)));

        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = run_with_policy(&ctx, &mut spec, &policy).await.unwrap_err();
        assert!(err.is_cancelled());
        handle.await.unwrap();
    }
}
