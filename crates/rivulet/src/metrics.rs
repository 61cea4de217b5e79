//! Per-run counters and the consumer activity gauge.
//!
//! The runner and the ack path update a [`RunMetrics`] instance shared
//! through the [`Spec`](crate::Spec). No external metrics system is
//! bound; callers read snapshots and export them however they like.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Counters maintained across one consumer's runs.
#[derive(Debug)]
pub struct RunMetrics {
    /// Events delivered to the callback.
    events_total: AtomicU64,

    /// Events skipped by filter or lag cutoff (cursor still advanced).
    skipped_total: AtomicU64,

    /// Errors surfaced by recv, consume or the cursor store.
    errors_total: AtomicU64,

    /// Cursor store flushes, including the final flush of each run.
    flushes_total: AtomicU64,

    /// Explicit acknowledgements (ack pattern only).
    acks_total: AtomicU64,

    /// Events delivered since the last acknowledgement.
    pending_since_last_ack: AtomicU64,

    /// Id of the most recently acknowledged event.
    last_acked_id: Mutex<Option<String>>,

    /// Last time the runner made progress.
    last_activity: Mutex<Option<Instant>>,

    /// Liveness window configured on the consumer.
    activity_ttl: Mutex<Option<Duration>>,
}

impl RunMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            skipped_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            flushes_total: AtomicU64::new(0),
            acks_total: AtomicU64::new(0),
            pending_since_last_ack: AtomicU64::new(0),
            last_acked_id: Mutex::new(None),
            last_activity: Mutex::new(None),
            activity_ttl: Mutex::new(None),
        }
    }

    pub(crate) fn record_event(&self) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn record_skip(&self) {
        self.skipped_total.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pending(&self) {
        self.pending_since_last_ack.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack(&self, id: &str) {
        self.acks_total.fetch_add(1, Ordering::Relaxed);
        self.pending_since_last_ack.store(0, Ordering::Relaxed);
        *self.last_acked_id.lock() = Some(id.to_string());
        self.touch();
    }

    pub(crate) fn set_activity_ttl(&self, ttl: Option<Duration>) {
        *self.activity_ttl.lock() = ttl;
    }

    /// Marks the consumer as having made progress now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Some(Instant::now());
    }

    /// Returns `true` while the consumer is within its liveness window.
    ///
    /// A consumer with no configured activity TTL is always considered
    /// active. One with a TTL but no recorded activity yet is not.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let Some(ttl) = *self.activity_ttl.lock() else {
            return true;
        };
        self.last_activity
            .lock()
            .is_some_and(|at| at.elapsed() <= ttl)
    }

    /// Returns a point-in-time snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> RunMetricsSnapshot {
        RunMetricsSnapshot {
            events_total: self.events_total.load(Ordering::Relaxed),
            skipped_total: self.skipped_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            flushes_total: self.flushes_total.load(Ordering::Relaxed),
            acks_total: self.acks_total.load(Ordering::Relaxed),
            pending_since_last_ack: self.pending_since_last_ack.load(Ordering::Relaxed),
            last_acked_id: self.last_acked_id.lock().clone(),
        }
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of [`RunMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetricsSnapshot {
    /// Events delivered to the callback.
    pub events_total: u64,
    /// Events skipped by filter or lag cutoff.
    pub skipped_total: u64,
    /// Errors surfaced during runs.
    pub errors_total: u64,
    /// Cursor store flushes.
    pub flushes_total: u64,
    /// Explicit acknowledgements.
    pub acks_total: u64,
    /// Events delivered since the last acknowledgement.
    pub pending_since_last_ack: u64,
    /// Id of the most recently acknowledged event.
    pub last_acked_id: Option<String>,
}
