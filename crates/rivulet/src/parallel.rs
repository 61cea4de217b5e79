//! Parallel pattern: hash-sharded fan-out to N child consumers.
//!
//! A single stream's total order is stronger than most applications
//! need. When events partition cleanly by some key, [`run`] spawns N
//! child runners that process disjoint shards concurrently while
//! preserving per-shard order. Each child opens its own stream from its
//! own persisted cursor and treats foreign-shard events as filtered
//! no-ops, so every shard's cursor advances past every event the stream
//! yields — a sparse shard still checkpoints past long runs of foreign
//! events.
//!
//! Routing uses a 32-bit FNV-1 hash of a per-event key (id, foreign id,
//! the decimal rendering of the kind, or a user-supplied extractor)
//! taken modulo the shard count. The hash is fixed so that the same
//! event maps to the same shard on every run, in every process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::consumer::Consumer;
use crate::cursor::CursorStore;
use crate::error::Error;
use crate::event::Event;
use crate::retry::{run_with_policy, RunPolicy};
use crate::runner::Spec;
use crate::stream::{StreamFactory, StreamOptions};

/// Built-in choices of the per-event shard key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashOption {
    /// Shard by the event id.
    #[default]
    EventId,
    /// Shard by the foreign id, keeping each business entity on one
    /// shard.
    EventForeignId,
    /// Shard by the event kind (decimal string rendering).
    EventType,
}

/// Extracts the byte key an event is sharded by.
pub type HashFn = Arc<dyn Fn(&Event) -> Vec<u8> + Send + Sync>;

/// Options for the parallel dispatcher.
#[derive(Clone, Default)]
pub struct ParallelOptions {
    hash: HashOption,
    hash_fn: Option<HashFn>,
    stream_options: StreamOptions,
    policy: RunPolicy,
}

impl ParallelOptions {
    /// Creates options sharding by event id under the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects a built-in shard key.
    #[must_use]
    pub fn with_hash(mut self, hash: HashOption) -> Self {
        self.hash = hash;
        self
    }

    /// Supplies a custom shard key extractor; takes precedence over
    /// [`with_hash`](Self::with_hash).
    #[must_use]
    pub fn with_hash_fn(mut self, f: impl Fn(&Event) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.hash_fn = Some(Arc::new(f));
        self
    }

    /// Stream options passed to every child's `open`.
    #[must_use]
    pub fn with_stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    /// Reconnect policy each child runs under.
    #[must_use]
    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves the configured key source to a single extractor.
    fn selector(&self) -> HashFn {
        if let Some(f) = &self.hash_fn {
            return Arc::clone(f);
        }
        match self.hash {
            HashOption::EventId => Arc::new(|event: &Event| event.id.clone().into_bytes()),
            HashOption::EventForeignId => {
                Arc::new(|event: &Event| event.foreign_id.clone().into_bytes())
            }
            HashOption::EventType => {
                Arc::new(|event: &Event| event.kind.to_string().into_bytes())
            }
        }
    }
}

impl std::fmt::Debug for ParallelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelOptions")
            .field("hash", &self.hash)
            .field("custom_hash_fn", &self.hash_fn.is_some())
            .finish()
    }
}

/// 32-bit FNV-1 hash.
///
/// Pinned so that shard assignment is stable across processes and
/// releases; changing the function would re-partition every deployed
/// consumer.
fn fnv1_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash = hash.wrapping_mul(PRIME);
        hash ^= u32::from(byte);
    }
    hash
}

/// Maps a shard key to its shard index for the given shard count.
///
/// # Panics
///
/// Panics if `n` is zero; the dispatcher validates the count before any
/// routing happens.
#[must_use]
pub fn shard_of(key: &[u8], n: usize) -> usize {
    fnv1_32(key) as usize % n
}

/// Derives the cursor-store name of shard `index` (0-based) of `n`.
fn shard_name(base: &str, index: usize, n: usize) -> String {
    format!("{base}_{}_of_{}", index + 1, n)
}

/// Wraps a consumer so it processes only its own shard's events.
struct ShardConsumer {
    name: String,
    index: usize,
    n: usize,
    selector: HashFn,
    inner: Box<dyn Consumer>,
}

impl ShardConsumer {
    fn new(inner: impl Consumer + 'static, index: usize, n: usize, selector: HashFn) -> Self {
        Self {
            name: shard_name(inner.name(), index, n),
            index,
            n,
            selector,
            inner: Box::new(inner),
        }
    }
}

#[async_trait]
impl Consumer for ShardConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&mut self, ctx: CancellationToken, event: Event) -> Result<(), Error> {
        self.inner.consume(ctx, event).await
    }

    fn matches(&self, event: &Event) -> bool {
        shard_of(&(self.selector)(event), self.n) == self.index && self.inner.matches(event)
    }

    fn max_lag(&self) -> Option<Duration> {
        self.inner.max_lag()
    }

    fn activity_ttl(&self) -> Option<Duration> {
        self.inner.activity_ttl()
    }
}

/// Fans one stream out to `n` independently-cursored shard consumers.
///
/// `ctx_of(i)` supplies each child's cancellation token (derive child
/// tokens from one parent for collective shutdown); `consumer_of(i)`
/// supplies each child's consumer, whose name becomes the base of the
/// shard name `{base}_{i+1}_of_{n}`. All children share the stream
/// factory and the cursor store, which must therefore tolerate
/// concurrent use.
///
/// Blocks until every child returns. Children absorb retriable errors
/// under the configured policy; the first non-retriable child error
/// cancels every child and is returned. Bounded children (streams
/// opened `to_head`) completing cleanly yield `Ok(())`.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for a zero shard count, the first
/// fatal child error, or [`Error::Cancelled`].
pub async fn run<X, F, C>(
    ctx_of: X,
    consumer_of: F,
    n: usize,
    stream_factory: Arc<dyn StreamFactory>,
    store: Arc<dyn CursorStore>,
    options: ParallelOptions,
) -> Result<(), Error>
where
    X: Fn(usize) -> CancellationToken,
    F: Fn(usize) -> C,
    C: Consumer + 'static,
{
    if n == 0 {
        return Err(Error::Configuration(
            "parallel consumer count must be at least 1".into(),
        ));
    }

    let selector = options.selector();
    let mut tokens = Vec::with_capacity(n);
    let mut children = tokio::task::JoinSet::new();

    for index in 0..n {
        let ctx = ctx_of(index);
        tokens.push(ctx.clone());

        let consumer = ShardConsumer::new(consumer_of(index), index, n, Arc::clone(&selector));
        let mut spec = Spec::new(Arc::clone(&stream_factory), Arc::clone(&store), consumer)
            .with_stream_options(options.stream_options.clone());
        let policy = options.policy.clone();

        children.spawn(async move { run_with_policy(&ctx, &mut spec, &policy).await });
    }

    let mut first_err: Option<Error> = None;
    while let Some(joined) = children.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(join_err) => Err(Error::Internal(format!("shard task failed: {join_err}"))),
        };
        if let Err(err) = result {
            if first_err.is_none() {
                for token in &tokens {
                    token.cancel();
                }
                first_err = Some(err);
            } else if !err.is_cancelled() {
                tracing::debug!(error = %err, "subsequent shard error suppressed");
            }
        }
    }

    first_err.map_or(Ok(()), Err)
}
