//! # rivulet
//!
//! Building blocks for reliable, resumable consumers of totally-ordered
//! event streams.
//!
//! A producer publishes an append-only sequence of immutable [`Event`]s,
//! each carrying a monotonically assigned cursor. Consumers attach to that
//! sequence, process each event at-least-once, and checkpoint their
//! position in a [`CursorStore`] so that restarts and failures cause no
//! silent loss.
//!
//! Three consumption patterns are provided:
//!
//! - the baseline run loop ([`run`], [`Spec`]) — callback success commits
//!   the event's cursor;
//! - the ack pattern ([`ack`]) — cursor advance is decoupled from callback
//!   return, enabling batching and selective acknowledgement;
//! - the parallel pattern ([`parallel`]) — one stream fanned out to N
//!   independently-cursored shard consumers by a deterministic hash.
//!
//! ## Architecture
//!
//! ```text
//! StreamFactory::open(after) -> StreamClient::recv()
//!                                    |
//!                                    v
//!                          Consumer::consume(event)
//!                                    |
//!                                    v
//!                   CursorStore::set(id) ... CursorStore::flush()
//! ```
//!
//! Concrete producers (gRPC services, blob readers, databases) and durable
//! cursor stores (SQL tables, key-value stores) live outside this crate;
//! the engine sees only the [`StreamFactory`] and [`CursorStore`]
//! contracts.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::unreadable_literal
    )
)]

/// Error taxonomy and classification predicates.
pub mod error;

/// The event record delivered by streams.
pub mod event;

/// Stream contracts: ordered, resumable, cancellable sequences.
pub mod stream;

/// Durable per-consumer cursor storage contract.
pub mod cursor;

/// Consumer contract and function-backed consumers.
pub mod consumer;

/// Per-run counters and the consumer activity gauge.
pub mod metrics;

/// The baseline run loop wiring stream, consumer and cursor store.
pub mod runner;

/// Acknowledgement pattern: explicit, per-event cursor commits.
pub mod ack;

/// Reconnect supervision and backoff policy.
pub mod retry;

/// Parallel pattern: hash-sharded fan-out to N child consumers.
pub mod parallel;

/// Mock streams, in-memory cursor store and fixture helpers.
pub mod testing;

pub use consumer::{new as new_consumer, Consumer, FnConsumer};
pub use cursor::CursorStore;
pub use error::{Error, ErrorClass};
pub use event::Event;
pub use metrics::{RunMetrics, RunMetricsSnapshot};
pub use retry::{run_forever, run_with_policy, Backoff, RunPolicy};
pub use runner::{run, Consumable, RunOptions, Spec};
pub use stream::{StreamClient, StreamFactory, StreamOptions};
