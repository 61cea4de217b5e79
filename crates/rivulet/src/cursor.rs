//! Durable per-consumer cursor storage.
//!
//! A cursor store remembers, per consumer name, the position up to which
//! the stream has been processed. `set` may buffer in memory; `flush` is
//! the durability barrier. Concrete stores (SQL tables, key-value
//! stores) live outside this crate.

use async_trait::async_trait;

use crate::error::Error;

/// Durable storage of per-consumer stream positions.
///
/// # Contract
///
/// - `get` returns the empty string for a name that has never been set,
///   meaning "from the beginning".
/// - `set` may coalesce in memory between flushes.
/// - After a successful `flush`, a `get` in any process returns a cursor
///   at least as advanced as every `set` that preceded the flush.
/// - A cursor persisted for consumer C after event E asserts that every
///   event up to and including E has been delivered to C at least once.
///
/// Implementations must be safe for concurrent use by multiple runners:
/// the parallel dispatcher shares one store across all shards. Updates
/// must be linearizable per name; atomicity across names is not
/// required.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Reads the cursor for the named consumer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CursorStore`] when the store is unreachable or
    /// corrupt.
    async fn get(&self, name: &str) -> Result<String, Error>;

    /// Records a new cursor for the named consumer. May buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CursorStore`] on write failure.
    async fn set(&self, name: &str, cursor: &str) -> Result<(), Error>;

    /// Forces buffered positions to durable storage. Returns only after
    /// durability is established.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CursorStore`] when durability cannot be
    /// established.
    async fn flush(&self) -> Result<(), Error>;
}
