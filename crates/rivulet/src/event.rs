//! The event record delivered by streams.

use std::time::{Duration, SystemTime};

/// An immutable record in the producer's append-only log.
///
/// Events are read-only once delivered; the runner clones them into
/// callbacks rather than sharing mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Opaque identifier, unique within the stream and monotonically
    /// ordered by production time. Numerically parseable for some
    /// sources, but the library never assumes so.
    pub id: String,

    /// Opaque identifier of the business entity the event refers to.
    /// May repeat across events.
    pub foreign_id: String,

    /// Integer discriminator carrying domain semantics (e.g. "created",
    /// "updated"). Treated as an opaque small integer.
    pub kind: i32,

    /// Wall-clock time at production.
    pub timestamp: SystemTime,

    /// Opaque payload bytes.
    pub metadata: Vec<u8>,
}

impl Event {
    /// Creates an event with the given id and kind, stamped now.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: i32) -> Self {
        Self {
            id: id.into(),
            foreign_id: String::new(),
            kind,
            timestamp: SystemTime::now(),
            metadata: Vec::new(),
        }
    }

    /// Sets the foreign id.
    #[must_use]
    pub fn with_foreign_id(mut self, foreign_id: impl Into<String>) -> Self {
        self.foreign_id = foreign_id.into();
        self
    }

    /// Sets the production timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the payload bytes.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Parses the id as an integer, for sources known to assign numeric
    /// cursors. Returns `None` for non-numeric ids.
    #[must_use]
    pub fn id_int(&self) -> Option<i64> {
        self.id.parse().ok()
    }

    /// Parses the foreign id as an integer. Returns `None` when it is
    /// empty or non-numeric.
    #[must_use]
    pub fn foreign_id_int(&self) -> Option<i64> {
        self.foreign_id.parse().ok()
    }

    /// Returns the event's age relative to the local wall clock, or
    /// `Duration::ZERO` for events stamped in the future.
    #[must_use]
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let event = Event::new("42", 7)
            .with_foreign_id("acct-9")
            .with_metadata(vec![1, 2, 3]);

        assert_eq!(event.id, "42");
        assert_eq!(event.kind, 7);
        assert_eq!(event.foreign_id, "acct-9");
        assert_eq!(event.metadata, vec![1, 2, 3]);
    }

    #[test]
    fn test_id_int() {
        assert_eq!(Event::new("42", 0).id_int(), Some(42));
        assert_eq!(Event::new("0x2a", 0).id_int(), None);
        assert_eq!(Event::new("42", 0).foreign_id_int(), None);
        assert_eq!(
            Event::new("1", 0).with_foreign_id("99").foreign_id_int(),
            Some(99)
        );
    }

    #[test]
    fn test_age() {
        let old = Event::new("1", 0)
            .with_timestamp(SystemTime::now() - Duration::from_secs(60));
        assert!(old.age() >= Duration::from_secs(59));

        let future = Event::new("2", 0)
            .with_timestamp(SystemTime::now() + Duration::from_secs(60));
        assert_eq!(future.age(), Duration::ZERO);
    }
}
