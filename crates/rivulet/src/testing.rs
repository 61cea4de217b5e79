//! Mock streams, in-memory cursor store and fixture helpers.
//!
//! Everything here is deterministic and in-process, for exercising the
//! run loop, the ack pattern and the parallel dispatcher without a real
//! producer. The mocks record enough history (cursor sets, flush
//! counts, stream opens) for tests to assert on the consumption
//! protocol itself.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cursor::CursorStore;
use crate::error::Error;
use crate::event::Event;
use crate::stream::{StreamClient, StreamFactory, StreamOptions};

/// In-memory cursor store recording its history.
///
/// `set` is immediately visible to `get` (the contract allows this);
/// `flush` only counts. Fault injection via [`fail_sets`](Self::fail_sets)
/// and [`fail_flushes`](Self::fail_flushes) simulates storage outages.
#[derive(Debug, Default)]
pub struct MemCursorStore {
    state: Mutex<MemCursorState>,
}

#[derive(Debug, Default)]
struct MemCursorState {
    cursors: HashMap<String, String>,
    history: Vec<(String, String)>,
    flushes: u64,
    set_fault: Option<String>,
    flush_fault: Option<String>,
}

impl MemCursorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with one cursor.
    #[must_use]
    pub fn with_cursor(name: impl Into<String>, cursor: impl Into<String>) -> Self {
        let store = Self::new();
        store
            .state
            .lock()
            .cursors
            .insert(name.into(), cursor.into());
        store
    }

    /// Current cursor for the name, empty if unset.
    #[must_use]
    pub fn cursor(&self, name: &str) -> String {
        self.state.lock().cursors.get(name).cloned().unwrap_or_default()
    }

    /// Every `(name, cursor)` pair passed to `set`, in call order.
    #[must_use]
    pub fn set_history(&self) -> Vec<(String, String)> {
        self.state.lock().history.clone()
    }

    /// The cursor values passed to `set`, in call order.
    #[must_use]
    pub fn sets(&self) -> Vec<String> {
        self.state
            .lock()
            .history
            .iter()
            .map(|(_, cursor)| cursor.clone())
            .collect()
    }

    /// Number of completed flushes.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.state.lock().flushes
    }

    /// Makes every subsequent `set` fail with the given message.
    pub fn fail_sets(&self, message: impl Into<String>) {
        self.state.lock().set_fault = Some(message.into());
    }

    /// Makes every subsequent `flush` fail with the given message.
    pub fn fail_flushes(&self, message: impl Into<String>) {
        self.state.lock().flush_fault = Some(message.into());
    }
}

#[async_trait]
impl CursorStore for MemCursorStore {
    async fn get(&self, name: &str) -> Result<String, Error> {
        Ok(self.cursor(name))
    }

    async fn set(&self, name: &str, cursor: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let Some(message) = &state.set_fault {
            return Err(Error::CursorStore(message.clone()));
        }
        state.cursors.insert(name.to_string(), cursor.to_string());
        state.history.push((name.to_string(), cursor.to_string()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let Some(message) = &state.flush_fault {
            return Err(Error::CursorStore(message.clone()));
        }
        state.flushes += 1;
        Ok(())
    }
}

/// How a [`MockStream`] behaves once its scripted events run out.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// Clean server-side termination ([`Error::Stopped`]).
    Stopped,
    /// Bounded stream exhausted ([`Error::HeadReached`]).
    HeadReached,
    /// Transient failure with the given message
    /// ([`Error::Connection`]).
    Error(String),
    /// Block until the run is cancelled.
    Pending,
}

/// A scripted stream yielding a fixed event sequence.
#[derive(Debug)]
pub struct MockStream {
    events: Vec<Event>,
    pos: usize,
    end: StreamEnd,
}

#[async_trait]
impl StreamClient for MockStream {
    async fn recv(&mut self) -> Result<Event, Error> {
        if let Some(event) = self.events.get(self.pos) {
            self.pos += 1;
            return Ok(event.clone());
        }
        match &self.end {
            StreamEnd::Stopped => Err(Error::Stopped),
            StreamEnd::HeadReached => Err(Error::HeadReached),
            StreamEnd::Error(message) => Err(Error::Connection(message.clone())),
            StreamEnd::Pending => std::future::pending().await,
        }
    }
}

/// A factory serving scripted, resumable streams.
///
/// Every `open` yields the scripted events strictly after the given
/// cursor, matched by event id. End behaviors are consumed from the
/// [`with_ends`](Self::with_ends) queue, one per open, falling back to
/// [`StreamEnd::Stopped`]; a `stream_to_head` open always ends with
/// [`StreamEnd::HeadReached`]. Other stream options are accepted and
/// ignored, as the contract allows for hints.
#[derive(Debug)]
pub struct MockStreamFactory {
    events: Vec<Event>,
    ends: Mutex<VecDeque<StreamEnd>>,
    opens: AtomicU64,
}

impl MockStreamFactory {
    /// Creates a factory serving the given events.
    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            ends: Mutex::new(VecDeque::new()),
            opens: AtomicU64::new(0),
        }
    }

    /// Scripts the end behavior of successive opens. The queue is
    /// consumed one entry per open; once empty, streams end with
    /// [`StreamEnd::Stopped`].
    #[must_use]
    pub fn with_ends(self, ends: Vec<StreamEnd>) -> Self {
        *self.ends.lock() = ends.into();
        self
    }

    /// Number of streams opened so far.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StreamFactory for MockStreamFactory {
    async fn open(
        &self,
        _ctx: &CancellationToken,
        after: &str,
        options: &StreamOptions,
    ) -> Result<Box<dyn StreamClient>, Error> {
        self.opens.fetch_add(1, Ordering::Relaxed);

        let start = if after.is_empty() {
            0
        } else {
            match self.events.iter().position(|event| event.id == after) {
                Some(index) => index + 1,
                None => {
                    return Err(Error::Internal(format!(
                        "mock stream has no event with cursor {after}"
                    )))
                }
            }
        };

        let end = if options.stream_to_head {
            StreamEnd::HeadReached
        } else {
            self.ends.lock().pop_front().unwrap_or(StreamEnd::Stopped)
        };

        Ok(Box::new(MockStream {
            events: self.events[start..].to_vec(),
            pos: 0,
            end,
        }))
    }
}

/// Events with the given ids, kind 0.
#[must_use]
pub fn events_with_ids(ids: &[&str]) -> Vec<Event> {
    ids.iter().map(|id| Event::new(*id, 0)).collect()
}

/// Events with the given kinds and sequential ids from "1".
#[must_use]
pub fn events_with_kinds(kinds: &[i32]) -> Vec<Event> {
    kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| Event::new((index + 1).to_string(), *kind))
        .collect()
}

/// Events with the given foreign ids and sequential ids from "1".
#[must_use]
pub fn events_with_foreign_ids(foreign_ids: &[&str]) -> Vec<Event> {
    foreign_ids
        .iter()
        .enumerate()
        .map(|(index, foreign_id)| {
            Event::new((index + 1).to_string(), 0).with_foreign_id(*foreign_id)
        })
        .collect()
}
