//! In-memory event source.
//!
//! Events live in an append-only vector. A cursor is the decimal offset of the
//! next unread position in that vector (`null` is offset zero).

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use readmodel_core::cursor::{Cursor, ReadModelName};
use readmodel_core::event::ReadModelEvent;
use readmodel_core::event_source::{EventFilter, EventSource, EventSourceError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Subscription recorded by [`InMemoryEventSource`]: `(event_types, aggregate_ids)`.
pub type Subscription = (Option<Vec<String>>, Option<Vec<String>>);

/// In-memory [`EventSource`].
///
/// # Example
///
/// ```
/// use readmodel_testing::InMemoryEventSource;
/// use readmodel_core::cursor::Cursor;
/// use readmodel_core::event::ReadModelEvent;
/// use readmodel_core::event_source::{EventFilter, EventSource};
/// use serde_json::Value;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = InMemoryEventSource::new();
/// source.append(ReadModelEvent::new("a1", 1, "NoteCreated", Value::Null));
///
/// let events = source.load_events(EventFilter::new(Cursor::beginning())).await?;
/// let next = source.get_next_cursor(&Cursor::beginning(), &events).await?;
/// assert_eq!(next, Cursor::new("1"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventSource {
    events: Arc<RwLock<Vec<ReadModelEvent>>>,
    subscriptions: Arc<RwLock<HashMap<ReadModelName, Subscription>>>,
    pending_failures: Arc<RwLock<Vec<EventSourceError>>>,
    loads: Arc<AtomicUsize>,
}

impl InMemoryEventSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding `events`
    #[must_use]
    pub fn with_events(events: impl IntoIterator<Item = ReadModelEvent>) -> Self {
        let source = Self::new();
        source.append_all(events);
        source
    }

    /// Append one event to the log
    pub fn append(&self, event: ReadModelEvent) {
        self.events.write().unwrap().push(event);
    }

    /// Append events to the log
    pub fn append_all(&self, events: impl IntoIterator<Item = ReadModelEvent>) {
        self.events.write().unwrap().extend(events);
    }

    /// Number of events in the log
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    /// Number of `load_events` calls so far
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make the next `load_events` or `get_next_cursor` call fail with `error`
    pub fn fail_next(&self, error: EventSourceError) {
        self.pending_failures.write().unwrap().push(error);
    }

    /// Current subscription of a read model, if subscribed
    #[must_use]
    pub fn subscription(&self, read_model: &ReadModelName) -> Option<Subscription> {
        self.subscriptions.read().unwrap().get(read_model).cloned()
    }

    fn take_failure(&self) -> Option<EventSourceError> {
        let mut failures = self.pending_failures.write().unwrap();
        if failures.is_empty() {
            None
        } else {
            Some(failures.remove(0))
        }
    }
}

fn offset(cursor: &Cursor) -> Result<usize, EventSourceError> {
    cursor.as_token().map_or(Ok(0), |token| {
        token
            .parse()
            .map_err(|_| EventSourceError::Backend(format!("malformed cursor {token}")))
    })
}

impl EventSource for InMemoryEventSource {
    fn load_events(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReadModelEvent>, EventSourceError>> + Send + '_>>
    {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.take_failure() {
                return Err(error);
            }

            let start = offset(&filter.cursor)?;
            let events = self.events.read().unwrap();
            let mut batch = Vec::new();
            let mut size = 0;
            for event in events.iter().skip(start).filter(|e| filter.accepts(e)) {
                if batch.len() >= filter.limit {
                    break;
                }
                size += event.approximate_size();
                if size > filter.events_size_limit && !batch.is_empty() {
                    break;
                }
                batch.push(event.clone());
            }
            Ok(batch)
        })
    }

    fn get_next_cursor(
        &self,
        previous: &Cursor,
        applied_events: &[ReadModelEvent],
    ) -> Pin<Box<dyn Future<Output = Result<Cursor, EventSourceError>> + Send + '_>> {
        let previous = previous.clone();
        let applied = applied_events.to_vec();
        Box::pin(async move {
            if let Some(error) = self.take_failure() {
                return Err(error);
            }
            if applied.is_empty() {
                return Ok(previous);
            }

            // The applied events are a prefix of a filtered load from `previous`:
            // match them in order and stop after the last one.
            let start = offset(&previous)?;
            let events = self.events.read().unwrap();
            let mut pending = applied.iter().peekable();
            for (index, event) in events.iter().enumerate().skip(start) {
                if pending.next_if(|applied| *applied == event).is_some()
                    && pending.peek().is_none()
                {
                    return Ok(Cursor::new((index + 1).to_string()));
                }
            }
            let missing = pending.next().unwrap();
            Err(EventSourceError::Backend(format!(
                "event {}@{} not found after cursor {previous}",
                missing.aggregate_id, missing.aggregate_version
            )))
        })
    }

    fn subscribe(
        &self,
        read_model: &ReadModelName,
        event_types: Option<Vec<String>>,
        aggregate_ids: Option<Vec<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>> {
        self.subscriptions
            .write()
            .unwrap()
            .insert(read_model.clone(), (event_types, aggregate_ids));
        Box::pin(async { Ok(()) })
    }

    fn resubscribe(
        &self,
        read_model: &ReadModelName,
        event_types: Option<Vec<String>>,
        aggregate_ids: Option<Vec<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>> {
        self.subscribe(read_model, event_types, aggregate_ids)
    }

    fn unsubscribe(
        &self,
        read_model: &ReadModelName,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>> {
        self.subscriptions.write().unwrap().remove(read_model);
        Box::pin(async { Ok(()) })
    }
}
