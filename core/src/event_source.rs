//! Event source contract: where a read model pulls its events from.
//!
//! The engine never reasons about storage positions. It asks the source for a
//! bounded batch starting at a [`Cursor`] and, once events have been applied,
//! asks the source for the cursor that follows them.
//!
//! # Implementations
//!
//! - `InMemoryEventSource` (in `readmodel-testing` crate): deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use readmodel_core::cursor::Cursor;
//! use readmodel_core::event_source::{EventFilter, EventSource, EventSourceError};
//!
//! async fn catch_up<S: EventSource>(source: &S) -> Result<Cursor, EventSourceError> {
//!     let filter = EventFilter::new(Cursor::beginning())
//!         .with_event_types(vec!["NoteCreated".to_string()])
//!         .with_limit(100);
//!
//!     let events = source.load_events(filter).await?;
//!     source.get_next_cursor(&Cursor::beginning(), &events).await
//! }
//! ```

use crate::cursor::{Cursor, ReadModelName};
use crate::event::ReadModelEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by event sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventSourceError {
    /// Connectivity or availability problem; the caller retries the whole build.
    #[error("Transient event source error: {0}")]
    Transient(String),

    /// Any other failure (bad cursor, unreadable event, ...).
    #[error("Event source error: {0}")]
    Backend(String),
}

impl EventSourceError {
    /// Whether the error is a connectivity problem.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Batch request passed to [`EventSource::load_events`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Event types to load; `None` loads every type.
    pub event_types: Option<Vec<String>>,
    /// Aggregates to load; `None` loads every aggregate.
    pub aggregate_ids: Option<Vec<String>>,
    /// Soft cap on the summed event size in bytes. At least one event is
    /// returned even if it alone exceeds the cap.
    pub events_size_limit: usize,
    /// Maximum number of events.
    pub limit: usize,
    /// Position to read from (exclusive of everything already consumed).
    pub cursor: Cursor,
}

impl EventFilter {
    /// Filter reading everything from `cursor`, without limits.
    #[must_use]
    pub const fn new(cursor: Cursor) -> Self {
        Self {
            event_types: None,
            aggregate_ids: None,
            events_size_limit: usize::MAX,
            limit: usize::MAX,
            cursor,
        }
    }

    /// Restrict to event types.
    #[must_use]
    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// Restrict to aggregates.
    #[must_use]
    pub fn with_aggregate_ids(mut self, aggregate_ids: Vec<String>) -> Self {
        self.aggregate_ids = Some(aggregate_ids);
        self
    }

    /// Cap the number of events.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Cap the batch size in bytes.
    #[must_use]
    pub const fn with_events_size_limit(mut self, events_size_limit: usize) -> Self {
        self.events_size_limit = events_size_limit;
        self
    }

    /// Whether an event passes the type and aggregate restrictions.
    #[must_use]
    pub fn accepts(&self, event: &ReadModelEvent) -> bool {
        let type_ok = self
            .event_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| *t == event.event_type));
        let aggregate_ok = self
            .aggregate_ids
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|id| *id == event.aggregate_id));
        type_ok && aggregate_ok
    }
}

/// Source of events for read models.
///
/// # Ordering
///
/// Events are returned in the source's total order. Two loads from the same
/// cursor with the same filter return the same prefix.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the source can be shared as
/// `Arc<dyn EventSource>` in the engine context.
pub trait EventSource: Send + Sync {
    /// Load a bounded batch of events.
    ///
    /// # Errors
    ///
    /// - `Transient`: connectivity problem, retried by the caller of `build`
    /// - `Backend`: any other failure
    fn load_events(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ReadModelEvent>, EventSourceError>> + Send + '_>>;

    /// Cursor positioned after `applied_events`, which were loaded from `previous`.
    ///
    /// With no applied events the result equals `previous`.
    ///
    /// # Errors
    ///
    /// - `Transient`: connectivity problem, retried by the caller of `build`
    /// - `Backend`: the events do not belong to the stream
    fn get_next_cursor(
        &self,
        previous: &Cursor,
        applied_events: &[ReadModelEvent],
    ) -> Pin<Box<dyn Future<Output = Result<Cursor, EventSourceError>> + Send + '_>>;

    /// Register interest of a read model. Sources that push notifications use this;
    /// pull-only sources keep the default no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be recorded.
    fn subscribe(
        &self,
        read_model: &ReadModelName,
        event_types: Option<Vec<String>>,
        aggregate_ids: Option<Vec<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>> {
        let _ = (read_model, event_types, aggregate_ids);
        Box::pin(async { Ok(()) })
    }

    /// Change the interest of a subscribed read model.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be updated.
    fn resubscribe(
        &self,
        read_model: &ReadModelName,
        event_types: Option<Vec<String>>,
        aggregate_ids: Option<Vec<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>> {
        let _ = (read_model, event_types, aggregate_ids);
        Box::pin(async { Ok(()) })
    }

    /// Remove the interest of a read model.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be removed.
    fn unsubscribe(
        &self,
        read_model: &ReadModelName,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>> {
        let _ = read_model;
        Box::pin(async { Ok(()) })
    }
}
