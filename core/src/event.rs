//! Events as seen by read-model projections.
//!
//! Events are immutable facts loaded from an [`EventSource`]. The engine does not
//! care how they were written; it only relies on the fields below and on the
//! total order in which the source hands them out.
//!
//! # Example
//!
//! ```
//! use readmodel_core::event::ReadModelEvent;
//! use serde_json::json;
//!
//! let event = ReadModelEvent::new("a1", 1, "NoteCreated", json!({ "text": "hi" }))
//!     .with_timestamp(1_700_000_000_000);
//!
//! assert_eq!(event.event_type, "NoteCreated");
//! assert_eq!(event.payload["text"], "hi");
//! ```
//!
//! [`EventSource`]: crate::event_source::EventSource

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single event delivered to a projection.
///
/// Serialized in camelCase with the type under `"type"`:
///
/// ```json
/// { "aggregateId": "a1", "aggregateVersion": 1, "timestamp": 0,
///   "type": "NoteCreated", "payload": { "text": "hi" } }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadModelEvent {
    /// Aggregate instance that emitted the event.
    pub aggregate_id: String,

    /// Version of the aggregate after this event (1-based, per aggregate).
    pub aggregate_version: u64,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,

    /// Event type used to pick the projection handler.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event body.
    #[serde(default)]
    pub payload: Value,
}

impl ReadModelEvent {
    /// Create an event with a zero timestamp.
    #[must_use]
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_version: u64,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_version,
            timestamp: 0,
            event_type: event_type.into(),
            payload,
        }
    }

    /// Set the event timestamp (milliseconds since the epoch).
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Approximate encoded size, used to honour `events_size_limit`.
    ///
    /// Counts the identifier, type and the JSON encoding of the payload.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.aggregate_id.len() + self.event_type.len() + self.payload.to_string().len()
    }
}
