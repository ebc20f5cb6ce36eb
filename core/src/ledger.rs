//! The ledger: persisted progress record of one read model.
//!
//! A [`ReadModelLedger`] is the single source of truth for how far a read model
//! has progressed, whether it is paused or failed, and whether a build is in
//! flight ([`Lease`]). It is always read-modify-written through a
//! [`LedgerStore`] using the [`Revision`] it was read at, so concurrent writers
//! on different processes cannot silently overwrite each other.
//!
//! # Wire format
//!
//! Fields are `PascalCase`:
//!
//! ```json
//! { "EventTypes": ["NoteCreated"], "AggregateIds": null, "Cursor": null,
//!   "SuccessEvent": null, "FailedEvent": null, "Errors": null,
//!   "Properties": {}, "Schema": null, "IsPaused": false,
//!   "IsInitialized": false, "Lease": null }
//! ```

use crate::cursor::{Cursor, ReadModelName};
use crate::event::ReadModelEvent;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Optimistic-concurrency token of a stored ledger.
///
/// Every successful [`LedgerStore::save`] yields a new, larger revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    /// Revision of a freshly inserted ledger.
    pub const FIRST: Self = Self(1);

    /// Create a revision.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The revision that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted in-progress marker of a build.
///
/// A lease belongs to exactly one build invocation (by `id`) and stops
/// excluding other builders once `expires_at` has passed, so a crashed builder
/// cannot block its read model forever.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Identifier of the owning build invocation.
    pub id: String,
    /// When the lease was taken.
    pub acquired_at: DateTime<Utc>,
    /// When the lease stops being honoured.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Lease owned by `id`, valid for `ttl` from `now`.
    ///
    /// An expiry past the representable range is clamped to the latest instant.
    #[must_use]
    pub fn new(id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: id.into(),
            acquired_at: now,
            expires_at: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the lease still excludes other builders at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Recorded projection failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerError {
    /// Error kind (for example `"ProjectionError"`).
    pub name: String,
    /// Human readable message.
    pub message: String,
}

impl LedgerError {
    /// Create an error record.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Persisted progress record of one read model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadModelLedger {
    /// Event types the read model consumes; `None` means all.
    pub event_types: Option<Vec<String>>,

    /// Aggregates the read model consumes; `None` means all.
    pub aggregate_ids: Option<Vec<String>>,

    /// Position after the last consumed event.
    pub cursor: Cursor,

    /// Last event applied without error.
    pub success_event: Option<ReadModelEvent>,

    /// Event whose projection failed. Sticky until reset.
    pub failed_event: Option<ReadModelEvent>,

    /// Recorded failures. Sticky until reset.
    pub errors: Option<Vec<LedgerError>>,

    /// Application bookkeeping, independent of the cursor.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Opaque schema description supplied by the store adapter.
    #[serde(default)]
    pub schema: Option<Value>,

    /// Builds are no-ops while set.
    #[serde(default)]
    pub is_paused: bool,

    /// The init handler has run since the last reset.
    #[serde(default)]
    pub is_initialized: bool,

    /// In-flight build, if any.
    #[serde(default)]
    pub lease: Option<Lease>,
}

impl ReadModelLedger {
    /// Fresh ledger positioned at the beginning of the stream.
    #[must_use]
    pub fn new(event_types: Option<Vec<String>>, aggregate_ids: Option<Vec<String>>) -> Self {
        Self {
            event_types,
            aggregate_ids,
            ..Self::default()
        }
    }

    /// Whether a projection failure has been recorded.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.failed_event.is_some() || self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// The lease, if it still excludes other builders at `now`.
    #[must_use]
    pub fn live_lease(&self, now: DateTime<Utc>) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| lease.is_live(now))
    }

    /// Whether the lease is owned by the build `lease_id`.
    #[must_use]
    pub fn is_leased_by(&self, lease_id: &str) -> bool {
        self.lease.as_ref().is_some_and(|lease| lease.id == lease_id)
    }

    /// Record a projection failure. `event` is `None` for init failures.
    pub fn record_failure(&mut self, event: Option<ReadModelEvent>, error: LedgerError) {
        self.failed_event = event;
        self.errors.get_or_insert_with(Vec::new).push(error);
    }

    /// Rewind progress to the beginning of the stream.
    ///
    /// Clears cursor, success and failure records and the init flag. Keeps
    /// filters, properties, schema and the pause flag.
    pub fn rewind(&mut self) {
        self.cursor = Cursor::beginning();
        self.success_event = None;
        self.failed_event = None;
        self.errors = None;
        self.is_initialized = false;
        self.lease = None;
    }
}

/// Errors raised by ledger stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    /// The stored revision is not the one the writer read.
    #[error("Ledger conflict for {read_model}: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// Read model whose ledger was written.
        read_model: ReadModelName,
        /// Revision the writer expected (`None`: must not exist).
        expected: Option<Revision>,
        /// Revision actually stored (`None`: absent).
        actual: Option<Revision>,
    },

    /// Connectivity or availability problem.
    #[error("Transient ledger store error: {0}")]
    Transient(String),

    /// Database failure.
    #[error("Ledger store error: {0}")]
    Backend(String),

    /// Stored ledger could not be encoded or decoded.
    #[error("Ledger serialization error: {0}")]
    Serialization(String),
}

impl LedgerStoreError {
    /// Whether the write lost a compare-and-swap race.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Persistence of ledgers, keyed by read model name, with compare-and-swap writes.
///
/// # Atomicity
///
/// A ledger is written as a whole; readers never observe partial updates.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the store can be shared as
/// `Arc<dyn LedgerStore>`.
pub trait LedgerStore: Send + Sync {
    /// Load a ledger and the revision it was stored at.
    ///
    /// # Errors
    ///
    /// Returns `Backend`, `Transient` or `Serialization` errors.
    fn load(
        &self,
        read_model: &ReadModelName,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Option<(Revision, ReadModelLedger)>, LedgerStoreError>>
                + Send
                + '_,
        >,
    >;

    /// Write a ledger if the stored revision equals `expected`.
    ///
    /// `expected = None` inserts and fails if a ledger already exists.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the stored revision differs from `expected`.
    fn save(
        &self,
        read_model: &ReadModelName,
        expected: Option<Revision>,
        ledger: ReadModelLedger,
    ) -> Pin<Box<dyn Future<Output = Result<Revision, LedgerStoreError>> + Send + '_>>;

    /// Delete a ledger if the stored revision equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the stored revision differs from `expected`
    /// (including when the ledger no longer exists).
    fn delete(
        &self,
        read_model: &ReadModelName,
        expected: Revision,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_is_pascal_case() {
        let ledger = ReadModelLedger::new(Some(vec!["NoteCreated".into()]), None);
        let value = serde_json::to_value(&ledger).unwrap();

        assert_eq!(value["EventTypes"], json!(["NoteCreated"]));
        assert_eq!(value["Cursor"], Value::Null);
        assert_eq!(value["Errors"], Value::Null);
        assert_eq!(value["IsPaused"], false);
    }

    #[test]
    fn lease_expiry_is_clamped() {
        let now = Utc::now();
        let lease = Lease::new("b1", now, Duration::MAX);

        assert_eq!(lease.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(lease.is_live(now));
    }

    #[test]
    fn lease_expires() {
        let now = Utc::now();
        let lease = Lease::new("b1", now, Duration::seconds(10));

        assert!(lease.is_live(now));
        assert!(!lease.is_live(now + Duration::seconds(10)));
    }

    #[test]
    fn rewind_keeps_filters_properties_and_pause() {
        let mut ledger = ReadModelLedger::new(Some(vec!["A".into()]), Some(vec!["a1".into()]));
        ledger.cursor = Cursor::new("7");
        ledger.is_paused = true;
        ledger.is_initialized = true;
        ledger.properties.insert("k".into(), "v".into());
        ledger.record_failure(
            Some(ReadModelEvent::new("a1", 1, "A", Value::Null)),
            LedgerError::new("ProjectionError", "boom"),
        );
        assert!(ledger.is_errored());

        ledger.rewind();

        assert!(!ledger.is_errored());
        assert!(ledger.cursor.is_beginning());
        assert!(!ledger.is_initialized);
        assert!(ledger.is_paused);
        assert_eq!(ledger.properties.get("k").map(String::as_str), Some("v"));
        assert_eq!(ledger.event_types, Some(vec!["A".to_string()]));
    }
}
