//! # Read Model Core
//!
//! Data model and collaborator contracts for the inline-ledger read-model engine.
//!
//! A read model is materialized from an ordered event stream by user-supplied
//! projection functions. Its progress is kept in a persisted ledger so it can
//! resume exactly where it stopped after a crash, an exhausted time budget or
//! an explicit pause.
//!
//! ## Core Concepts
//!
//! - **Event**: immutable fact loaded from an [`event_source::EventSource`]
//! - **Cursor**: opaque read position produced by the event source
//! - **Ledger**: persisted progress record, written through a [`ledger::LedgerStore`]
//! - **Projection table**: event type to projection function
//! - **Store**: scoped document store projections write to ([`store::ReadModelStore`])
//!
//! This crate performs no I/O. The engine lives in `readmodel-runtime`,
//! in-memory collaborators in `readmodel-testing`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod cursor;
pub mod encryption;
pub mod event;
pub mod event_source;
pub mod ledger;
pub mod projection;
pub mod status;
pub mod store;

/// Environment module - injected dependencies
///
/// All time-dependent engine decisions (lease expiry) go through [`environment::Clock`]
/// so tests can control time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use readmodel_core::environment::Clock;
    /// use readmodel_core::{DateTime, Utc};
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    ///
    /// let clock = FixedClock { time: Utc::now() };
    /// assert_eq!(clock.now(), clock.time);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }
}

pub use cursor::{Cursor, ReadModelName};
pub use event::ReadModelEvent;
pub use ledger::{Lease, LedgerError, ReadModelLedger, Revision};
pub use projection::{ProjectionOutcome, ProjectionTable};
pub use status::{ReadModelStatus, RunStatus};
pub use store::{SearchCondition, UpdateCondition};
