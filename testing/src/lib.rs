//! # Read Model Testing
//!
//! In-memory collaborators and helpers for testing read models and the engine.
//!
//! This crate provides:
//! - [`InMemoryStoreAdapter`]: document store with the full filter/update algebra
//! - [`InMemoryEventSource`]: append-only event log with offset cursors
//! - [`InMemoryLedgerStore`]: compare-and-swap ledger persistence
//! - Deterministic clocks and a tracing bootstrap
//!
//! Every collaborator can be told to fail on a later call so tests can
//! exercise crash and retry paths.
//!
//! ## Example
//!
//! ```
//! use readmodel_testing::{InMemoryEventSource, ManualClock, test_clock};
//! use readmodel_core::environment::Clock;
//! use readmodel_core::event::ReadModelEvent;
//! use serde_json::json;
//!
//! let source = InMemoryEventSource::new();
//! source.append(ReadModelEvent::new("a1", 1, "NoteCreated", json!({ "text": "hi" })));
//! assert_eq!(source.len(), 1);
//!
//! let clock = ManualClock::new(test_clock().now());
//! clock.advance(chrono::Duration::minutes(5));
//! ```

use chrono::{DateTime, Utc};
use readmodel_core::environment::Clock;

mod event_source_mocks;
mod ledger_mocks;
mod store_mocks;

pub use event_source_mocks::{InMemoryEventSource, Subscription};
pub use ledger_mocks::InMemoryLedgerStore;
pub use store_mocks::{InMemoryReadModelStore, InMemoryStoreAdapter};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use readmodel_testing::mocks::FixedClock;
    /// use readmodel_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep a handle while the
    /// engine holds another one.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    #[allow(clippy::unwrap_used)] // Lock poisoning only happens after a test already panicked
    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to a point in time
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    #[allow(clippy::unwrap_used)]
    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    /// Install a `tracing` subscriber writing to the test output.
    ///
    /// Honours `RUST_LOG`; defaults to `debug` for the engine crates. Safe to
    /// call from every test: only the first call installs the subscriber.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,readmodel_runtime=debug".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, ManualClock, test_clock};
