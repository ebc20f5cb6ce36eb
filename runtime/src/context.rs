//! Explicit engine context passed to every operation.

use crate::config::BuilderConfig;
use chrono::{DateTime, Utc};
use readmodel_core::environment::Clock;
use readmodel_core::event_source::EventSource;
use readmodel_core::ledger::LedgerStore;
use readmodel_core::store::StoreAdapter;
use std::fmt;
use std::sync::Arc;

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Collaborators and limits shared by all engine operations.
///
/// Cheap to clone; every field is reference counted.
#[derive(Clone)]
pub struct EngineContext {
    /// Where events come from
    pub event_source: Arc<dyn EventSource>,
    /// Where ledgers are persisted
    pub ledger_store: Arc<dyn LedgerStore>,
    /// Where read models are materialized
    pub store_adapter: Arc<dyn StoreAdapter>,
    /// Time source for lease expiry
    pub clock: Arc<dyn Clock>,
    /// Limits
    pub config: BuilderConfig,
}

impl EngineContext {
    /// Context with the system clock and default limits.
    #[must_use]
    pub fn new(
        event_source: Arc<dyn EventSource>,
        ledger_store: Arc<dyn LedgerStore>,
        store_adapter: Arc<dyn StoreAdapter>,
    ) -> Self {
        Self {
            event_source,
            ledger_store,
            store_adapter,
            clock: Arc::new(SystemClock),
            config: BuilderConfig::default(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the limits.
    #[must_use]
    pub fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
