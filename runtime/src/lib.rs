//! # Read Model Runtime
//!
//! The engine that keeps read models up to date: the builder state machine,
//! lease-based mutual exclusion, subscription management and lifecycle
//! operations.
//!
//! ## Scheduling
//!
//! The engine owns no thread or loop. Each [`builder::step`] does a bounded
//! amount of work and reports whether more work may be pending. [`builder::build`]
//! additionally calls the request's `next` continuation, leaving the actual
//! re-invocation (immediate loop, timer, queue message) to the host.
//! [`host::run_until_idle`] is a ready-made host loop for long-running processes.
//!
//! ## Example
//!
//! ```
//! use readmodel_core::cursor::ReadModelName;
//! use readmodel_core::event::ReadModelEvent;
//! use readmodel_core::projection::{ProjectionContext, ProjectionOutcome, ProjectionResult, ProjectionTable};
//! use readmodel_runtime::{BuildRequest, EngineContext, StepOutcome, build, status};
//! use readmodel_core::status::RunStatus;
//! use readmodel_testing::{InMemoryEventSource, InMemoryLedgerStore, InMemoryStoreAdapter};
//! use std::sync::Arc;
//!
//! async fn count(_ctx: ProjectionContext, _event: ReadModelEvent) -> ProjectionResult {
//!     Ok(ProjectionOutcome::Continue)
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), readmodel_runtime::EngineError> {
//! let source = InMemoryEventSource::new();
//! source.append(ReadModelEvent::new("a1", 1, "Counted", serde_json::Value::Null));
//!
//! let ctx = EngineContext::new(
//!     Arc::new(source),
//!     Arc::new(InMemoryLedgerStore::new()),
//!     Arc::new(InMemoryStoreAdapter::new()),
//! );
//! let name = ReadModelName::new("counter");
//! let request = BuildRequest::new(ProjectionTable::new().on("Counted", count));
//!
//! let report = build(&ctx, &name, &request).await?;
//! assert_eq!(report.outcome, StepOutcome::Continue);
//! assert_eq!(report.applied, 1);
//!
//! let status = status(&ctx, &name).await?.unwrap();
//! assert_eq!(status.status, RunStatus::Deliver);
//! # Ok(())
//! # }
//! ```

use readmodel_core::cursor::ReadModelName;
use readmodel_core::event_source::EventSourceError;
use readmodel_core::ledger::LedgerStoreError;
use readmodel_core::store::StoreError;
use thiserror::Error;

pub mod builder;
pub mod config;
pub mod context;
pub mod host;
pub mod lifecycle;
pub mod metrics;
pub mod properties;
pub mod retry;
pub mod subscription;
pub mod traced_store;

mod mutation;

/// Errors returned by engine operations.
///
/// Projection failures are not errors: they are recorded in the ledger and
/// reported through [`StepOutcome::Failed`] and the read model's status.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Event source failure
    #[error("Event source error: {0}")]
    EventSource(#[from] EventSourceError),

    /// Ledger store failure
    #[error("Ledger store error: {0}")]
    LedgerStore(#[from] LedgerStoreError),

    /// Store adapter failure outside a projection, or a transient one inside it
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A build is in flight; the operation must wait for it
    #[error("Read model {0} is being built")]
    LeaseHeld(ReadModelName),

    /// The lease expired and another builder took over before this one committed
    #[error("Lease of read model {0} was taken over before commit")]
    LeaseLost(ReadModelName),

    /// The read model has no ledger
    #[error("Read model {0} is not subscribed")]
    NotSubscribed(ReadModelName),

    /// Ledger writes kept conflicting with concurrent writers
    #[error("Ledger of read model {read_model} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted {
        /// Read model
        read_model: ReadModelName,
        /// Attempts made
        attempts: usize,
    },

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    /// Whether retrying the whole operation later may succeed.
    ///
    /// Transient errors leave the ledger untouched apart from the lease.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::EventSource(error) => error.is_transient(),
            Self::LedgerStore(error) => {
                matches!(error, LedgerStoreError::Transient(_) | LedgerStoreError::Conflict { .. })
            }
            Self::Store(error) => error.is_transient(),
            Self::ConflictRetriesExhausted { .. } => true,
            Self::LeaseHeld(_)
            | Self::LeaseLost(_)
            | Self::NotSubscribed(_)
            | Self::Config(_) => false,
        }
    }
}

pub use builder::{
    BuildRequest, DoneReason, StepOutcome, StepReport, SuspendReason, budget_until, build, step,
    unlimited_budget,
};
pub use config::BuilderConfig;
pub use context::{EngineContext, SystemClock};
pub use host::{RunSummary, run_until_idle};
pub use lifecycle::{pause, reset, resume, status};
pub use properties::{delete_property, get_property, list_properties, set_property};
pub use subscription::{resubscribe, subscribe, unsubscribe};
pub use traced_store::TracedStore;
