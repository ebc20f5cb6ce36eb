//! The builder: one bounded batch of projection work per step.
//!
//! # State machine
//!
//! ```text
//!            ┌──────────── Done(Paused | LeaseHeld) ◄─── paused / lease live
//!  load ─────┤
//!  ledger    ├──────────── Failed ◄──────────────────── ledger errored
//!            │
//!            └─► acquire lease ─► init? ─► load batch ─► apply events ─► commit
//!                                                                   │
//!                        Continue | Suspend(..) | Done(CaughtUp) | Failed
//! ```
//!
//! A step never runs more than one batch. Progress survives the step only
//! through the ledger, which is written with compare-and-swap:
//!
//! 1. The lease is taken by writing the ledger at the revision it was read at.
//!    A concurrent builder either sees the live lease or loses the CAS race,
//!    and exits with `Done(LeaseHeld)` without applying anything.
//! 2. The cursor is advanced only in the commit write that also releases the
//!    lease. A crash before that write leaves the cursor where it was; the
//!    lease expires after `lease_ttl_ms` and the batch is delivered again.
//! 3. Pause, property changes and other writes made while the build runs are
//!    merged into the commit instead of being overwritten.
//!
//! # Projection outcomes
//!
//! - `StopBatch`: the event counts as applied, the cursor moves past it and the
//!   step suspends.
//! - `OmitBatch`: the event and the rest of the batch are not recorded, the
//!   cursor moves past the events applied before it and the step suspends.
//! - A failure is recorded in the ledger (`FailedEvent`, `Errors`); the cursor
//!   stays in front of the failing event and every later step returns `Failed`
//!   until the read model is reset.
//! - A transient store error is not recorded. The step releases its lease and
//!   returns the error so the caller can retry the whole step.

use crate::context::EngineContext;
use crate::metrics::ReadModelMetrics;
use crate::mutation::{new_lease, release_lease};
use crate::traced_store::TracedStore;
use crate::EngineError;
use readmodel_core::cursor::ReadModelName;
use readmodel_core::encryption::EncryptionResolver;
use readmodel_core::event::ReadModelEvent;
use readmodel_core::event_source::EventFilter;
use readmodel_core::ledger::{LedgerError, ReadModelLedger, Revision};
use readmodel_core::projection::{
    ProjectionContext, ProjectionFailure, ProjectionOutcome, ProjectionTable,
};
use readmodel_core::store::ReadModelStore;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Continuation asking the host to invoke `build` again.
pub type NextFn = Arc<dyn Fn() + Send + Sync>;

/// Remaining time budget of the current invocation.
pub type VacantTimeFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Notification of every committed ledger.
pub type ProvideLedgerFn = Arc<dyn Fn(&ReadModelName, &ReadModelLedger) + Send + Sync>;

/// Budget that never runs out.
#[must_use]
pub fn unlimited_budget() -> VacantTimeFn {
    Arc::new(|| Duration::MAX)
}

/// Budget running out at `deadline`.
#[must_use]
pub fn budget_until(deadline: Instant) -> VacantTimeFn {
    Arc::new(move || deadline.saturating_duration_since(Instant::now()))
}

/// Everything a build needs besides the engine context.
#[derive(Clone)]
pub struct BuildRequest {
    /// Dispatch table of the read model
    pub projection: Arc<ProjectionTable>,
    /// Store handle override; defaults to the adapter's scoped store
    pub store: Option<Arc<dyn ReadModelStore>>,
    /// Continuation called when more work may be pending
    pub next: Option<NextFn>,
    /// Remaining time budget
    pub vacant_time: VacantTimeFn,
    /// Called with every committed ledger
    pub provide_ledger: Option<ProvideLedgerFn>,
    /// Per-event encryption; `None` means no encryption
    pub encryption: Option<EncryptionResolver>,
}

impl BuildRequest {
    /// Request with an unlimited budget and no callbacks.
    #[must_use]
    pub fn new(projection: ProjectionTable) -> Self {
        Self {
            projection: Arc::new(projection),
            store: None,
            next: None,
            vacant_time: unlimited_budget(),
            provide_ledger: None,
            encryption: None,
        }
    }

    /// Use `store` instead of the adapter's scoped store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ReadModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the continuation.
    #[must_use]
    pub fn with_next(mut self, next: impl Fn() + Send + Sync + 'static) -> Self {
        self.next = Some(Arc::new(next));
        self
    }

    /// Set the time budget.
    #[must_use]
    pub fn with_vacant_time(mut self, vacant_time: VacantTimeFn) -> Self {
        self.vacant_time = vacant_time;
        self
    }

    /// Set the ledger notification.
    #[must_use]
    pub fn with_provide_ledger(
        mut self,
        provide_ledger: impl Fn(&ReadModelName, &ReadModelLedger) + Send + Sync + 'static,
    ) -> Self {
        self.provide_ledger = Some(Arc::new(provide_ledger));
        self
    }

    /// Set the encryption resolver.
    #[must_use]
    pub fn with_encryption(mut self, encryption: EncryptionResolver) -> Self {
        self.encryption = Some(encryption);
        self
    }
}

impl fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRequest")
            .field("projection", &self.projection)
            .field("store", &self.store.is_some())
            .field("next", &self.next.is_some())
            .field("provide_ledger", &self.provide_ledger.is_some())
            .field("encryption", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}

/// Why a step yielded with work possibly left.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    /// The time budget dropped below `min_vacant_time_ms`
    BudgetExhausted,
    /// A projection returned `StopBatch`
    StopBatch,
    /// A projection returned `OmitBatch`
    OmitBatch,
}

/// Why a step did nothing more.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DoneReason {
    /// No events left to load
    CaughtUp,
    /// The read model is paused
    Paused,
    /// Another build holds the lease
    LeaseHeld,
}

/// Result of one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// A full batch was applied; more events may exist
    Continue,
    /// Yielded early; the host decides when to resume
    Suspend(SuspendReason),
    /// Nothing to do
    Done(DoneReason),
    /// The ledger records a projection failure
    Failed,
}

impl StepOutcome {
    /// Metric label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Suspend(SuspendReason::BudgetExhausted) => "budget_exhausted",
            Self::Suspend(SuspendReason::StopBatch) => "stop_batch",
            Self::Suspend(SuspendReason::OmitBatch) => "omit_batch",
            Self::Done(DoneReason::CaughtUp) => "caught_up",
            Self::Done(DoneReason::Paused) => "paused",
            Self::Done(DoneReason::LeaseHeld) => "lease_held",
            Self::Failed => "failed",
        }
    }
}

/// What a step did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    /// How the step ended
    pub outcome: StepOutcome,
    /// Events handed to a projection and recorded as applied
    pub applied: usize,
    /// Events the cursor moved past (applied plus unhandled)
    pub consumed: usize,
}

impl StepReport {
    const fn idle(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            applied: 0,
            consumed: 0,
        }
    }
}

/// Run one step and, when more work may be pending, call `request.next`.
///
/// # Errors
///
/// Same as [`step`].
pub async fn build(
    ctx: &EngineContext,
    name: &ReadModelName,
    request: &BuildRequest,
) -> Result<StepReport, EngineError> {
    let report = step(ctx, name, request).await?;
    if report.outcome == StepOutcome::Continue {
        if let Some(next) = &request.next {
            tracing::debug!(read_model = %name, "Requesting re-invocation");
            next();
        }
    }
    Ok(report)
}

/// Run one bounded batch for `name`.
///
/// # Errors
///
/// - Collaborator failures (`EventSource`, `LedgerStore`, transient `Store`);
///   retry the step when [`EngineError::is_transient`]
/// - `LeaseLost` if another builder took over an expired lease before commit
/// - `ConflictRetriesExhausted` if the commit kept losing CAS races
pub async fn step(
    ctx: &EngineContext,
    name: &ReadModelName,
    request: &BuildRequest,
) -> Result<StepReport, EngineError> {
    let started = Instant::now();
    let span = tracing::info_span!("readmodel_step", read_model = %name);
    let result = run_step(ctx, name, request).instrument(span).await;

    if let Ok(report) = &result {
        ReadModelMetrics::record_step(name, report.outcome.label(), started.elapsed());
        if report.applied > 0 {
            ReadModelMetrics::record_applied(name, report.applied);
        }
    }
    result
}

async fn run_step(
    ctx: &EngineContext,
    name: &ReadModelName,
    request: &BuildRequest,
) -> Result<StepReport, EngineError> {
    let (revision, mut ledger) = match ctx.ledger_store.load(name).await? {
        Some((revision, ledger)) => (Some(revision), ledger),
        None => (
            None,
            ReadModelLedger::new(Some(request.projection.event_types()), None),
        ),
    };

    if ledger.is_errored() {
        tracing::debug!(read_model = %name, "Ledger holds a projection failure, not building");
        return Ok(StepReport::idle(StepOutcome::Failed));
    }
    if ledger.is_paused {
        tracing::debug!(read_model = %name, "Read model is paused");
        return Ok(StepReport::idle(StepOutcome::Done(DoneReason::Paused)));
    }

    let now = ctx.clock.now();
    if let Some(lease) = ledger.live_lease(now) {
        tracing::info!(
            read_model = %name,
            lease = %lease.id,
            expires_at = %lease.expires_at,
            "Another build holds the lease"
        );
        ReadModelMetrics::record_lease_conflict(name);
        return Ok(StepReport::idle(StepOutcome::Done(DoneReason::LeaseHeld)));
    }

    let lease = new_lease(ctx);
    let lease_id = lease.id.clone();
    ledger.lease = Some(lease);
    let revision = match ctx.ledger_store.save(name, revision, ledger.clone()).await {
        Ok(revision) => revision,
        Err(error) if error.is_conflict() => {
            tracing::info!(read_model = %name, "Lost the race for the lease");
            ReadModelMetrics::record_lease_conflict(name);
            return Ok(StepReport::idle(StepOutcome::Done(DoneReason::LeaseHeld)));
        }
        Err(error) => return Err(error.into()),
    };
    tracing::debug!(read_model = %name, lease = %lease_id, "Lease acquired");

    let mut batch = Batch {
        ctx,
        name,
        request,
        lease_id: &lease_id,
        revision,
        ledger,
    };

    match batch.run().await {
        Ok(report) => Ok(report),
        Err(error) => {
            if !matches!(error, EngineError::LeaseLost(_)) {
                release_lease(ctx, name, &lease_id).await;
            }
            Err(error)
        }
    }
}

/// State of one leased build.
struct Batch<'a> {
    ctx: &'a EngineContext,
    name: &'a ReadModelName,
    request: &'a BuildRequest,
    lease_id: &'a str,
    revision: Revision,
    ledger: ReadModelLedger,
}

impl Batch<'_> {
    async fn run(&mut self) -> Result<StepReport, EngineError> {
        let store: Arc<dyn ReadModelStore> = Arc::new(TracedStore::new(
            self.request
                .store
                .clone()
                .unwrap_or_else(|| self.ctx.store_adapter.store(self.name)),
            self.name.clone(),
        ));

        if !self.ledger.is_initialized {
            if let Some(init) = self.request.projection.init_handler() {
                tracing::info!(read_model = %self.name, "Running init handler");
                if let Err(failure) = init(Arc::clone(&store)).await {
                    return self.fail_init(failure).await;
                }
            }
            self.ledger.is_initialized = true;
            self.commit(false).await?;
        }

        if self.budget_exhausted() {
            return self
                .finish(StepOutcome::Suspend(SuspendReason::BudgetExhausted), 0, 0)
                .await;
        }

        let filter = EventFilter {
            event_types: self.ledger.event_types.clone(),
            aggregate_ids: self.ledger.aggregate_ids.clone(),
            events_size_limit: self.ctx.config.events_size_limit,
            limit: self.ctx.config.event_limit,
            cursor: self.ledger.cursor.clone(),
        };
        let events = self.ctx.event_source.load_events(filter).await?;
        tracing::debug!(read_model = %self.name, loaded = events.len(), "Batch loaded");

        let mut applied = 0;
        let mut consumed = 0;
        let mut stop = None;
        let mut failure = None;

        for event in &events {
            if self.budget_exhausted() {
                stop = Some(SuspendReason::BudgetExhausted);
                break;
            }

            let Some(handler) = self.request.projection.handler(&event.event_type) else {
                consumed += 1;
                continue;
            };

            let encryption = match &self.request.encryption {
                Some(resolve) => match resolve(event).await {
                    Ok(encryption) => encryption,
                    Err(error) => {
                        failure = Some((event.clone(), ProjectionFailure::from(error)));
                        break;
                    }
                },
                None => None,
            };

            let projection_ctx = ProjectionContext {
                store: Arc::clone(&store),
                encryption,
            };

            match handler.handle(projection_ctx, event.clone()).await {
                Ok(ProjectionOutcome::Continue) => {
                    self.ledger.success_event = Some(event.clone());
                    applied += 1;
                    consumed += 1;
                }
                Ok(ProjectionOutcome::StopBatch) => {
                    self.ledger.success_event = Some(event.clone());
                    applied += 1;
                    consumed += 1;
                    stop = Some(SuspendReason::StopBatch);
                    break;
                }
                Ok(ProjectionOutcome::OmitBatch) => {
                    stop = Some(SuspendReason::OmitBatch);
                    break;
                }
                Err(ProjectionFailure::Store(error)) if error.is_transient() => {
                    tracing::warn!(
                        read_model = %self.name,
                        event_type = %event.event_type,
                        aggregate_id = %event.aggregate_id,
                        error = %error,
                        "Transient store failure, abandoning batch"
                    );
                    return Err(error.into());
                }
                Err(error) => {
                    failure = Some((event.clone(), error));
                    break;
                }
            }
        }

        if consumed > 0 {
            self.ledger.cursor = self
                .ctx
                .event_source
                .get_next_cursor(&self.ledger.cursor, &events[..consumed])
                .await?;
        }

        if let Some((event, error)) = failure {
            let record = error.to_ledger_error();
            tracing::error!(
                read_model = %self.name,
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                aggregate_version = event.aggregate_version,
                error = %record,
                "Projection failed"
            );
            ReadModelMetrics::record_projection_error(self.name, &record);
            self.ledger.record_failure(Some(event), record);
            return self.finish(StepOutcome::Failed, applied, consumed).await;
        }

        let outcome = match stop {
            Some(reason) => StepOutcome::Suspend(reason),
            None if events.is_empty() => StepOutcome::Done(DoneReason::CaughtUp),
            None => StepOutcome::Continue,
        };
        self.finish(outcome, applied, consumed).await
    }

    fn budget_exhausted(&self) -> bool {
        (self.request.vacant_time)() < self.ctx.config.min_vacant_time()
    }

    async fn fail_init(&mut self, failure: ProjectionFailure) -> Result<StepReport, EngineError> {
        if let ProjectionFailure::Store(error) = &failure {
            if error.is_transient() {
                return Err(error.clone().into());
            }
        }
        let record: LedgerError = failure.to_ledger_error();
        tracing::error!(read_model = %self.name, error = %record, "Init handler failed");
        ReadModelMetrics::record_projection_error(self.name, &record);
        self.ledger.record_failure(None, record);
        self.finish(StepOutcome::Failed, 0, 0).await
    }

    /// Commit, release the lease and notify.
    async fn finish(
        &mut self,
        outcome: StepOutcome,
        applied: usize,
        consumed: usize,
    ) -> Result<StepReport, EngineError> {
        self.commit(true).await?;

        if let Some(provide_ledger) = &self.request.provide_ledger {
            provide_ledger(self.name, &self.ledger);
        }

        // A pause written while the batch ran takes effect now.
        let outcome = if outcome == StepOutcome::Continue && self.ledger.is_paused {
            StepOutcome::Done(DoneReason::Paused)
        } else {
            outcome
        };

        tracing::info!(
            read_model = %self.name,
            outcome = outcome.label(),
            applied,
            consumed,
            cursor = %self.ledger.cursor,
            "Build step finished"
        );
        Ok(StepReport {
            outcome,
            applied,
            consumed,
        })
    }

    /// Write the ledger at the revision we hold, merging concurrent changes.
    async fn commit(&mut self, release: bool) -> Result<(), EngineError> {
        if release {
            self.ledger.lease = None;
        }

        let attempts = self.ctx.config.max_conflict_retries + 1;
        for attempt in 1..=attempts {
            match self
                .ctx
                .ledger_store
                .save(self.name, Some(self.revision), self.ledger.clone())
                .await
            {
                Ok(revision) => {
                    self.revision = revision;
                    return Ok(());
                }
                Err(error) if error.is_conflict() => {
                    let Some((revision, fresh)) = self.ctx.ledger_store.load(self.name).await?
                    else {
                        return Err(EngineError::LeaseLost(self.name.clone()));
                    };
                    if !fresh.is_leased_by(self.lease_id) {
                        tracing::warn!(read_model = %self.name, "Lease taken over, discarding batch");
                        return Err(EngineError::LeaseLost(self.name.clone()));
                    }
                    tracing::debug!(read_model = %self.name, attempt, "Merging concurrent ledger change");
                    self.merge_concurrent(fresh);
                    self.revision = revision;
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(EngineError::ConflictRetriesExhausted {
            read_model: self.name.clone(),
            attempts,
        })
    }

    /// Take over fields other writers may change while we hold the lease.
    fn merge_concurrent(&mut self, fresh: ReadModelLedger) {
        self.ledger.is_paused = fresh.is_paused;
        self.ledger.properties = fresh.properties;
        self.ledger.event_types = fresh.event_types;
        self.ledger.aggregate_ids = fresh.aggregate_ids;
        self.ledger.schema = fresh.schema;
    }
}
