//! Read-modify-write of ledgers, and lease helpers.

use crate::{EngineContext, EngineError};
use readmodel_core::cursor::ReadModelName;
use readmodel_core::ledger::{Lease, ReadModelLedger};

/// What to do with the ledger that was read.
pub(crate) enum LedgerChange {
    /// Write the new ledger.
    Save(ReadModelLedger),
    /// Delete the ledger.
    Delete,
    /// Leave the ledger as it is.
    Keep,
}

/// Whether a live lease blocks the change.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseGate {
    /// Refuse with `LeaseHeld` while a build is in flight.
    Refuse,
    /// Apply the change regardless of builds in flight.
    Ignore,
}

/// Apply `change` to the current ledger with compare-and-swap, re-reading on conflict.
///
/// Returns the ledger as it is after the change (`None` if absent).
pub(crate) async fn update_ledger<F>(
    ctx: &EngineContext,
    name: &ReadModelName,
    gate: LeaseGate,
    mut change: F,
) -> Result<Option<ReadModelLedger>, EngineError>
where
    F: FnMut(Option<ReadModelLedger>) -> Result<LedgerChange, EngineError>,
{
    let attempts = ctx.config.max_conflict_retries + 1;
    for attempt in 1..=attempts {
        let current = ctx.ledger_store.load(name).await?;
        let (revision, ledger) = match current {
            Some((revision, ledger)) => (Some(revision), Some(ledger)),
            None => (None, None),
        };

        if gate == LeaseGate::Refuse
            && ledger
                .as_ref()
                .is_some_and(|l| l.live_lease(ctx.clock.now()).is_some())
        {
            return Err(EngineError::LeaseHeld(name.clone()));
        }

        let result = match (change(ledger.clone())?, revision) {
            (LedgerChange::Keep, _) => return Ok(ledger),
            (LedgerChange::Delete, None) => return Ok(None),
            (LedgerChange::Delete, Some(revision)) => ctx
                .ledger_store
                .delete(name, revision)
                .await
                .map(|()| None),
            (LedgerChange::Save(updated), revision) => ctx
                .ledger_store
                .save(name, revision, updated.clone())
                .await
                .map(|_| Some(updated)),
        };

        match result {
            Ok(ledger) => return Ok(ledger),
            Err(error) if error.is_conflict() => {
                tracing::debug!(read_model = %name, attempt, "Ledger changed concurrently, re-reading");
            }
            Err(error) => return Err(error.into()),
        }
    }

    Err(EngineError::ConflictRetriesExhausted {
        read_model: name.clone(),
        attempts,
    })
}

/// Lease with a fresh id, valid for `lease_ttl_ms` from now.
pub(crate) fn new_lease(ctx: &EngineContext) -> Lease {
    Lease::new(
        uuid::Uuid::new_v4().to_string(),
        ctx.clock.now(),
        ctx.config.lease_ttl(),
    )
}

/// Best-effort release of a lease after a failed operation.
pub(crate) async fn release_lease(ctx: &EngineContext, name: &ReadModelName, lease_id: &str) {
    match try_release_lease(ctx, name, lease_id).await {
        Ok(true) => tracing::debug!(read_model = %name, "Lease released after failure"),
        Ok(false) => {}
        Err(error) => tracing::warn!(
            read_model = %name,
            error = %error,
            "Could not release lease; it will expire"
        ),
    }
}

async fn try_release_lease(
    ctx: &EngineContext,
    name: &ReadModelName,
    lease_id: &str,
) -> Result<bool, EngineError> {
    let Some((revision, mut ledger)) = ctx.ledger_store.load(name).await? else {
        return Ok(false);
    };
    if !ledger.is_leased_by(lease_id) {
        return Ok(false);
    }
    ledger.lease = None;
    ctx.ledger_store.save(name, Some(revision), ledger).await?;
    Ok(true)
}
