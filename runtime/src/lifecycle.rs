//! Pause, resume, reset and status of a read model.
//!
//! Pause and resume never wait for a build: they flip `IsPaused` in the ledger
//! and an in-flight build merges the flag into its commit, finishing its batch
//! before halting. Reset rewrites progress: it refuses to run while a build
//! holds a live lease and takes the lease itself for the duration.

use crate::mutation::{LeaseGate, LedgerChange, new_lease, update_ledger};
use crate::{EngineContext, EngineError};
use readmodel_core::cursor::ReadModelName;
use readmodel_core::status::ReadModelStatus;

/// Make subsequent builds no-ops until [`resume`].
///
/// # Errors
///
/// - `NotSubscribed` if the read model has no ledger
/// - Ledger store failures
pub async fn pause(ctx: &EngineContext, name: &ReadModelName) -> Result<(), EngineError> {
    set_paused(ctx, name, true).await?;
    tracing::info!(read_model = %name, "Read model paused");
    Ok(())
}

/// Clear the pause flag and call `next` once to restart building.
///
/// # Errors
///
/// - `NotSubscribed` if the read model has no ledger
/// - Ledger store failures
pub async fn resume(
    ctx: &EngineContext,
    name: &ReadModelName,
    next: impl FnOnce(),
) -> Result<(), EngineError> {
    set_paused(ctx, name, false).await?;
    tracing::info!(read_model = %name, "Read model resumed");
    next();
    Ok(())
}

async fn set_paused(
    ctx: &EngineContext,
    name: &ReadModelName,
    paused: bool,
) -> Result<(), EngineError> {
    update_ledger(ctx, name, LeaseGate::Ignore, |ledger| match ledger {
        None => Err(EngineError::NotSubscribed(name.clone())),
        Some(ledger) if ledger.is_paused == paused => Ok(LedgerChange::Keep),
        Some(mut ledger) => {
            ledger.is_paused = paused;
            Ok(LedgerChange::Save(ledger))
        }
    })
    .await?;
    Ok(())
}

/// Drop the read model's tables and rewind its ledger to the beginning of the stream.
///
/// Filters, properties and the pause flag survive; the init handler runs again
/// on the next build. Resetting an unknown read model succeeds.
///
/// The reset holds a lease from before the tables are dropped until the
/// rewound ledger is written, so no build can run in between.
///
/// # Errors
///
/// - `LeaseHeld` while a build is in flight
/// - `LeaseLost` if the reset outlived its lease and a build took over
/// - Store adapter and ledger store failures
pub async fn reset(ctx: &EngineContext, name: &ReadModelName) -> Result<(), EngineError> {
    let lease = new_lease(ctx);
    let mut placeholder = false;
    update_ledger(ctx, name, LeaseGate::Refuse, |ledger| {
        // An unknown read model gets a bare ledger so builds see the lease.
        placeholder = ledger.is_none();
        let mut ledger = ledger.unwrap_or_default();
        ledger.lease = Some(lease.clone());
        Ok(LedgerChange::Save(ledger))
    })
    .await?;
    tracing::debug!(read_model = %name, lease = %lease.id, "Reset holds the lease");

    let dropped = ctx.store_adapter.drop_read_model(name).await;
    if let Err(error) = &dropped {
        tracing::warn!(read_model = %name, error = %error, "Dropping read model failed");
    }

    update_ledger(ctx, name, LeaseGate::Ignore, |ledger| match ledger {
        Some(mut ledger) if ledger.is_leased_by(&lease.id) => Ok(if placeholder {
            LedgerChange::Delete
        } else {
            if dropped.is_ok() {
                ledger.rewind();
            } else {
                ledger.lease = None;
            }
            LedgerChange::Save(ledger)
        }),
        _ => Err(EngineError::LeaseLost(name.clone())),
    })
    .await?;
    dropped?;

    tracing::info!(read_model = %name, "Read model reset");
    Ok(())
}

/// Status derived from the ledger, `None` if the read model is unknown.
///
/// # Errors
///
/// Ledger store failures.
pub async fn status(
    ctx: &EngineContext,
    name: &ReadModelName,
) -> Result<Option<ReadModelStatus>, EngineError> {
    let ledger = ctx.ledger_store.load(name).await?;
    Ok(ledger.map(|(_, ledger)| ReadModelStatus::from_ledger(name.clone(), &ledger)))
}
