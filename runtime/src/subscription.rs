//! Subscription management: which events a read model consumes.
//!
//! Filter changes are serialized against builds through the lease. A change is
//! refused with [`EngineError::LeaseHeld`] while a build is in flight, so a
//! batch is always loaded and committed under one set of filters.

use crate::mutation::{LeaseGate, LedgerChange, update_ledger};
use crate::{EngineContext, EngineError};
use readmodel_core::cursor::ReadModelName;
use readmodel_core::ledger::ReadModelLedger;

/// Create the ledger of `name`, or update its filters if it exists.
///
/// `None` filters mean "all event types" and "all aggregates".
///
/// # Errors
///
/// - `LeaseHeld` while a build is in flight
/// - Ledger store and event source failures
pub async fn subscribe(
    ctx: &EngineContext,
    name: &ReadModelName,
    event_types: Option<Vec<String>>,
    aggregate_ids: Option<Vec<String>>,
) -> Result<(), EngineError> {
    update_ledger(ctx, name, LeaseGate::Refuse, |ledger| {
        let ledger = match ledger {
            Some(mut ledger) => {
                ledger.event_types.clone_from(&event_types);
                ledger.aggregate_ids.clone_from(&aggregate_ids);
                ledger
            }
            None => ReadModelLedger::new(event_types.clone(), aggregate_ids.clone()),
        };
        Ok(LedgerChange::Save(ledger))
    })
    .await?;

    ctx.event_source
        .subscribe(name, event_types, aggregate_ids)
        .await?;
    tracing::info!(read_model = %name, "Read model subscribed");
    Ok(())
}

/// Replace the filters of an existing read model.
///
/// Progress is kept: events of newly added types that precede the cursor are
/// not delivered. Reset the read model to rebuild it under the new filters.
///
/// # Errors
///
/// - `NotSubscribed` if the read model has no ledger
/// - `LeaseHeld` while a build is in flight
/// - Ledger store and event source failures
pub async fn resubscribe(
    ctx: &EngineContext,
    name: &ReadModelName,
    event_types: Option<Vec<String>>,
    aggregate_ids: Option<Vec<String>>,
) -> Result<(), EngineError> {
    update_ledger(ctx, name, LeaseGate::Refuse, |ledger| {
        let Some(mut ledger) = ledger else {
            return Err(EngineError::NotSubscribed(name.clone()));
        };
        ledger.event_types.clone_from(&event_types);
        ledger.aggregate_ids.clone_from(&aggregate_ids);
        Ok(LedgerChange::Save(ledger))
    })
    .await?;

    ctx.event_source
        .resubscribe(name, event_types, aggregate_ids)
        .await?;
    tracing::info!(read_model = %name, "Read model resubscribed");
    Ok(())
}

/// Delete the ledger of `name`. Unsubscribing an unknown read model succeeds.
///
/// The read model's tables are left in place.
///
/// # Errors
///
/// - `LeaseHeld` while a build is in flight
/// - Ledger store and event source failures
pub async fn unsubscribe(ctx: &EngineContext, name: &ReadModelName) -> Result<(), EngineError> {
    update_ledger(ctx, name, LeaseGate::Refuse, |ledger| {
        Ok(if ledger.is_some() {
            LedgerChange::Delete
        } else {
            LedgerChange::Keep
        })
    })
    .await?;

    ctx.event_source.unsubscribe(name).await?;
    tracing::info!(read_model = %name, "Read model unsubscribed");
    Ok(())
}
