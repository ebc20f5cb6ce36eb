//! Per read model key/value properties.
//!
//! Properties live in the ledger but are independent of progress: they are
//! never gated by a build in flight and survive reset.

use crate::mutation::{LeaseGate, LedgerChange, update_ledger};
use crate::{EngineContext, EngineError};
use readmodel_core::cursor::ReadModelName;
use std::collections::BTreeMap;

/// Value of `key`, `None` if unset or the read model is unknown.
///
/// # Errors
///
/// Ledger store failures.
pub async fn get_property(
    ctx: &EngineContext,
    name: &ReadModelName,
    key: &str,
) -> Result<Option<String>, EngineError> {
    let ledger = ctx.ledger_store.load(name).await?;
    Ok(ledger.and_then(|(_, mut ledger)| ledger.properties.remove(key)))
}

/// All properties; empty if the read model is unknown.
///
/// # Errors
///
/// Ledger store failures.
pub async fn list_properties(
    ctx: &EngineContext,
    name: &ReadModelName,
) -> Result<BTreeMap<String, String>, EngineError> {
    let ledger = ctx.ledger_store.load(name).await?;
    Ok(ledger.map(|(_, ledger)| ledger.properties).unwrap_or_default())
}

/// Set `key` to `value`.
///
/// # Errors
///
/// - `NotSubscribed` if the read model has no ledger
/// - Ledger store failures
pub async fn set_property(
    ctx: &EngineContext,
    name: &ReadModelName,
    key: &str,
    value: &str,
) -> Result<(), EngineError> {
    update_ledger(ctx, name, LeaseGate::Ignore, |ledger| {
        let Some(mut ledger) = ledger else {
            return Err(EngineError::NotSubscribed(name.clone()));
        };
        if ledger.properties.get(key).is_some_and(|v| v == value) {
            return Ok(LedgerChange::Keep);
        }
        ledger.properties.insert(key.to_string(), value.to_string());
        Ok(LedgerChange::Save(ledger))
    })
    .await?;
    tracing::debug!(read_model = %name, key, "Property set");
    Ok(())
}

/// Remove `key`. Removing an absent key succeeds.
///
/// # Errors
///
/// - `NotSubscribed` if the read model has no ledger
/// - Ledger store failures
pub async fn delete_property(
    ctx: &EngineContext,
    name: &ReadModelName,
    key: &str,
) -> Result<(), EngineError> {
    update_ledger(ctx, name, LeaseGate::Ignore, |ledger| {
        let Some(mut ledger) = ledger else {
            return Err(EngineError::NotSubscribed(name.clone()));
        };
        Ok(if ledger.properties.remove(key).is_some() {
            LedgerChange::Save(ledger)
        } else {
            LedgerChange::Keep
        })
    })
    .await?;
    tracing::debug!(read_model = %name, key, "Property deleted");
    Ok(())
}
