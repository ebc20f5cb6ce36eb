//! Read-only status view derived from a ledger.

use crate::cursor::{Cursor, ReadModelName};
use crate::event::ReadModelEvent;
use crate::ledger::{LedgerError, ReadModelLedger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire-visible run state of a read model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Events are being delivered.
    Deliver,
    /// Paused; builds are no-ops.
    Skip,
    /// A projection failed; only reset recovers.
    Error,
}

/// How events reach the read model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStrategy {
    /// The read model pulls events and keeps its progress in its own ledger.
    #[default]
    #[serde(rename = "inline-ledger")]
    InlineLedger,
}

/// Status of one read model, reproducible from its ledger alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadModelStatus {
    /// Read model name.
    pub event_subscriber: ReadModelName,
    /// Application properties.
    pub properties: BTreeMap<String, String>,
    /// Delivery strategy.
    pub delivery_strategy: DeliveryStrategy,
    /// Last successfully applied event.
    pub success_event: Option<ReadModelEvent>,
    /// Failed event.
    pub failed_event: Option<ReadModelEvent>,
    /// Recorded failures.
    pub errors: Option<Vec<LedgerError>>,
    /// Current cursor.
    pub cursor: Cursor,
    /// Derived run state.
    pub status: RunStatus,
}

impl ReadModelStatus {
    /// Derive the status of `event_subscriber` from its ledger.
    #[must_use]
    pub fn from_ledger(event_subscriber: ReadModelName, ledger: &ReadModelLedger) -> Self {
        Self {
            event_subscriber,
            properties: ledger.properties.clone(),
            delivery_strategy: DeliveryStrategy::InlineLedger,
            success_event: ledger.success_event.clone(),
            failed_event: ledger.failed_event.clone(),
            errors: ledger.errors.clone(),
            cursor: ledger.cursor.clone(),
            status: run_status(ledger),
        }
    }
}

/// Run state of a ledger: error beats pause, pause beats deliver.
#[must_use]
pub fn run_status(ledger: &ReadModelLedger) -> RunStatus {
    if ledger.is_errored() {
        RunStatus::Error
    } else if ledger.is_paused {
        RunStatus::Skip
    } else {
        RunStatus::Deliver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn error_beats_pause() {
        let mut ledger = ReadModelLedger::default();
        assert_eq!(run_status(&ledger), RunStatus::Deliver);

        ledger.is_paused = true;
        assert_eq!(run_status(&ledger), RunStatus::Skip);

        ledger.record_failure(None, LedgerError::new("ProjectionError", "init failed"));
        assert_eq!(run_status(&ledger), RunStatus::Error);
    }

    #[test]
    fn status_wire_format() {
        let ledger = ReadModelLedger::default();
        let status = ReadModelStatus::from_ledger(ReadModelName::new("notes"), &ledger);
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["eventSubscriber"], "notes");
        assert_eq!(value["deliveryStrategy"], "inline-ledger");
        assert_eq!(value["status"], "deliver");
        assert_eq!(value["cursor"], Value::Null);
        assert_eq!(value["properties"], json!({}));
    }
}
