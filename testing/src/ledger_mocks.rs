//! In-memory ledger store with compare-and-swap semantics.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use readmodel_core::cursor::ReadModelName;
use readmodel_core::ledger::{LedgerStore, LedgerStoreError, ReadModelLedger, Revision};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// In-memory [`LedgerStore`].
///
/// # Example
///
/// ```
/// use readmodel_testing::InMemoryLedgerStore;
/// use readmodel_core::cursor::ReadModelName;
/// use readmodel_core::ledger::{LedgerStore, ReadModelLedger};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryLedgerStore::new();
/// let name = ReadModelName::new("notes");
///
/// let revision = store.save(&name, None, ReadModelLedger::default()).await?;
///
/// // Writing again from the same starting point loses the race
/// assert!(store.save(&name, None, ReadModelLedger::default()).await.is_err());
/// store.save(&name, Some(revision), ReadModelLedger::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedgerStore {
    ledgers: Arc<RwLock<HashMap<ReadModelName, (Revision, ReadModelLedger)>>>,
    saves: Arc<AtomicUsize>,
    failing_saves: Arc<RwLock<Vec<usize>>>,
}

impl InMemoryLedgerStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current ledger of a read model
    #[must_use]
    pub fn get(&self, read_model: &ReadModelName) -> Option<ReadModelLedger> {
        self.ledgers
            .read()
            .unwrap()
            .get(read_model)
            .map(|(_, ledger)| ledger.clone())
    }

    /// Current revision of a read model's ledger
    #[must_use]
    pub fn revision(&self, read_model: &ReadModelName) -> Option<Revision> {
        self.ledgers
            .read()
            .unwrap()
            .get(read_model)
            .map(|(revision, _)| *revision)
    }

    /// Overwrite a ledger without any revision check (test setup)
    pub fn put(&self, read_model: &ReadModelName, ledger: ReadModelLedger) {
        let mut ledgers = self.ledgers.write().unwrap();
        let revision = ledgers
            .get(read_model)
            .map_or(Revision::FIRST, |(revision, _)| revision.next());
        ledgers.insert(read_model.clone(), (revision, ledger));
    }

    /// Number of `save` calls so far, failed ones included
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make the `n`-th `save` call from now (1-based) fail with a transient error
    pub fn fail_nth_save(&self, n: usize) {
        let target = self.save_count() + n;
        self.failing_saves.write().unwrap().push(target);
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn load(
        &self,
        read_model: &ReadModelName,
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Option<(Revision, ReadModelLedger)>, LedgerStoreError>>
                + Send
                + '_,
        >,
    > {
        let found = self.ledgers.read().unwrap().get(read_model).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn save(
        &self,
        read_model: &ReadModelName,
        expected: Option<Revision>,
        ledger: ReadModelLedger,
    ) -> Pin<Box<dyn Future<Output = Result<Revision, LedgerStoreError>> + Send + '_>> {
        let read_model = read_model.clone();
        Box::pin(async move {
            let call = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut failing = self.failing_saves.write().unwrap();
                if let Some(index) = failing.iter().position(|n| *n == call) {
                    failing.remove(index);
                    return Err(LedgerStoreError::Transient(format!(
                        "injected failure on save #{call}"
                    )));
                }
            }

            let mut ledgers = self.ledgers.write().unwrap();
            let actual = ledgers.get(&read_model).map(|(revision, _)| *revision);
            if actual != expected {
                return Err(LedgerStoreError::Conflict {
                    read_model,
                    expected,
                    actual,
                });
            }
            let revision = actual.map_or(Revision::FIRST, Revision::next);
            ledgers.insert(read_model, (revision, ledger));
            Ok(revision)
        })
    }

    fn delete(
        &self,
        read_model: &ReadModelName,
        expected: Revision,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerStoreError>> + Send + '_>> {
        let read_model = read_model.clone();
        Box::pin(async move {
            let mut ledgers = self.ledgers.write().unwrap();
            let actual = ledgers.get(&read_model).map(|(revision, _)| *revision);
            if actual != Some(expected) {
                return Err(LedgerStoreError::Conflict {
                    read_model,
                    expected: Some(expected),
                    actual,
                });
            }
            ledgers.remove(&read_model);
            Ok(())
        })
    }
}
