//! In-memory store adapter.
//!
//! Tables are vectors of documents evaluated with the core filter and update
//! algebra, so read models tested here behave like they do against a real
//! document database (minus performance).

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use readmodel_core::cursor::ReadModelName;
use readmodel_core::store::{
    Document, FieldSelection, FindOptions, ReadModelStore, SearchCondition, StoreAdapter,
    StoreError, TableDeclaration, UpdateCondition, UpdateOptions, lookup, seed_document,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug, Default)]
struct Table {
    declaration: TableDeclaration,
    rows: Vec<Document>,
}

impl Table {
    fn check_primary_key(&self, document: &Document) -> Result<(), StoreError> {
        let Some(primary) = self.declaration.primary_index() else {
            return Ok(());
        };
        let Some(key) = lookup(document, primary) else {
            return Ok(());
        };
        if self.rows.iter().any(|row| lookup(row, primary) == Some(key)) {
            return Err(StoreError::Backend(format!(
                "duplicate value {key} for primary index {primary}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct State {
    read_models: HashMap<ReadModelName, HashMap<String, Table>>,
    drops: HashMap<ReadModelName, usize>,
    pending_failures: Vec<StoreError>,
}

/// In-memory [`StoreAdapter`].
///
/// # Example
///
/// ```
/// use readmodel_testing::InMemoryStoreAdapter;
/// use readmodel_core::cursor::ReadModelName;
/// use readmodel_core::store::{IndexType, SearchCondition, StoreAdapter, TableDeclaration};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let adapter = InMemoryStoreAdapter::new();
/// let store = adapter.store(&ReadModelName::new("notes"));
///
/// store.define_table("notes", TableDeclaration::new().with_index("id", IndexType::String)).await?;
/// store.insert("notes", json!({ "id": "a1" }).as_object().cloned().unwrap()).await?;
///
/// assert_eq!(store.count("notes", SearchCondition::all()).await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStoreAdapter {
    state: Arc<RwLock<State>>,
}

impl InMemoryStoreAdapter {
    /// Create an empty adapter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next store call (any read model, any operation) fail with `error`.
    ///
    /// Several queued failures are consumed in order.
    pub fn fail_next(&self, error: StoreError) {
        self.state.write().unwrap().pending_failures.push(error);
    }

    /// All rows of a table, in insertion order. Empty if the table does not exist.
    #[must_use]
    pub fn rows(&self, read_model: &ReadModelName, table: &str) -> Vec<Document> {
        self.state
            .read()
            .unwrap()
            .read_models
            .get(read_model)
            .and_then(|tables| tables.get(table))
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Names of the defined tables of a read model, sorted.
    #[must_use]
    pub fn tables(&self, read_model: &ReadModelName) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut names: Vec<String> = state
            .read_models
            .get(read_model)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// How many times a read model was dropped.
    #[must_use]
    pub fn drop_count(&self, read_model: &ReadModelName) -> usize {
        self.state
            .read()
            .unwrap()
            .drops
            .get(read_model)
            .copied()
            .unwrap_or_default()
    }

    fn take_failure(&self) -> Option<StoreError> {
        let mut state = self.state.write().unwrap();
        if state.pending_failures.is_empty() {
            None
        } else {
            Some(state.pending_failures.remove(0))
        }
    }
}

impl StoreAdapter for InMemoryStoreAdapter {
    fn store(&self, read_model: &ReadModelName) -> Arc<dyn ReadModelStore> {
        Arc::new(InMemoryReadModelStore {
            read_model: read_model.clone(),
            adapter: self.clone(),
        })
    }

    fn drop_read_model(
        &self,
        read_model: &ReadModelName,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let read_model = read_model.clone();
        Box::pin(async move {
            if let Some(error) = self.take_failure() {
                return Err(error);
            }
            let mut state = self.state.write().unwrap();
            state.read_models.remove(&read_model);
            *state.drops.entry(read_model).or_default() += 1;
            Ok(())
        })
    }
}

/// [`ReadModelStore`] handle scoped to one read model of an [`InMemoryStoreAdapter`].
#[derive(Clone, Debug)]
pub struct InMemoryReadModelStore {
    read_model: ReadModelName,
    adapter: InMemoryStoreAdapter,
}

impl InMemoryReadModelStore {
    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if let Some(error) = self.adapter.take_failure() {
            return Err(error);
        }
        let mut state = self.adapter.state.write().unwrap();
        let table = state
            .read_models
            .get_mut(&self.read_model)
            .and_then(|tables| tables.get_mut(table))
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        f(table)
    }
}

impl ReadModelStore for InMemoryReadModelStore {
    fn define_table(
        &self,
        table: &str,
        declaration: TableDeclaration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            if let Some(error) = self.adapter.take_failure() {
                return Err(error);
            }
            let mut state = self.adapter.state.write().unwrap();
            let tables = state.read_models.entry(self.read_model.clone()).or_default();
            if tables.contains_key(&table) {
                return Err(StoreError::TableAlreadyExists(table));
            }
            tables.insert(
                table,
                Table {
                    declaration,
                    rows: Vec::new(),
                },
            );
            Ok(())
        })
    }

    fn find(
        &self,
        table: &str,
        condition: SearchCondition,
        options: FindOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Document>, StoreError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            let matching = self.with_table(&table, |t| {
                Ok(t.rows
                    .iter()
                    .filter(|row| condition.matches(row))
                    .cloned()
                    .collect::<Vec<_>>())
            })?;
            Ok(options.apply(matching))
        })
    }

    fn find_one(
        &self,
        table: &str,
        condition: SearchCondition,
        projection: Option<FieldSelection>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Document>, StoreError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            let found = self.with_table(&table, |t| {
                Ok(t.rows.iter().find(|row| condition.matches(row)).cloned())
            })?;
            Ok(match (found, projection) {
                (Some(row), Some(selection)) => Some(selection.apply(&row)),
                (found, None) => found,
                (None, Some(_)) => None,
            })
        })
    }

    fn count(
        &self,
        table: &str,
        condition: SearchCondition,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            self.with_table(&table, |t| {
                Ok(t.rows.iter().filter(|row| condition.matches(row)).count())
            })
        })
    }

    fn insert(
        &self,
        table: &str,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            self.with_table(&table, |t| {
                t.check_primary_key(&document)?;
                t.rows.push(document);
                Ok(())
            })
        })
    }

    fn update(
        &self,
        table: &str,
        condition: SearchCondition,
        update: UpdateCondition,
        options: UpdateOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            self.with_table(&table, |t| {
                let mut updated = t.rows.clone();
                let mut matched = false;
                for row in updated.iter_mut().filter(|row| condition.matches(row)) {
                    update.apply(row)?;
                    matched = true;
                }
                if !matched && options.upsert {
                    let mut document = seed_document(&condition);
                    update.apply(&mut document)?;
                    updated.push(document);
                }
                t.rows = updated;
                Ok(())
            })
        })
    }

    fn delete(
        &self,
        table: &str,
        condition: SearchCondition,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            self.with_table(&table, |t| {
                t.rows.retain(|row| !condition.matches(row));
                Ok(())
            })
        })
    }
}
