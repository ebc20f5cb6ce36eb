//! Store wrapper that traces every call a projection makes.
//!
//! Each operation runs inside a `debug` span carrying the read model, the
//! table and the operation name; failures are logged with their error.
//! The builder wraps the scoped store handle before giving it to projections.

use readmodel_core::cursor::ReadModelName;
use readmodel_core::store::{
    Document, FieldSelection, FindOptions, ReadModelStore, SearchCondition, StoreError,
    TableDeclaration, UpdateCondition, UpdateOptions,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::Instrument;

/// [`ReadModelStore`] decorator emitting `tracing` spans.
#[derive(Clone)]
pub struct TracedStore {
    inner: Arc<dyn ReadModelStore>,
    read_model: ReadModelName,
}

impl TracedStore {
    /// Wrap `inner`, labelling spans with `read_model`.
    #[must_use]
    pub fn new(inner: Arc<dyn ReadModelStore>, read_model: ReadModelName) -> Self {
        Self { inner, read_model }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn ReadModelStore> {
        &self.inner
    }

    fn traced<'a, T: Send + 'a>(
        &self,
        operation: &'static str,
        table: &str,
        call: Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>,
    ) -> Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>> {
        let span = tracing::debug_span!(
            "readmodel_store",
            read_model = %self.read_model,
            table,
            operation
        );
        Box::pin(
            async move {
                let result = call.await;
                if let Err(error) = &result {
                    tracing::debug!(error = %error, "Store operation failed");
                }
                result
            }
            .instrument(span),
        )
    }
}

impl ReadModelStore for TracedStore {
    fn define_table(
        &self,
        table: &str,
        declaration: TableDeclaration,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        self.traced("define_table", table, self.inner.define_table(table, declaration))
    }

    fn find(
        &self,
        table: &str,
        condition: SearchCondition,
        options: FindOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Document>, StoreError>> + Send + '_>> {
        self.traced("find", table, self.inner.find(table, condition, options))
    }

    fn find_one(
        &self,
        table: &str,
        condition: SearchCondition,
        projection: Option<FieldSelection>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Document>, StoreError>> + Send + '_>> {
        self.traced("find_one", table, self.inner.find_one(table, condition, projection))
    }

    fn count(
        &self,
        table: &str,
        condition: SearchCondition,
    ) -> Pin<Box<dyn Future<Output = Result<usize, StoreError>> + Send + '_>> {
        self.traced("count", table, self.inner.count(table, condition))
    }

    fn insert(
        &self,
        table: &str,
        document: Document,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        self.traced("insert", table, self.inner.insert(table, document))
    }

    fn update(
        &self,
        table: &str,
        condition: SearchCondition,
        update: UpdateCondition,
        options: UpdateOptions,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        self.traced(
            "update",
            table,
            self.inner.update(table, condition, update, options),
        )
    }

    fn delete(
        &self,
        table: &str,
        condition: SearchCondition,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        self.traced("delete", table, self.inner.delete(table, condition))
    }
}
