//! Projection dispatch table: event type to projection function.
//!
//! # Overview
//!
//! A read model is defined by a [`ProjectionTable`]: one handler per event type
//! plus an optional init handler that prepares tables. The engine invokes the
//! handler of every event in stream order with a [`ProjectionContext`] scoped
//! to the read model. Events whose type has no handler are consumed silently.
//!
//! Handlers report how the build should proceed through [`ProjectionOutcome`]:
//!
//! - `Continue`: go on with the next event
//! - `StopBatch`: this event counts as applied; commit and yield to the caller
//! - `OmitBatch`: this event and the rest of the batch are not recorded; commit
//!   what was applied before it and yield (the event is delivered again later)
//!
//! A returned [`ProjectionFailure`] is recorded in the ledger and stops the
//! read model until reset.
//!
//! # Example
//!
//! ```
//! use readmodel_core::event::ReadModelEvent;
//! use readmodel_core::projection::{
//!     ProjectionContext, ProjectionFailure, ProjectionOutcome, ProjectionResult, ProjectionTable,
//! };
//! use readmodel_core::store::{Document, IndexType, TableDeclaration};
//!
//! async fn note_created(ctx: ProjectionContext, event: ReadModelEvent) -> ProjectionResult {
//!     let mut note = Document::new();
//!     note.insert("id".into(), event.aggregate_id.into());
//!     note.insert("text".into(), event.payload["text"].clone());
//!     ctx.store.insert("notes", note).await?;
//!     Ok(ProjectionOutcome::Continue)
//! }
//!
//! let table = ProjectionTable::new()
//!     .on_init(|store| async move {
//!         store
//!             .define_table("notes", TableDeclaration::new().with_index("id", IndexType::String))
//!             .await?;
//!         Ok::<(), ProjectionFailure>(())
//!     })
//!     .on("NoteCreated", note_created);
//!
//! assert_eq!(table.event_types(), vec!["NoteCreated".to_string()]);
//! ```

use crate::encryption::{Encryption, EncryptionError};
use crate::event::ReadModelEvent;
use crate::ledger::LedgerError;
use crate::store::{ReadModelStore, StoreError};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// How the build proceeds after a handler returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProjectionOutcome {
    /// Apply the next event.
    #[default]
    Continue,
    /// Event applied; commit and yield to the caller.
    StopBatch,
    /// Event not applied; commit what came before and yield.
    OmitBatch,
}

/// Failure of a projection handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionFailure {
    /// A store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event could not be encrypted or decrypted.
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// Application error.
    #[error("{name}: {message}")]
    Handler {
        /// Error kind.
        name: String,
        /// Message.
        message: String,
    },
}

impl ProjectionFailure {
    /// Application error with the generic name `"Error"`.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    /// Application error with an explicit kind.
    #[must_use]
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Connectivity problem of the store; such failures are retried, not recorded.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_transient())
    }

    /// Kind used in ledger records and metric dimensions.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Store(_) => "StoreError",
            Self::Encryption(_) => "EncryptionError",
            Self::Handler { name, .. } => name,
        }
    }

    /// Ledger record of this failure.
    #[must_use]
    pub fn to_ledger_error(&self) -> LedgerError {
        let message = match self {
            Self::Handler { message, .. } => message.clone(),
            other => other.to_string(),
        };
        LedgerError::new(self.name(), message)
    }
}

/// Result of a projection handler.
pub type ProjectionResult = Result<ProjectionOutcome, ProjectionFailure>;

/// What a handler gets besides the event.
#[derive(Clone)]
pub struct ProjectionContext {
    /// Store handle scoped to this read model.
    pub store: Arc<dyn ReadModelStore>,
    /// Encryption of the event, if any.
    pub encryption: Option<Arc<dyn Encryption>>,
}

impl fmt::Debug for ProjectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionContext")
            .field("encryption", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}

/// Projection function for one event type.
///
/// Implemented for every `Fn(ProjectionContext, ReadModelEvent) -> impl Future<Output = ProjectionResult>`.
pub trait ProjectionHandler: Send + Sync {
    /// Apply one event.
    fn handle(
        &self,
        ctx: ProjectionContext,
        event: ReadModelEvent,
    ) -> Pin<Box<dyn Future<Output = ProjectionResult> + Send>>;
}

impl<F, Fut> ProjectionHandler for F
where
    F: Fn(ProjectionContext, ReadModelEvent) -> Fut + Send + Sync,
    Fut: Future<Output = ProjectionResult> + Send + 'static,
{
    fn handle(
        &self,
        ctx: ProjectionContext,
        event: ReadModelEvent,
    ) -> Pin<Box<dyn Future<Output = ProjectionResult> + Send>> {
        Box::pin(self(ctx, event))
    }
}

/// Init handler: prepares the read model's tables after subscribe or reset.
pub type InitHandler = Arc<
    dyn Fn(Arc<dyn ReadModelStore>) -> Pin<Box<dyn Future<Output = Result<(), ProjectionFailure>> + Send>>
        + Send
        + Sync,
>;

/// Dispatch table of a read model.
#[derive(Clone, Default)]
pub struct ProjectionTable {
    handlers: BTreeMap<String, Arc<dyn ProjectionHandler>>,
    init: Option<InitHandler>,
}

impl ProjectionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function for `event_type`, replacing any previous one.
    #[must_use]
    pub fn on<F, Fut>(self, event_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ProjectionContext, ReadModelEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProjectionResult> + Send + 'static,
    {
        self.on_handler(event_type, handler)
    }

    /// Register a handler object for `event_type`, replacing any previous one.
    #[must_use]
    pub fn on_handler(
        mut self,
        event_type: impl Into<String>,
        handler: impl ProjectionHandler + 'static,
    ) -> Self {
        self.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Register the init handler.
    #[must_use]
    pub fn on_init<F, Fut>(mut self, init: F) -> Self
    where
        F: Fn(Arc<dyn ReadModelStore>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProjectionFailure>> + Send + 'static,
    {
        self.init = Some(Arc::new(move |store| Box::pin(init(store))));
        self
    }

    /// Handler for `event_type`.
    #[must_use]
    pub fn handler(&self, event_type: &str) -> Option<&Arc<dyn ProjectionHandler>> {
        self.handlers.get(event_type)
    }

    /// Init handler, if registered.
    #[must_use]
    pub const fn init_handler(&self) -> Option<&InitHandler> {
        self.init.as_ref()
    }

    /// Event types with a handler, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl fmt::Debug for ProjectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionTable")
            .field("event_types", &self.handlers.keys().collect::<Vec<_>>())
            .field("init", &self.init.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stop(_ctx: ProjectionContext, _event: ReadModelEvent) -> ProjectionResult {
        Ok(ProjectionOutcome::StopBatch)
    }

    #[test]
    fn registration_replaces_and_lists_types() {
        let table = ProjectionTable::new()
            .on("B", stop)
            .on("A", stop)
            .on("B", |_ctx: ProjectionContext, _event: ReadModelEvent| async {
                Ok::<_, ProjectionFailure>(ProjectionOutcome::Continue)
            });

        assert_eq!(table.event_types(), vec!["A".to_string(), "B".to_string()]);
        assert!(table.handler("C").is_none());
        assert!(table.init_handler().is_none());
    }

    #[test]
    fn failure_to_ledger_error() {
        let failure = ProjectionFailure::named("ValidationError", "text missing");
        assert_eq!(
            failure.to_ledger_error(),
            LedgerError::new("ValidationError", "text missing")
        );

        let failure = ProjectionFailure::from(StoreError::TableNotFound("notes".into()));
        assert_eq!(failure.name(), "StoreError");
        assert_eq!(failure.to_ledger_error().message, "Table not found: notes");
        assert!(!failure.is_transient());
        assert!(ProjectionFailure::from(StoreError::Transient("down".into())).is_transient());
    }
}
