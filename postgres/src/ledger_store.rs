//! [`LedgerStore`] backed by `PostgreSQL`.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE readmodel_ledgers (
//!     read_model_name TEXT PRIMARY KEY,
//!     revision BIGINT NOT NULL,
//!     ledger JSONB NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```

use readmodel_core::cursor::ReadModelName;
use readmodel_core::ledger::{LedgerStore, LedgerStoreError, ReadModelLedger, Revision};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::pin::Pin;

/// `PostgreSQL`-backed ledger persistence with revision-guarded writes.
///
/// # Example
///
/// ```no_run
/// use readmodel_postgres::PostgresLedgerStore;
/// use readmodel_core::cursor::ReadModelName;
/// use readmodel_core::ledger::{LedgerStore, ReadModelLedger};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let ledgers = PostgresLedgerStore::from_pool(pool);
/// let name = ReadModelName::new("notes");
///
/// let revision = ledgers.save(&name, None, ReadModelLedger::default()).await?;
/// let (stored, _ledger) = ledgers.load(&name).await?.expect("just saved");
/// assert_eq!(stored, revision);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Use an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError::Transient`] if the database is unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5) // Ledger traffic is a few small rows per step
            .connect(database_url)
            .await
            .map_err(|e| LedgerStoreError::Transient(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Create the `readmodel_ledgers` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError::Backend`] if the migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerStoreError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn current_revision(
        &self,
        read_model: &ReadModelName,
    ) -> Result<Option<Revision>, LedgerStoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM readmodel_ledgers WHERE read_model_name = $1")
                .bind(read_model.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?;
        Ok(row.map(|(revision,)| to_revision(revision)))
    }

    async fn conflict(
        &self,
        read_model: ReadModelName,
        expected: Option<Revision>,
    ) -> LedgerStoreError {
        let actual = match self.current_revision(&read_model).await {
            Ok(actual) => actual,
            Err(error) => return error,
        };
        tracing::debug!(
            read_model = %read_model,
            ?expected,
            ?actual,
            "Ledger write lost compare-and-swap"
        );
        metrics::counter!("readmodel_ledger_conflicts_total", "read_model" => read_model.to_string())
            .increment(1);
        LedgerStoreError::Conflict {
            read_model,
            expected,
            actual,
        }
    }
}

impl LedgerStore for PostgresLedgerStore {
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
        let read_model = read_model.clone();
        Box::pin(async move {
            let row: Option<(i64, serde_json::Value)> = sqlx::query_as(
                "SELECT revision, ledger FROM readmodel_ledgers WHERE read_model_name = $1",
            )
            .bind(read_model.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

            row.map(|(revision, ledger)| {
                let ledger = serde_json::from_value(ledger).map_err(|e| {
                    LedgerStoreError::Serialization(format!(
                        "Failed to decode ledger of {read_model}: {e}"
                    ))
                })?;
                Ok((to_revision(revision), ledger))
            })
            .transpose()
        })
    }

    fn save(
        &self,
        read_model: &ReadModelName,
        expected: Option<Revision>,
        ledger: ReadModelLedger,
    ) -> Pin<Box<dyn Future<Output = Result<Revision, LedgerStoreError>> + Send + '_>> {
        let read_model = read_model.clone();
        Box::pin(async move {
            let document = serde_json::to_value(&ledger).map_err(|e| {
                LedgerStoreError::Serialization(format!("Failed to encode ledger: {e}"))
            })?;

            let written: Option<(i64,)> = match expected {
                None => sqlx::query_as(
                    "INSERT INTO readmodel_ledgers (read_model_name, revision, ledger, updated_at)
                     VALUES ($1, $2, $3, now())
                     ON CONFLICT (read_model_name) DO NOTHING
                     RETURNING revision",
                )
                .bind(read_model.as_str())
                .bind(from_revision(Revision::FIRST))
                .bind(&document)
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?,
                Some(revision) => sqlx::query_as(
                    "UPDATE readmodel_ledgers
                     SET revision = revision + 1, ledger = $3, updated_at = now()
                     WHERE read_model_name = $1 AND revision = $2
                     RETURNING revision",
                )
                .bind(read_model.as_str())
                .bind(from_revision(revision))
                .bind(&document)
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?,
            };

            match written {
                Some((revision,)) => Ok(to_revision(revision)),
                None => Err(self.conflict(read_model, expected).await),
            }
        })
    }

    fn delete(
        &self,
        read_model: &ReadModelName,
        expected: Revision,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerStoreError>> + Send + '_>> {
        let read_model = read_model.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM readmodel_ledgers WHERE read_model_name = $1 AND revision = $2",
            )
            .bind(read_model.as_str())
            .bind(from_revision(expected))
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

            if result.rows_affected() == 0 {
                return Err(self.conflict(read_model, Some(expected)).await);
            }
            Ok(())
        })
    }
}

/// Connectivity problems are transient; everything else is a backend failure.
fn database_error(error: sqlx::Error) -> LedgerStoreError {
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => LedgerStoreError::Transient(error.to_string()),
        _ => LedgerStoreError::Backend(error.to_string()),
    }
}

// Revisions start at 1 and grow by one per write; they never reach 2^63.
#[allow(clippy::cast_sign_loss)]
const fn to_revision(value: i64) -> Revision {
    Revision::new(value as u64)
}

#[allow(clippy::cast_possible_wrap)]
const fn from_revision(revision: Revision) -> i64 {
    revision.value() as i64
}
