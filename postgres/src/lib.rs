//! `PostgreSQL` ledger store for the read-model engine.
//!
//! Ledgers are kept in one table, one row per read model, as JSONB next to a
//! revision column. Every write is a conditional `INSERT`/`UPDATE`/`DELETE` on
//! that revision, which gives the compare-and-swap the engine's lease relies on
//! across processes.
//!
//! # Example
//!
//! ```no_run
//! use readmodel_postgres::PostgresLedgerStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledgers = PostgresLedgerStore::connect("postgres://localhost/readmodels").await?;
//! ledgers.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ledger_store;

pub use ledger_store::PostgresLedgerStore;
