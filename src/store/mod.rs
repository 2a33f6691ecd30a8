//! Metadata persistence. Each submodule holds the queries for one table and
//! takes a `&Connection`, so the vault can compose several of them inside a
//! single `Store::write` transaction.

pub mod ancestry;
pub mod grants;
pub mod ledger;
pub mod names;
mod schema;
mod sqlite;
pub mod tree;
pub mod users;

pub use ancestry::IndexDrift;
pub use sqlite::SqliteStore;

use rusqlite::{Connection, Transaction};

use crate::error::Result;

/// Store defines the database interface.
///
/// Implementations hand out a connection for reads and an IMMEDIATE
/// transaction for writes; the table modules run their queries on those.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    /// Runs `f` against the connection without opening a transaction.
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>;

    /// Runs `f` inside a write transaction, then hands the outcome to `finish`.
    ///
    /// `finish` runs once the transaction has committed or rolled back and
    /// before the connection is released, so no other writer interleaves with
    /// it. Filesystem side effects that must follow the metadata outcome go
    /// there.
    fn write_then<T, F, G>(&self, f: F, finish: G) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
        G: FnOnce(&Result<T>);

    /// Runs `f` inside a write transaction. Commits on `Ok`, rolls back on
    /// `Err`.
    fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.write_then(f, |_| {})
    }
}
