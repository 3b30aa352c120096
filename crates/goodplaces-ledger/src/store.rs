//! The store abstraction the runner drives.
//!
//! A store executes primitives inside transactions, keeps the applied
//! version rows, and provides the advisory lock that keeps runners from
//! racing each other. `goodplaces-db` implements it for SQLite.

use thiserror::Error;

use crate::ops::SchemaOp;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database driver failed.
    #[error("store backend error: {0}")]
    Backend(#[source] BoxError),

    /// Another runner holds the migration lock.
    #[error("migration lock is held by '{owner}' since {since}")]
    LockHeld {
        /// Owner recorded in the lock row.
        owner: String,
        /// When the lock was taken, as recorded by the store.
        since: String,
    },

    /// A referenced table does not exist.
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    /// A referenced column does not exist.
    #[error("column '{column}' does not exist on table '{table}'")]
    ColumnNotFound {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A named constraint does not exist.
    #[error("{kind} constraint '{name}' does not exist on table '{table}'")]
    ConstraintNotFound {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
        /// Constraint kind, as text.
        kind: String,
    },

    /// Committed data would violate the schema (for example dangling
    /// foreign keys).
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A data step rejected the rows it found.
    #[error("data step failed: {0}")]
    Data(String),
}

impl StoreError {
    /// Wraps a driver error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// A value bound to, or read from, a parameterised statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// `NULL`.
    Null,
    /// Integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// Text.
    Text(String),
    /// Bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns the text payload, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

/// Direct row access granted to data steps, scoped to the unit's
/// transaction.
pub trait DataAccess {
    /// Executes one statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, StoreError>;

    /// Runs a query and returns every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>, StoreError>;
}

/// An open store transaction.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`]
/// rolls it back.
pub trait StoreTransaction: DataAccess {
    /// Executes one schema primitive.
    fn apply(&mut self, op: &SchemaOp) -> Result<(), StoreError>;

    /// Replaces the applied version rows with `heads`, creating the version
    /// table on first use. An empty slice records the base state.
    fn write_versions(&mut self, heads: &[String]) -> Result<(), StoreError>;

    /// Verifies store invariants before a unit commits.
    fn check_integrity(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Commits the transaction.
    fn commit(self) -> Result<(), StoreError>;
}

/// A persistent store the ledger can migrate.
pub trait Store {
    /// Transaction handle.
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    /// Reads the applied version rows. A store that has never been migrated
    /// returns an empty list.
    fn read_versions(&mut self) -> Result<Vec<String>, StoreError>;

    /// Opens a transaction.
    fn begin(&mut self) -> Result<Self::Transaction<'_>, StoreError>;

    /// Takes the advisory migration lock, failing with
    /// [`StoreError::LockHeld`] if another owner has it.
    fn acquire_lock(&mut self, owner: &str) -> Result<(), StoreError>;

    /// Releases the advisory lock held by `owner`.
    fn release_lock(&mut self, owner: &str) -> Result<(), StoreError>;
}
