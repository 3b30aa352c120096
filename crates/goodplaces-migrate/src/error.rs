//! Command errors.

use goodplaces_db::PoolError;
use goodplaces_ledger::{GraphIntegrityError, LedgerError, StoreError};
use thiserror::Error;

use crate::config::ConfigError;

/// Everything a command can fail with.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The bundled history is malformed.
    #[error("bundled migration history is invalid: {0}")]
    Graph(#[from] GraphIntegrityError),

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The store failed outside a run.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// No connection could be checked out of the pool.
    #[error("failed to get database connection: {0}")]
    Connection(#[from] r2d2::Error),

    /// `check` found revisions that still have to run.
    #[error("database is behind (recorded {current:?}); pending: {}", .pending.join(", "))]
    Pending {
        /// Recorded heads.
        current: Vec<String>,
        /// Revisions an upgrade to `heads` would run.
        pending: Vec<String>,
    },
}
