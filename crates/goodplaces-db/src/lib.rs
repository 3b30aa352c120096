//! SQLite store for the Goodplaces migration ledger.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and a [`SqliteStore`] that executes ledger primitives, keeps the applied
//! version rows and guards runs with an advisory lock table.
//!
//! # Design decisions
//!
//! - **Version rows in `_ledger_version`**: one row per applied head,
//!   rewritten in the same transaction as the unit that moved it.
//! - **Lock row in `_ledger_lock`**: a single-row table. Inserting the row
//!   takes the lock; a second runner's insert fails and reports the holder.
//! - **Foreign keys off during a run**: SQLite cannot change most
//!   constraints in place, so tables are rebuilt, which needs enforcement
//!   disabled. `PRAGMA foreign_key_check` runs before each commit instead.

mod pool;
mod rebuild;
mod render;
mod store;

pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use store::{force_unlock, LockInfo, SqliteStore, SqliteTransaction, LOCK_TABLE, VERSION_TABLE};
