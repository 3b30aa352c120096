//! Migration ledger for the Goodplaces backend.
//!
//! Keeps an ordered, reversible history of schema and data transformations
//! and moves a persistent store along it. Each [`MigrationUnit`] names the
//! unit(s) it follows; [`MigrationGraph::build`] validates the units and
//! fixes a deterministic order; a [`Runner`] walks that order forward or
//! backward from the store's recorded heads to a target.
//!
//! # Design decisions
//!
//! - **Explicit units**: the history is a plain `Vec<MigrationUnit>` built in
//!   code. Ordering comes from parent links, never from file names.
//! - **Declarative primitives**: schema steps are [`SchemaOp`] values, so a
//!   downgrade can be derived from an upgrade and stores can choose how to
//!   execute each primitive.
//! - **Store trait**: the runner only sees [`Store`] and
//!   [`StoreTransaction`]. `goodplaces-db` provides the SQLite store.
//! - **Version rows move with the unit**: the applied heads are rewritten in
//!   the transaction that commits the unit, so a failure can never leave the
//!   recorded version ahead of the schema.

mod error;
mod graph;
pub mod ops;
mod runner;
mod store;
mod unit;

pub use error::{GraphIntegrityError, LedgerError, TransformationError};
pub use graph::{MigrationGraph, Plan, BASE, HEAD, HEADS};
pub use ops::SchemaOp;
pub use runner::{Direction, RunOptions, RunReport, Runner, TransactionMode};
pub use store::{DataAccess, SqlValue, Store, StoreError, StoreTransaction};
pub use unit::{DataFn, Downgrade, MigrationUnit, Step};
