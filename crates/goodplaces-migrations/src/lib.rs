//! The Goodplaces schema history.
//!
//! One [`MigrationUnit`] per revision, from the initial schema
//! (`b9094d09fa9d`) to the current head ([`HEAD_REVISION`]). Revision
//! tokens match the ones already recorded in deployed databases.
//!
//! # Design decisions
//!
//! - **Linear history**: two abandoned revisions that forked off
//!   `064a2159eb7b` and `345b58ae4a73` were never deployed and are not
//!   bundled, so the history has a single head.
//! - **Re-parented early revisions**: the first two revisions after the
//!   initial schema both named a predecessor that no longer exists. They
//!   are chained onto the initial schema in the order they were applied.
//! - **SQLite dialect**: data steps use SQLite SQL. Posts, comments and
//!   saves are hard-deleted with their dependent rows, since foreign keys
//!   are not enforced while migrations run.

mod baseline;
mod data;
mod history;

use goodplaces_ledger::{GraphIntegrityError, MigrationGraph, MigrationUnit};

/// The latest revision.
pub const HEAD_REVISION: &str = "7a1730bf8d2e";

/// The first revision.
pub const BASE_REVISION: &str = baseline::REVISION;

/// Every bundled revision, oldest first.
pub fn all() -> Vec<MigrationUnit> {
    let mut units = vec![baseline::unit()];
    units.extend(history::units());
    units
}

/// Builds the graph of [`all`] revisions.
///
/// # Errors
///
/// Returns a [`GraphIntegrityError`] if the bundled history is malformed.
pub fn graph() -> Result<MigrationGraph, GraphIntegrityError> {
    MigrationGraph::build(all())
}

/// Category names a fully migrated database starts with.
pub fn seeded_categories() -> Vec<&'static str> {
    let mut names = baseline::INITIAL_CATEGORIES.to_vec();
    names.extend(["nightlife", "cafe"]);
    names
}
