//! Error taxonomy of the ledger.

use thiserror::Error;

use crate::runner::Direction;
use crate::store::StoreError;

/// The declared history is malformed. Detected when the graph is built;
/// nothing can run against a graph that fails validation.
#[derive(Debug, Error)]
pub enum GraphIntegrityError {
    /// A revision token is empty, reserved, or contains `@` or whitespace.
    #[error("invalid revision token '{0}'")]
    InvalidRevision(String),

    /// Two units share a token.
    #[error("duplicate revision '{0}'")]
    DuplicateRevision(String),

    /// A unit's predecessor does not exist.
    #[error("revision '{revision}' revises unknown revision '{parent}'")]
    UnknownParent {
        /// The unit declaring the parent.
        revision: String,
        /// The missing parent token.
        parent: String,
    },

    /// A unit depends on a revision that does not exist.
    #[error("revision '{revision}' depends on unknown revision '{dependency}'")]
    UnknownDependency {
        /// The unit declaring the dependency.
        revision: String,
        /// The missing dependency token.
        dependency: String,
    },

    /// Parent or dependency edges form a cycle.
    #[error("revision '{0}' is part of a cycle")]
    Cycle(String),

    /// Two heads are not separated by branch labels and never merge.
    #[error(
        "revisions '{first}' and '{second}' are both heads{}; add a merge revision or a branch label",
        .fork_point.as_ref().map(|rev| format!(" diverging from '{rev}'")).unwrap_or_default()
    )]
    UnmergedHeads {
        /// First head in topological order.
        first: String,
        /// Second head in topological order.
        second: String,
        /// Nearest common ancestor, if the heads share one.
        fork_point: Option<String>,
    },

    /// A branch label is declared twice.
    #[error("branch label '{label}' is declared by both '{first}' and '{second}'")]
    DuplicateBranchLabel {
        /// The label.
        label: String,
        /// First declaring unit.
        first: String,
        /// Second declaring unit.
        second: String,
    },

    /// The downgrade is derived from the upgrade, but a step has no inverse.
    #[error("revision '{revision}' cannot derive a downgrade: step '{step}' has no inverse")]
    NotInvertible {
        /// The unit.
        revision: String,
        /// Description of the offending step.
        step: String,
    },
}

/// A unit's transformation failed against the live store. The run halted at
/// this unit and everything in its transaction scope was rolled back.
#[derive(Debug, Error)]
#[error(
    "{direction} of revision '{revision}' failed{}: {source}",
    .step.as_ref().map(|(index, desc)| format!(" at step {} ({desc})", index + 1)).unwrap_or_default()
)]
pub struct TransformationError {
    /// The failing unit.
    pub revision: String,
    /// Direction of the run.
    pub direction: Direction,
    /// Zero-based index and description of the failing step; `None` when the
    /// failure happened while recording the version or committing.
    pub step: Option<(usize, String)>,
    /// The underlying store error.
    #[source]
    pub source: StoreError,
}

/// Top-level error returned by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The history failed validation.
    #[error(transparent)]
    Graph(#[from] GraphIntegrityError),

    /// A target or recorded version names a revision the graph does not
    /// contain.
    #[error("unknown revision '{0}'")]
    UnknownRevision(String),

    /// A revision prefix matches several revisions.
    #[error("revision prefix '{prefix}' is ambiguous: {}", .candidates.join(", "))]
    AmbiguousRevision {
        /// The prefix given.
        prefix: String,
        /// Matching revisions.
        candidates: Vec<String>,
    },

    /// `head` was requested but the graph has several heads.
    #[error("multiple heads present ({}); name one or use 'heads'", .0.join(", "))]
    MultipleHeads(Vec<String>),

    /// The requested operation runs in the opposite direction.
    #[error("'{target}' is not a valid {requested} target; it would run a {inferred}")]
    WrongDirection {
        /// Target as given.
        target: String,
        /// Direction the caller asked for.
        requested: Direction,
        /// Direction the target implies.
        inferred: Direction,
    },

    /// A unit failed to apply or revert.
    #[error(transparent)]
    Transformation(#[from] TransformationError),

    /// Store bookkeeping failed (version rows, locking).
    #[error(transparent)]
    Store(#[from] StoreError),
}
