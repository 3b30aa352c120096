//! Migration units: one revision of the schema history.

use std::fmt;
use std::sync::Arc;

use crate::ops::SchemaOp;
use crate::store::{DataAccess, StoreError};

/// Signature of a data step body.
pub type DataFn = dyn Fn(&mut dyn DataAccess) -> Result<(), StoreError> + Send + Sync;

/// One step of a transformation.
#[derive(Clone)]
pub enum Step {
    /// A declarative schema primitive.
    Schema(SchemaOp),
    /// A data step with row access scoped to the unit's transaction.
    Data {
        /// Operator-facing description.
        description: String,
        /// Step body.
        run: Arc<DataFn>,
    },
}

impl Step {
    /// Builds a data step.
    pub fn data<F>(description: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut dyn DataAccess) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        Self::Data {
            description: description.into(),
            run: Arc::new(run),
        }
    }

    /// The structural inverse, if there is one. Data steps never have one.
    pub fn inverse(&self) -> Option<Step> {
        match self {
            Self::Schema(op) => op.inverse().map(Self::Schema),
            Self::Data { .. } => None,
        }
    }
}

impl From<SchemaOp> for Step {
    fn from(op: SchemaOp) -> Self {
        Self::Schema(op)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(op) => f.debug_tuple("Schema").field(op).finish(),
            Self::Data { description, .. } => f
                .debug_struct("Data")
                .field("description", description)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(op) => fmt::Display::fmt(op, f),
            Self::Data { description, .. } => write!(f, "data: {description}"),
        }
    }
}

/// How a unit is reverted.
#[derive(Debug, Clone)]
pub enum Downgrade {
    /// Explicitly authored reverse steps, run in the given order.
    Steps(Vec<Step>),
    /// The structural inverse of the upgrade steps, derived when the graph
    /// is built. Building fails if any upgrade step has no inverse.
    Inverse,
    /// Downgrade is a deliberate no-op. Reverting past this unit moves the
    /// version pointer and reports a warning.
    Irreversible {
        /// Why the change cannot be undone.
        reason: String,
    },
}

/// A single migration unit.
///
/// Units are immutable once built: their revision token is recorded in
/// every store they have been applied to.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    revision: String,
    message: String,
    down_revisions: Vec<String>,
    branch_labels: Vec<String>,
    depends_on: Vec<String>,
    upgrade: Vec<Step>,
    downgrade: Downgrade,
}

impl MigrationUnit {
    /// A root unit with no steps. The downgrade defaults to
    /// [`Downgrade::Inverse`].
    pub fn new(revision: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            message: message.into(),
            down_revisions: Vec::new(),
            branch_labels: Vec::new(),
            depends_on: Vec::new(),
            upgrade: Vec::new(),
            downgrade: Downgrade::Inverse,
        }
    }

    /// Declares the predecessor.
    pub fn revises(mut self, parent: impl Into<String>) -> Self {
        self.down_revisions = vec![parent.into()];
        self
    }

    /// Declares several predecessors, making this a merge unit.
    pub fn merges<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.down_revisions = parents.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a branch label.
    pub fn branch_label(mut self, label: impl Into<String>) -> Self {
        self.branch_labels.push(label.into());
        self
    }

    /// Declares a cross-branch dependency.
    pub fn depends_on(mut self, revision: impl Into<String>) -> Self {
        self.depends_on.push(revision.into());
        self
    }

    /// Sets the forward steps.
    pub fn upgrade<I>(mut self, steps: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Step>,
    {
        self.upgrade = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets explicit reverse steps.
    pub fn downgrade<I>(mut self, steps: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Step>,
    {
        self.downgrade = Downgrade::Steps(steps.into_iter().map(Into::into).collect());
        self
    }

    /// Derives the downgrade from the upgrade steps.
    pub fn reversible(mut self) -> Self {
        self.downgrade = Downgrade::Inverse;
        self
    }

    /// Marks the downgrade as a deliberate no-op.
    pub fn irreversible(mut self, reason: impl Into<String>) -> Self {
        self.downgrade = Downgrade::Irreversible {
            reason: reason.into(),
        };
        self
    }

    /// Revision token.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Predecessor tokens; empty for a root.
    pub fn down_revisions(&self) -> &[String] {
        &self.down_revisions
    }

    /// Branch labels declared on this unit.
    pub fn branch_labels(&self) -> &[String] {
        &self.branch_labels
    }

    /// Cross-branch dependencies.
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    /// Forward steps.
    pub fn upgrade_steps(&self) -> &[Step] {
        &self.upgrade
    }

    /// Declared downgrade.
    pub fn downgrade_kind(&self) -> &Downgrade {
        &self.downgrade
    }

    /// `true` for units with more than one predecessor.
    pub fn is_merge(&self) -> bool {
        self.down_revisions.len() > 1
    }
}
