//! The apply engine.
//!
//! A [`Runner`] moves a store from its recorded heads to a target. It takes
//! the store's advisory lock, reads the recorded heads, plans the units to
//! traverse and runs each unit's steps inside a store transaction. The
//! version rows are rewritten in the same transaction, so they only ever
//! advance when a unit commits.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, TransformationError};
use crate::graph::{IndexPlan, MigrationGraph, Plan, Resolved, Reverse};
use crate::store::{DataAccess, Store, StoreError, StoreTransaction};
use crate::unit::Step;

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply units forward.
    Upgrade,
    /// Revert units.
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
        })
    }
}

/// Transaction scope of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionMode {
    /// One transaction per unit. A failure keeps every unit committed
    /// before it.
    #[default]
    PerUnit,
    /// One transaction for the whole run. A failure rolls back every unit
    /// of the run.
    PerRun,
}

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Transaction scope.
    pub transaction_mode: TransactionMode,
    /// Owner recorded in the advisory lock.
    pub lock_owner: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            transaction_mode: TransactionMode::PerUnit,
            lock_owner: "goodplaces-ledger".to_string(),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Direction of travel; `None` when nothing ran.
    pub direction: Option<Direction>,
    /// Heads recorded before the run.
    pub from: Vec<String>,
    /// Heads recorded after the run.
    pub to: Vec<String>,
    /// Revisions whose steps ran, in execution order.
    pub executed: Vec<String>,
    /// Irreversible revisions passed during a downgrade. The version
    /// pointer moved past them but no reverse work was done.
    pub irreversible: Vec<String>,
}

impl RunReport {
    fn unchanged(recorded: Vec<String>) -> Self {
        Self {
            direction: None,
            to: recorded.clone(),
            from: recorded,
            executed: Vec::new(),
            irreversible: Vec::new(),
        }
    }

    /// `true` when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty() && self.irreversible.is_empty() && self.from == self.to
    }
}

/// Drives a [`Store`] through a [`MigrationGraph`].
#[derive(Debug)]
pub struct Runner<'g, S> {
    graph: &'g MigrationGraph,
    store: S,
    options: RunOptions,
}

impl<'g, S: Store> Runner<'g, S> {
    /// A runner with default options.
    pub fn new(graph: &'g MigrationGraph, store: S) -> Self {
        Self::with_options(graph, store, RunOptions::default())
    }

    /// A runner with explicit options.
    pub fn with_options(graph: &'g MigrationGraph, store: S, options: RunOptions) -> Self {
        Self {
            graph,
            store,
            options,
        }
    }

    /// The graph this runner walks.
    pub fn graph(&self) -> &'g MigrationGraph {
        self.graph
    }

    /// The store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consumes the runner and returns the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// The heads recorded in the store.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Store`] if the version rows cannot be read.
    pub fn current(&mut self) -> Result<Vec<String>, LedgerError> {
        Ok(self.store.read_versions()?)
    }

    /// Computes what a run to `target` would do, without locking or
    /// executing anything.
    ///
    /// # Errors
    ///
    /// Target resolution errors, [`LedgerError::UnknownRevision`] for
    /// recorded versions missing from the graph, and store read failures.
    pub fn plan(&mut self, target: &str) -> Result<Plan, LedgerError> {
        let recorded = self.store.read_versions()?;
        self.graph.plan(&recorded, target)
    }

    /// Moves the store to `target` in whichever direction that requires.
    ///
    /// # Errors
    ///
    /// Target resolution errors, [`StoreError::LockHeld`] (as
    /// [`LedgerError::Store`]) and [`LedgerError::Transformation`] for the
    /// first unit that fails.
    pub fn migrate_to(&mut self, target: &str) -> Result<RunReport, LedgerError> {
        self.run(target, None)
    }

    /// Applies units up to `target`.
    ///
    /// # Errors
    ///
    /// As [`Runner::migrate_to`], plus [`LedgerError::WrongDirection`] when
    /// `target` lies below the recorded heads.
    pub fn upgrade(&mut self, target: &str) -> Result<RunReport, LedgerError> {
        self.run(target, Some(Direction::Upgrade))
    }

    /// Reverts units down to `target`.
    ///
    /// # Errors
    ///
    /// As [`Runner::migrate_to`], plus [`LedgerError::WrongDirection`] when
    /// `target` lies above the recorded heads.
    pub fn downgrade(&mut self, target: &str) -> Result<RunReport, LedgerError> {
        self.run(target, Some(Direction::Downgrade))
    }

    /// Rewrites the version rows to `target` without running any steps.
    ///
    /// Used to mark a database created directly at the latest schema. The
    /// recorded heads are not validated, so a store carrying an unknown
    /// version can be repaired this way.
    ///
    /// # Errors
    ///
    /// Target resolution errors and store failures.
    pub fn stamp(&mut self, target: &str) -> Result<RunReport, LedgerError> {
        let resolved = self.graph.resolve_indices(target)?;
        let heads = match &resolved {
            Resolved::Base => Vec::new(),
            Resolved::Revisions(revs) => self.graph.heads_within(&self.graph.closure(revs)),
        };

        let mut store = LockGuard::acquire(&mut self.store, &self.options.lock_owner)?;
        let from = store.read_versions()?;
        let mut tx = store.begin()?;
        tx.write_versions(&heads)?;
        tx.commit()?;

        tracing::info!(from = ?from, to = ?heads, "stamped version");

        Ok(RunReport {
            direction: None,
            from,
            to: heads,
            executed: Vec::new(),
            irreversible: Vec::new(),
        })
    }

    fn run(&mut self, target: &str, expected: Option<Direction>) -> Result<RunReport, LedgerError> {
        let resolved = self.graph.resolve_indices(target)?;

        let mut store = LockGuard::acquire(&mut self.store, &self.options.lock_owner)?;
        let recorded = store.read_versions()?;
        let plan = self.graph.plan_indices(&recorded, &resolved)?;

        if let (Some(requested), Some(inferred)) = (expected, plan.direction) {
            if requested != inferred {
                return Err(LedgerError::WrongDirection {
                    target: target.to_string(),
                    requested,
                    inferred,
                });
            }
        }

        let Some(direction) = plan.direction else {
            tracing::debug!(requested = target, current = ?recorded, "store already at target");
            return Ok(RunReport::unchanged(recorded));
        };

        let started = Instant::now();
        let report = match self.options.transaction_mode {
            TransactionMode::PerUnit => {
                run_per_unit(self.graph, &mut *store, recorded, &plan, direction)?
            }
            TransactionMode::PerRun => {
                run_per_run(self.graph, &mut *store, recorded, &plan, direction)?
            }
        };

        tracing::info!(
            direction = %direction,
            units = report.executed.len() + report.irreversible.len(),
            to = ?report.to,
            elapsed_ms = elapsed_ms(started),
            "migration run complete"
        );

        Ok(report)
    }
}

/// Holds the advisory lock for the lifetime of a run.
struct LockGuard<'s, S: Store> {
    store: &'s mut S,
    owner: &'s str,
}

impl<'s, S: Store> LockGuard<'s, S> {
    fn acquire(store: &'s mut S, owner: &'s str) -> Result<Self, StoreError> {
        store.acquire_lock(owner)?;
        tracing::debug!(owner, "acquired migration lock");
        Ok(Self { store, owner })
    }
}

impl<S: Store> Deref for LockGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S: Store> DerefMut for LockGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.store
    }
}

impl<S: Store> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        match self.store.release_lock(self.owner) {
            Ok(()) => tracing::debug!(owner = self.owner, "released migration lock"),
            Err(err) => {
                tracing::warn!(owner = self.owner, error = %err, "failed to release migration lock")
            }
        }
    }
}

/// Mutable state threaded through a run.
struct Progress {
    applied: Vec<bool>,
    executed: Vec<String>,
    irreversible: Vec<String>,
}

impl Progress {
    fn new(plan: &IndexPlan) -> Self {
        Self {
            applied: plan.applied.clone(),
            executed: Vec::new(),
            irreversible: Vec::new(),
        }
    }

    fn into_report(
        self,
        graph: &MigrationGraph,
        from: Vec<String>,
        direction: Direction,
    ) -> RunReport {
        RunReport {
            direction: Some(direction),
            from,
            to: graph.heads_within(&self.applied),
            executed: self.executed,
            irreversible: self.irreversible,
        }
    }
}

fn run_per_unit<S: Store>(
    graph: &MigrationGraph,
    store: &mut S,
    recorded: Vec<String>,
    plan: &IndexPlan,
    direction: Direction,
) -> Result<RunReport, LedgerError> {
    let mut progress = Progress::new(plan);

    for &idx in &plan.order {
        let started = Instant::now();
        let revision = graph.token(idx);
        let fail = |source: StoreError| failure(revision, direction, None, source);

        let mut tx = store.begin().map_err(fail)?;
        let ran_steps = run_unit(graph, idx, direction, &mut tx)?;
        progress.applied[idx] = direction == Direction::Upgrade;
        tx.write_versions(&graph.heads_within(&progress.applied))
            .map_err(fail)?;
        tx.check_integrity().map_err(fail)?;
        tx.commit().map_err(fail)?;

        record(&mut progress, revision, ran_steps);
        tracing::info!(
            revision,
            direction = %direction,
            elapsed_ms = elapsed_ms(started),
            "{}",
            graph.unit(idx).message()
        );
    }

    Ok(progress.into_report(graph, recorded, direction))
}

fn run_per_run<S: Store>(
    graph: &MigrationGraph,
    store: &mut S,
    recorded: Vec<String>,
    plan: &IndexPlan,
    direction: Direction,
) -> Result<RunReport, LedgerError> {
    let Some(&last) = plan.order.last() else {
        return Ok(RunReport::unchanged(recorded));
    };
    let mut progress = Progress::new(plan);

    let first = graph.token(plan.order[0]);
    let mut tx = store
        .begin()
        .map_err(|source| failure(first, direction, None, source))?;

    for &idx in &plan.order {
        let started = Instant::now();
        let revision = graph.token(idx);
        let fail = |source: StoreError| failure(revision, direction, None, source);

        let ran_steps = run_unit(graph, idx, direction, &mut tx)?;
        progress.applied[idx] = direction == Direction::Upgrade;
        tx.write_versions(&graph.heads_within(&progress.applied))
            .map_err(fail)?;
        tx.check_integrity().map_err(fail)?;

        record(&mut progress, revision, ran_steps);
        tracing::info!(
            revision,
            direction = %direction,
            elapsed_ms = elapsed_ms(started),
            "{} (pending commit)",
            graph.unit(idx).message()
        );
    }

    tx.commit()
        .map_err(|source| failure(graph.token(last), direction, None, source))?;

    Ok(progress.into_report(graph, recorded, direction))
}

fn record(progress: &mut Progress, revision: &str, ran_steps: bool) {
    if ran_steps {
        progress.executed.push(revision.to_string());
    } else {
        progress.irreversible.push(revision.to_string());
    }
}

/// Runs one unit's steps. Returns `false` for an irreversible unit passed
/// during a downgrade.
fn run_unit<T: StoreTransaction>(
    graph: &MigrationGraph,
    idx: usize,
    direction: Direction,
    tx: &mut T,
) -> Result<bool, TransformationError> {
    let unit = graph.unit(idx);
    let steps: &[Step] = match direction {
        Direction::Upgrade => unit.upgrade_steps(),
        Direction::Downgrade => match graph.reverse(idx) {
            Reverse::Steps(steps) => steps,
            Reverse::Irreversible(reason) => {
                tracing::warn!(
                    revision = unit.revision(),
                    reason = reason.as_str(),
                    "revision is irreversible; moving version pointer without reverting"
                );
                return Ok(false);
            }
        },
    };

    for (position, step) in steps.iter().enumerate() {
        let result = match step {
            Step::Schema(op) => {
                tracing::debug!(revision = unit.revision(), step = %op, "running step");
                tx.apply(op)
            }
            Step::Data { description, run } => {
                tracing::debug!(
                    revision = unit.revision(),
                    step = description.as_str(),
                    "running data step"
                );
                let access: &mut dyn DataAccess = &mut *tx;
                run.as_ref()(access)
            }
        };
        result.map_err(|source| {
            failure(
                unit.revision(),
                direction,
                Some((position, step.to_string())),
                source,
            )
        })?;
    }

    Ok(true)
}

fn failure(
    revision: &str,
    direction: Direction,
    step: Option<(usize, String)>,
    source: StoreError,
) -> TransformationError {
    TransformationError {
        revision: revision.to_string(),
        direction,
        step,
        source,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
