//! The revision graph.
//!
//! [`MigrationGraph::build`] validates a set of units and fixes a
//! deterministic topological order: parents before children, dependencies
//! before dependents, and ties broken by branch label and then by revision
//! token. Every query after that works on indices into that order, so
//! "lower index" always means "applied earlier".

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::error::{GraphIntegrityError, LedgerError};
use crate::runner::Direction;
use crate::unit::{Downgrade, MigrationUnit, Step};

/// Target naming the empty schema.
pub const BASE: &str = "base";
/// Target naming the single head.
pub const HEAD: &str = "head";
/// Target naming every head.
pub const HEADS: &str = "heads";

const RESERVED: [&str; 3] = [BASE, HEAD, HEADS];

/// Reverse steps resolved at build time.
#[derive(Debug, Clone)]
pub(crate) enum Reverse {
    Steps(Vec<Step>),
    Irreversible(String),
}

#[derive(Debug)]
struct Node {
    unit: MigrationUnit,
    parents: Vec<usize>,
    dependencies: Vec<usize>,
    children: Vec<usize>,
    dependents: Vec<usize>,
    reverse: Reverse,
}

/// What a target resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolved {
    Base,
    Revisions(Vec<usize>),
}

/// The units to traverse between the recorded state and a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Direction of travel; `None` when there is nothing to do.
    pub direction: Option<Direction>,
    /// Revisions in execution order.
    pub revisions: Vec<String>,
    /// Heads recorded before the run.
    pub from: Vec<String>,
    /// Heads recorded after the run.
    pub to: Vec<String>,
}

impl Plan {
    /// `true` when the store is already at the target.
    pub fn is_noop(&self) -> bool {
        self.revisions.is_empty()
    }
}

/// Index-level plan used by the runner.
#[derive(Debug)]
pub(crate) struct IndexPlan {
    pub(crate) direction: Option<Direction>,
    pub(crate) order: Vec<usize>,
    pub(crate) applied: Vec<bool>,
}

/// A validated migration history.
#[derive(Debug)]
pub struct MigrationGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    labels: HashMap<String, usize>,
}

impl MigrationGraph {
    /// Validates `units` and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphIntegrityError`] for invalid or duplicate tokens,
    /// unknown parents or dependencies, cycles, unmerged heads, duplicate
    /// branch labels, and derived downgrades that cannot be inverted.
    pub fn build(units: Vec<MigrationUnit>) -> Result<Self, GraphIntegrityError> {
        let mut declared: HashMap<String, usize> = HashMap::with_capacity(units.len());
        for (idx, unit) in units.iter().enumerate() {
            validate_token(unit.revision())?;
            if declared.insert(unit.revision().to_string(), idx).is_some() {
                return Err(GraphIntegrityError::DuplicateRevision(
                    unit.revision().to_string(),
                ));
            }
        }

        let mut parents = Vec::with_capacity(units.len());
        let mut dependencies = Vec::with_capacity(units.len());
        for unit in &units {
            let mut resolved = Vec::with_capacity(unit.down_revisions().len());
            for parent in unit.down_revisions() {
                match declared.get(parent) {
                    Some(&idx) => resolved.push(idx),
                    None => {
                        return Err(GraphIntegrityError::UnknownParent {
                            revision: unit.revision().to_string(),
                            parent: parent.clone(),
                        })
                    }
                }
            }
            parents.push(resolved);

            let mut resolved = Vec::with_capacity(unit.dependencies().len());
            for dependency in unit.dependencies() {
                match declared.get(dependency) {
                    Some(&idx) => resolved.push(idx),
                    None => {
                        return Err(GraphIntegrityError::UnknownDependency {
                            revision: unit.revision().to_string(),
                            dependency: dependency.clone(),
                        })
                    }
                }
            }
            dependencies.push(resolved);
        }

        let order = topological_order(&units, &parents, &dependencies)?;

        let mut position = vec![0usize; units.len()];
        for (pos, &original) in order.iter().enumerate() {
            position[original] = pos;
        }

        let mut slots: Vec<Option<MigrationUnit>> = units.into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        for &original in &order {
            let Some(unit) = slots[original].take() else {
                continue;
            };
            let reverse = resolve_reverse(&unit)?;
            nodes.push(Node {
                unit,
                parents: parents[original].iter().map(|&p| position[p]).collect(),
                dependencies: dependencies[original]
                    .iter()
                    .map(|&d| position[d])
                    .collect(),
                children: Vec::new(),
                dependents: Vec::new(),
                reverse,
            });
        }
        for idx in 0..nodes.len() {
            for parent in nodes[idx].parents.clone() {
                nodes[parent].children.push(idx);
            }
            for dependency in nodes[idx].dependencies.clone() {
                nodes[dependency].dependents.push(idx);
            }
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.unit.revision().to_string(), idx))
            .collect();

        let mut labels: HashMap<String, usize> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            for label in node.unit.branch_labels() {
                if let Some(&first) = labels.get(label) {
                    return Err(GraphIntegrityError::DuplicateBranchLabel {
                        label: label.clone(),
                        first: nodes[first].unit.revision().to_string(),
                        second: node.unit.revision().to_string(),
                    });
                }
                labels.insert(label.clone(), idx);
            }
        }

        let graph = Self {
            nodes,
            index,
            labels,
        };
        graph.check_heads()?;

        tracing::debug!(
            revisions = graph.len(),
            heads = graph.head_indices().len(),
            "built migration graph"
        );

        Ok(graph)
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` for an empty history.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a unit by its full token.
    pub fn get(&self, revision: &str) -> Option<&MigrationUnit> {
        self.index.get(revision).map(|&idx| &self.nodes[idx].unit)
    }

    /// Units in topological order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationUnit> + '_ {
        self.nodes.iter().map(|node| &node.unit)
    }

    /// Units newest first, as shown by `history`.
    pub fn history(&self) -> impl Iterator<Item = &MigrationUnit> + '_ {
        self.nodes.iter().rev().map(|node| &node.unit)
    }

    /// Revisions no other unit revises.
    pub fn heads(&self) -> Vec<&str> {
        self.head_indices()
            .into_iter()
            .map(|idx| self.token(idx))
            .collect()
    }

    /// Revisions without a predecessor.
    pub fn bases(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| node.parents.is_empty())
            .map(|node| node.unit.revision())
            .collect()
    }

    /// Revisions that directly revise `revision`.
    pub fn children(&self, revision: &str) -> Vec<&str> {
        self.index
            .get(revision)
            .map(|&idx| {
                self.nodes[idx]
                    .children
                    .iter()
                    .map(|&child| self.token(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The nearest branch label at or below `revision`, if any.
    pub fn branch_of(&self, revision: &str) -> Option<&str> {
        let &idx = self.index.get(revision)?;
        let labeled = self.nearest_labeled(idx)?;
        self.nodes[labeled]
            .unit
            .branch_labels()
            .first()
            .map(String::as_str)
    }

    /// `true` when reverting `revision` is a deliberate no-op.
    pub fn is_irreversible(&self, revision: &str) -> bool {
        self.index
            .get(revision)
            .is_some_and(|&idx| matches!(self.nodes[idx].reverse, Reverse::Irreversible(_)))
    }

    /// Every revision `revision` requires, itself included, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownRevision`] for tokens not in the graph.
    pub fn ancestors(&self, revision: &str) -> Result<Vec<&str>, LedgerError> {
        let idx = self.exact(revision)?;
        Ok(self.tokens_in(&self.closure(&[idx])))
    }

    /// Every revision that requires `revision`, excluding itself, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownRevision`] for tokens not in the graph.
    pub fn descendants(&self, revision: &str) -> Result<Vec<&str>, LedgerError> {
        let idx = self.exact(revision)?;
        let mut set = self.descendant_set(&[idx]);
        set[idx] = false;
        Ok(self.tokens_in(&set))
    }

    /// Resolves a target expression to full revision tokens. `base`
    /// resolves to an empty list.
    ///
    /// Accepted forms: `base`, `head`, `heads`, `<label>@head`, a full
    /// revision token, or a unique token prefix.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownRevision`], [`LedgerError::AmbiguousRevision`]
    /// or [`LedgerError::MultipleHeads`].
    pub fn resolve(&self, target: &str) -> Result<Vec<&str>, LedgerError> {
        Ok(match self.resolve_indices(target)? {
            Resolved::Base => Vec::new(),
            Resolved::Revisions(revs) => revs.into_iter().map(|idx| self.token(idx)).collect(),
        })
    }

    /// Computes the plan that moves a store recorded at `recorded` to
    /// `target`. Pure; nothing is executed.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownRevision`] if the target or a recorded version
    /// is not in the graph, plus the target resolution errors of
    /// [`MigrationGraph::resolve`].
    pub fn plan(&self, recorded: &[String], target: &str) -> Result<Plan, LedgerError> {
        let resolved = self.resolve_indices(target)?;
        let plan = self.plan_indices(recorded, &resolved)?;
        Ok(self.describe(recorded, &plan))
    }

    pub(crate) fn describe(&self, recorded: &[String], plan: &IndexPlan) -> Plan {
        let mut after = plan.applied.clone();
        for &idx in &plan.order {
            after[idx] = plan.direction == Some(Direction::Upgrade);
        }
        Plan {
            direction: plan.direction,
            revisions: plan
                .order
                .iter()
                .map(|&idx| self.token(idx).to_string())
                .collect(),
            from: recorded.to_vec(),
            to: self.heads_within(&after),
        }
    }

    pub(crate) fn unit(&self, idx: usize) -> &MigrationUnit {
        &self.nodes[idx].unit
    }

    pub(crate) fn reverse(&self, idx: usize) -> &Reverse {
        &self.nodes[idx].reverse
    }

    pub(crate) fn token(&self, idx: usize) -> &str {
        self.nodes[idx].unit.revision()
    }

    pub(crate) fn resolve_indices(&self, target: &str) -> Result<Resolved, LedgerError> {
        let target = target.trim();
        match target {
            BASE => return Ok(Resolved::Base),
            HEADS => return Ok(Resolved::Revisions(self.head_indices())),
            HEAD => {
                let heads = self.head_indices();
                return match heads.len() {
                    0 => Ok(Resolved::Base),
                    1 => Ok(Resolved::Revisions(heads)),
                    _ => Err(LedgerError::MultipleHeads(
                        heads
                            .into_iter()
                            .map(|idx| self.token(idx).to_string())
                            .collect(),
                    )),
                };
            }
            _ => {}
        }

        if let Some(label) = target.strip_suffix("@head") {
            let &labeled = self
                .labels
                .get(label)
                .ok_or_else(|| LedgerError::UnknownRevision(target.to_string()))?;
            let descendants = self.descendant_set(&[labeled]);
            let head = self
                .head_indices()
                .into_iter()
                .find(|&head| descendants[head] && self.nearest_labeled(head) == Some(labeled))
                .ok_or_else(|| LedgerError::UnknownRevision(target.to_string()))?;
            return Ok(Resolved::Revisions(vec![head]));
        }

        if let Some(&idx) = self.index.get(target) {
            return Ok(Resolved::Revisions(vec![idx]));
        }

        if target.is_empty() {
            return Err(LedgerError::UnknownRevision(target.to_string()));
        }
        let matches: Vec<usize> = (0..self.nodes.len())
            .filter(|&idx| self.token(idx).starts_with(target))
            .collect();
        match matches.len() {
            0 => Err(LedgerError::UnknownRevision(target.to_string())),
            1 => Ok(Resolved::Revisions(matches)),
            _ => Err(LedgerError::AmbiguousRevision {
                prefix: target.to_string(),
                candidates: matches
                    .into_iter()
                    .map(|idx| self.token(idx).to_string())
                    .collect(),
            }),
        }
    }

    /// The set of units a store recorded at `recorded` has applied.
    pub(crate) fn applied_set(&self, recorded: &[String]) -> Result<Vec<bool>, LedgerError> {
        let mut heads = Vec::with_capacity(recorded.len());
        for revision in recorded {
            heads.push(self.exact(revision)?);
        }
        Ok(self.closure(&heads))
    }

    pub(crate) fn plan_indices(
        &self,
        recorded: &[String],
        target: &Resolved,
    ) -> Result<IndexPlan, LedgerError> {
        let applied = self.applied_set(recorded)?;

        let (forward, reverse) = match target {
            Resolved::Base => (Vec::new(), self.indices_in(&applied)),
            Resolved::Revisions(revs) => {
                let wanted = self.closure(revs);
                let forward: Vec<usize> = (0..self.nodes.len())
                    .filter(|&idx| wanted[idx] && !applied[idx])
                    .collect();
                let mut below = self.descendant_set(revs);
                for &rev in revs {
                    below[rev] = false;
                }
                let reverse: Vec<usize> = (0..self.nodes.len())
                    .filter(|&idx| below[idx] && applied[idx] && !wanted[idx])
                    .collect();
                (forward, reverse)
            }
        };

        let plan = match (forward.is_empty(), reverse.is_empty()) {
            (true, true) => IndexPlan {
                direction: None,
                order: Vec::new(),
                applied,
            },
            (false, _) => IndexPlan {
                direction: Some(Direction::Upgrade),
                order: forward,
                applied,
            },
            (true, false) => IndexPlan {
                direction: Some(Direction::Downgrade),
                order: reverse.into_iter().rev().collect(),
                applied,
            },
        };
        Ok(plan)
    }

    /// Heads of an applied set: applied units no applied unit revises.
    /// Dependency edges do not consume heads.
    pub(crate) fn heads_within(&self, set: &[bool]) -> Vec<String> {
        (0..self.nodes.len())
            .filter(|&idx| set[idx] && !self.nodes[idx].children.iter().any(|&c| set[c]))
            .map(|idx| self.token(idx).to_string())
            .collect()
    }

    /// Ancestors-or-self over parent and dependency edges.
    pub(crate) fn closure(&self, roots: &[usize]) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = roots.to_vec();
        while let Some(idx) = stack.pop() {
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            stack.extend(&self.nodes[idx].parents);
            stack.extend(&self.nodes[idx].dependencies);
        }
        seen
    }

    /// Descendants-or-self over child and dependent edges.
    fn descendant_set(&self, roots: &[usize]) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = roots.to_vec();
        while let Some(idx) = stack.pop() {
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            stack.extend(&self.nodes[idx].children);
            stack.extend(&self.nodes[idx].dependents);
        }
        seen
    }

    fn exact(&self, revision: &str) -> Result<usize, LedgerError> {
        self.index
            .get(revision)
            .copied()
            .ok_or_else(|| LedgerError::UnknownRevision(revision.to_string()))
    }

    fn head_indices(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&idx| self.nodes[idx].children.is_empty())
            .collect()
    }

    fn indices_in(&self, set: &[bool]) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&idx| set[idx]).collect()
    }

    fn tokens_in(&self, set: &[bool]) -> Vec<&str> {
        self.indices_in(set)
            .into_iter()
            .map(|idx| self.token(idx))
            .collect()
    }

    /// The highest-ordered labeled unit among the parent-lineage of `idx`.
    fn nearest_labeled(&self, idx: usize) -> Option<usize> {
        let mut lineage = vec![false; self.nodes.len()];
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            if lineage[current] {
                continue;
            }
            lineage[current] = true;
            stack.extend(&self.nodes[current].parents);
        }
        (0..=idx)
            .rev()
            .find(|&i| lineage[i] && !self.nodes[i].unit.branch_labels().is_empty())
    }

    fn check_heads(&self) -> Result<(), GraphIntegrityError> {
        let heads = self.head_indices();
        let mut seen: HashMap<Option<usize>, usize> = HashMap::new();
        for head in heads {
            let branch = self.nearest_labeled(head);
            if let Some(&first) = seen.get(&branch) {
                let shared: Vec<bool> = {
                    let a = self.closure(&[first]);
                    let b = self.closure(&[head]);
                    a.iter().zip(&b).map(|(x, y)| *x && *y).collect()
                };
                let fork_point = (0..self.nodes.len())
                    .rev()
                    .find(|&idx| shared[idx])
                    .map(|idx| self.token(idx).to_string());
                return Err(GraphIntegrityError::UnmergedHeads {
                    first: self.token(first).to_string(),
                    second: self.token(head).to_string(),
                    fork_point,
                });
            }
            seen.insert(branch, head);
        }
        Ok(())
    }
}

fn validate_token(revision: &str) -> Result<(), GraphIntegrityError> {
    let invalid = revision.is_empty()
        || RESERVED.contains(&revision)
        || revision.contains('@')
        || revision.chars().any(char::is_whitespace);
    if invalid {
        return Err(GraphIntegrityError::InvalidRevision(revision.to_string()));
    }
    Ok(())
}

/// Kahn's algorithm with a sorted ready set keyed by (branch label,
/// revision). A unit's branch key is its own first label, else the key of
/// its first parent.
fn topological_order(
    units: &[MigrationUnit],
    parents: &[Vec<usize>],
    dependencies: &[Vec<usize>],
) -> Result<Vec<usize>, GraphIntegrityError> {
    let count = units.len();
    let mut pending = vec![0usize; count];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    for idx in 0..count {
        for &pred in parents[idx].iter().chain(&dependencies[idx]) {
            if pred == idx {
                return Err(GraphIntegrityError::Cycle(
                    units[idx].revision().to_string(),
                ));
            }
            pending[idx] += 1;
            successors[pred].push(idx);
        }
    }

    let mut keys: Vec<Option<String>> = vec![None; count];
    let branch_key = |idx: usize, keys: &[Option<String>]| -> String {
        units[idx]
            .branch_labels()
            .first()
            .cloned()
            .or_else(|| parents[idx].first().and_then(|&p| keys[p].clone()))
            .unwrap_or_default()
    };

    let mut ready: BTreeSet<(String, String, usize)> = BTreeSet::new();
    for idx in 0..count {
        if pending[idx] == 0 {
            let key = branch_key(idx, &keys);
            keys[idx] = Some(key.clone());
            ready.insert((key, units[idx].revision().to_string(), idx));
        }
    }

    let mut order = Vec::with_capacity(count);
    while let Some(entry) = ready.pop_first() {
        let idx = entry.2;
        order.push(idx);
        for &next in &successors[idx] {
            pending[next] -= 1;
            if pending[next] == 0 {
                let key = branch_key(next, &keys);
                keys[next] = Some(key.clone());
                ready.insert((key, units[next].revision().to_string(), next));
            }
        }
    }

    if order.len() < count {
        let stuck = (0..count)
            .filter(|&idx| pending[idx] > 0)
            .map(|idx| units[idx].revision())
            .min()
            .unwrap_or_default();
        return Err(GraphIntegrityError::Cycle(stuck.to_string()));
    }
    Ok(order)
}

fn resolve_reverse(unit: &MigrationUnit) -> Result<Reverse, GraphIntegrityError> {
    match unit.downgrade_kind() {
        Downgrade::Steps(steps) => Ok(Reverse::Steps(steps.clone())),
        Downgrade::Irreversible { reason } => Ok(Reverse::Irreversible(reason.clone())),
        Downgrade::Inverse => unit
            .upgrade_steps()
            .iter()
            .rev()
            .map(|step| {
                step.inverse()
                    .ok_or_else(|| GraphIntegrityError::NotInvertible {
                        revision: unit.revision().to_string(),
                        step: step.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Reverse::Steps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{add_column, drop_column, execute, Column, ColumnType};

    fn unit(rev: &str, parent: Option<&str>) -> MigrationUnit {
        let unit = MigrationUnit::new(rev, format!("unit {rev}"))
            .upgrade([add_column("t", Column::new(rev, ColumnType::Text))]);
        match parent {
            Some(parent) => unit.revises(parent),
            None => unit,
        }
    }

    fn linear() -> MigrationGraph {
        MigrationGraph::build(vec![
            unit("c", Some("b")),
            unit("a", None),
            unit("b", Some("a")),
        ])
        .expect("linear graph should build")
    }

    #[test]
    fn orders_linear_chain_from_root() {
        let graph = linear();
        let order: Vec<&str> = graph.iter().map(MigrationUnit::revision).collect();
        assert_eq!(order, ["a", "b", "c"]);
        assert_eq!(graph.heads(), ["c"]);
        assert_eq!(graph.bases(), ["a"]);
        assert_eq!(graph.children("a"), ["b"]);
        let history: Vec<&str> = graph.history().map(MigrationUnit::revision).collect();
        assert_eq!(history, ["c", "b", "a"]);
    }

    #[test]
    fn ordering_is_independent_of_declaration_order() {
        let forward = MigrationGraph::build(vec![
            unit("a", None),
            unit("b", Some("a")),
            unit("x", Some("a")).branch_label("feature"),
            unit("y", Some("x")),
            MigrationUnit::new("m", "merge").merges(["b", "y"]),
        ])
        .expect("graph should build");
        let backward = MigrationGraph::build(vec![
            MigrationUnit::new("m", "merge").merges(["b", "y"]),
            unit("y", Some("x")),
            unit("x", Some("a")).branch_label("feature"),
            unit("b", Some("a")),
            unit("a", None),
        ])
        .expect("graph should build");
        let a: Vec<&str> = forward.iter().map(MigrationUnit::revision).collect();
        let b: Vec<&str> = backward.iter().map(MigrationUnit::revision).collect();
        assert_eq!(a, b);
        assert_eq!(a, ["a", "b", "x", "y", "m"]);
        assert_eq!(forward.heads(), ["m"]);
    }

    #[test]
    fn rejects_unknown_parent() {
        let err = MigrationGraph::build(vec![unit("a", None), unit("b", Some("zzz"))])
            .expect_err("unknown parent should fail");
        assert!(matches!(
            err,
            GraphIntegrityError::UnknownParent { ref revision, ref parent }
                if revision == "b" && parent == "zzz"
        ));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = MigrationGraph::build(vec![unit("a", None).depends_on("nope")])
            .expect_err("unknown dependency should fail");
        assert!(matches!(err, GraphIntegrityError::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_duplicate_revision() {
        let err = MigrationGraph::build(vec![unit("a", None), unit("a", None)])
            .expect_err("duplicate should fail");
        assert!(matches!(err, GraphIntegrityError::DuplicateRevision(ref rev) if rev == "a"));
    }

    #[test]
    fn rejects_reserved_and_malformed_tokens() {
        for token in ["", "head", "base", "heads", "a@b", "two words"] {
            let err = MigrationGraph::build(vec![unit(token, None)])
                .expect_err("token should be rejected");
            assert!(matches!(err, GraphIntegrityError::InvalidRevision(_)), "{token}");
        }
    }

    #[test]
    fn rejects_cycles() {
        let err = MigrationGraph::build(vec![
            unit("a", None),
            unit("b", Some("c")),
            unit("c", Some("b")),
        ])
        .expect_err("cycle should fail");
        assert!(matches!(err, GraphIntegrityError::Cycle(ref rev) if rev == "b"));

        let err = MigrationGraph::build(vec![unit("a", Some("a"))]).expect_err("self cycle");
        assert!(matches!(err, GraphIntegrityError::Cycle(_)));
    }

    #[test]
    fn rejects_siblings_without_merge_or_label() {
        let err = MigrationGraph::build(vec![
            unit("a", None),
            unit("b", Some("a")),
            unit("c", Some("a")),
        ])
        .expect_err("unmerged fork should fail");
        match err {
            GraphIntegrityError::UnmergedHeads {
                first,
                second,
                fork_point,
            } => {
                assert_eq!(first, "b");
                assert_eq!(second, "c");
                assert_eq!(fork_point.as_deref(), Some("a"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn labeled_branch_may_keep_its_own_head() {
        let graph = MigrationGraph::build(vec![
            unit("a", None),
            unit("b", Some("a")),
            unit("x", Some("a")).branch_label("feature"),
            unit("y", Some("x")),
        ])
        .expect("labeled fork should build");
        assert_eq!(graph.heads(), ["b", "y"]);
        assert_eq!(graph.branch_of("y"), Some("feature"));
        assert_eq!(graph.branch_of("b"), None);
    }

    #[test]
    fn rejects_duplicate_branch_label() {
        let err = MigrationGraph::build(vec![
            unit("a", None).branch_label("main"),
            unit("b", None).branch_label("main"),
        ])
        .expect_err("duplicate label should fail");
        assert!(matches!(err, GraphIntegrityError::DuplicateBranchLabel { .. }));
    }

    #[test]
    fn derived_downgrade_requires_invertible_steps() {
        let err = MigrationGraph::build(vec![MigrationUnit::new("a", "drop")
            .upgrade([drop_column("t", "c")])
            .reversible()])
        .expect_err("drop column has no inverse");
        assert!(matches!(err, GraphIntegrityError::NotInvertible { ref revision, .. } if revision == "a"));

        let graph = MigrationGraph::build(vec![MigrationUnit::new("a", "cleanup")
            .upgrade([execute("DELETE FROM t")])
            .irreversible("rows are gone")])
        .expect("irreversible unit should build");
        assert!(graph.is_irreversible("a"));
    }

    #[test]
    fn resolves_targets() {
        let graph = linear();
        assert_eq!(graph.resolve("base").expect("base"), Vec::<&str>::new());
        assert_eq!(graph.resolve("head").expect("head"), ["c"]);
        assert_eq!(graph.resolve("heads").expect("heads"), ["c"]);
        assert_eq!(graph.resolve("b").expect("exact"), ["b"]);
        assert!(matches!(
            graph.resolve("zzz"),
            Err(LedgerError::UnknownRevision(ref rev)) if rev == "zzz"
        ));
    }

    #[test]
    fn resolves_unique_prefixes_only() {
        let graph = MigrationGraph::build(vec![
            unit("ab12", None),
            unit("ab34", Some("ab12")),
            unit("cd56", Some("ab34")),
        ])
        .expect("graph should build");
        assert_eq!(graph.resolve("cd").expect("prefix"), ["cd56"]);
        assert!(matches!(
            graph.resolve("ab"),
            Err(LedgerError::AmbiguousRevision { ref candidates, .. }) if candidates.len() == 2
        ));
    }

    #[test]
    fn head_is_ambiguous_with_several_heads() {
        let graph = MigrationGraph::build(vec![
            unit("a", None),
            unit("b", Some("a")),
            unit("x", Some("a")).branch_label("feature"),
        ])
        .expect("graph should build");
        assert!(matches!(graph.resolve("head"), Err(LedgerError::MultipleHeads(_))));
        assert_eq!(graph.resolve("heads").expect("heads"), ["b", "x"]);
        assert_eq!(graph.resolve("feature@head").expect("label head"), ["x"]);
    }

    #[test]
    fn plans_forward_backward_and_noop() {
        let graph = linear();
        let up = graph.plan(&["a".to_string()], "c").expect("plan up");
        assert_eq!(up.direction, Some(Direction::Upgrade));
        assert_eq!(up.revisions, ["b", "c"]);
        assert_eq!(up.to, ["c"]);

        let down = graph.plan(&["c".to_string()], "a").expect("plan down");
        assert_eq!(down.direction, Some(Direction::Downgrade));
        assert_eq!(down.revisions, ["c", "b"]);
        assert_eq!(down.to, ["a"]);

        let noop = graph.plan(&["c".to_string()], "c").expect("plan noop");
        assert!(noop.is_noop());
        assert_eq!(noop.direction, None);

        let base = graph.plan(&["b".to_string()], "base").expect("plan base");
        assert_eq!(base.revisions, ["b", "a"]);
        assert!(base.to.is_empty());

        let fresh = graph.plan(&[], "heads").expect("plan fresh");
        assert_eq!(fresh.revisions, ["a", "b", "c"]);
    }

    #[test]
    fn plan_rejects_unknown_recorded_version() {
        let graph = linear();
        assert!(matches!(
            graph.plan(&["gone".to_string()], "c"),
            Err(LedgerError::UnknownRevision(ref rev)) if rev == "gone"
        ));
    }

    #[test]
    fn dependencies_are_pulled_in_and_keep_their_head() {
        let graph = MigrationGraph::build(vec![
            unit("a", None),
            unit("b", Some("a")),
            unit("x", None).branch_label("seed"),
            unit("y", Some("x")).depends_on("b"),
        ])
        .expect("graph should build");
        let plan = graph.plan(&[], "seed@head").expect("plan");
        assert_eq!(plan.revisions, ["a", "b", "x", "y"]);
        assert_eq!(plan.to, ["b", "y"]);

        let down = graph
            .plan(&["b".to_string(), "y".to_string()], "a")
            .expect("downgrade below dependency");
        assert_eq!(down.revisions, ["y", "b"]);
        assert_eq!(down.to, ["a", "x"]);

        assert_eq!(graph.ancestors("y").expect("ancestors"), ["a", "b", "x", "y"]);
        assert_eq!(graph.descendants("a").expect("descendants"), ["b", "y"]);
    }
}
