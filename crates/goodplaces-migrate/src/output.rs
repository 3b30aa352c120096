//! Command results, rendered as text or JSON.

use std::fmt;

use goodplaces_db::LockInfo;
use goodplaces_ledger::{Direction, Downgrade, MigrationGraph, MigrationUnit, RunReport, Step};
use serde::Serialize;

/// The result of a command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    /// An upgrade or downgrade ran.
    Run(RunReport),
    /// A dry run.
    Plan(PlanOutput),
    /// The version pointer was rewritten.
    Stamp(RunReport),
    /// Recorded heads and the current lock holder.
    Current {
        /// Recorded heads; empty at base.
        heads: Vec<String>,
        /// The lock holder, if a run is in progress or crashed.
        lock: Option<LockOutput>,
    },
    /// Every revision, newest first.
    History {
        /// The revisions.
        revisions: Vec<RevisionInfo>,
    },
    /// The head revisions.
    Heads {
        /// The heads.
        heads: Vec<RevisionInfo>,
    },
    /// One revision in detail.
    Revision(RevisionInfo),
    /// The database is at the latest revision.
    Check {
        /// Recorded heads.
        heads: Vec<String>,
    },
    /// Result of clearing the lock.
    Unlock {
        /// The holder that was cleared, if there was one.
        released: Option<LockOutput>,
    },
}

/// A lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockOutput {
    /// Recorded owner.
    pub owner: String,
    /// When the lock was taken.
    pub acquired_at: String,
}

impl From<LockInfo> for LockOutput {
    fn from(info: LockInfo) -> Self {
        Self {
            owner: info.owner,
            acquired_at: info.acquired_at,
        }
    }
}

/// A plan with revision messages attached.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutput {
    /// Direction of travel; `None` when there is nothing to do.
    pub direction: Option<Direction>,
    /// Heads recorded now.
    pub from: Vec<String>,
    /// Heads recorded after the run.
    pub to: Vec<String>,
    /// Revisions in execution order.
    pub revisions: Vec<PlannedRevision>,
}

/// One entry of a [`PlanOutput`].
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRevision {
    pub revision: String,
    pub message: String,
    /// Set for downgrades past an irreversible revision.
    pub irreversible: bool,
}

/// Description of a revision.
#[derive(Debug, Clone, Serialize)]
pub struct RevisionInfo {
    pub revision: String,
    pub message: String,
    pub down_revisions: Vec<String>,
    pub branch_labels: Vec<String>,
    pub depends_on: Vec<String>,
    pub is_head: bool,
    /// Set when the revision joins several parents.
    pub is_merge: bool,
    /// Why the revision cannot be reverted, if it cannot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irreversible: Option<String>,
    /// Tables the upgrade edits, in first-touched order. Only filled in by
    /// `show`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,
    /// Upgrade step descriptions. Only filled in by `show`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upgrade: Vec<String>,
    /// Downgrade step descriptions. Only filled in by `show`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub downgrade: Vec<String>,
}

impl RevisionInfo {
    /// Summary without steps.
    pub fn summary(graph: &MigrationGraph, unit: &MigrationUnit) -> Self {
        let irreversible = match unit.downgrade_kind() {
            Downgrade::Irreversible { reason } => Some(reason.clone()),
            Downgrade::Steps(_) | Downgrade::Inverse => None,
        };
        Self {
            revision: unit.revision().to_string(),
            message: unit.message().to_string(),
            down_revisions: unit.down_revisions().to_vec(),
            branch_labels: unit.branch_labels().to_vec(),
            depends_on: unit.dependencies().to_vec(),
            is_head: graph.children(unit.revision()).is_empty(),
            is_merge: unit.is_merge(),
            irreversible,
            tables: Vec::new(),
            upgrade: Vec::new(),
            downgrade: Vec::new(),
        }
    }

    /// Summary plus upgrade and downgrade steps.
    pub fn detailed(graph: &MigrationGraph, unit: &MigrationUnit) -> Self {
        let describe =
            |steps: &[Step]| -> Vec<String> { steps.iter().map(ToString::to_string).collect() };
        let downgrade = match unit.downgrade_kind() {
            Downgrade::Steps(steps) => describe(steps),
            Downgrade::Inverse => unit
                .upgrade_steps()
                .iter()
                .rev()
                .filter_map(Step::inverse)
                .map(|step| step.to_string())
                .collect(),
            Downgrade::Irreversible { .. } => Vec::new(),
        };
        let mut tables: Vec<String> = Vec::new();
        for step in unit.upgrade_steps() {
            if let Step::Schema(op) = step {
                if let Some(table) = op.table().filter(|t| !tables.iter().any(|seen| seen == t)) {
                    tables.push(table.to_string());
                }
            }
        }
        Self {
            tables,
            upgrade: describe(unit.upgrade_steps()),
            downgrade,
            ..Self::summary(graph, unit)
        }
    }
}

fn list(revisions: &[String]) -> String {
    if revisions.is_empty() {
        "base".to_string()
    } else {
        revisions.join(", ")
    }
}

fn write_lock(f: &mut fmt::Formatter<'_>, lock: &LockOutput) -> fmt::Result {
    write!(f, "locked by {} since {}", lock.owner, lock.acquired_at)
}

impl fmt::Display for RevisionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parents = if self.down_revisions.is_empty() {
            "<base>".to_string()
        } else {
            self.down_revisions.join(", ")
        };
        write!(f, "{parents} -> {}", self.revision)?;
        if self.is_head {
            f.write_str(" (head)")?;
        }
        if self.is_merge {
            f.write_str(" (merge)")?;
        }
        if !self.branch_labels.is_empty() {
            write!(f, " ({})", self.branch_labels.join(", "))?;
        }
        if self.irreversible.is_some() {
            f.write_str(" (irreversible)")?;
        }
        write!(f, ", {}", self.message)
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(report) => {
                let Some(direction) = report.direction else {
                    return write!(f, "already at {}", list(&report.to));
                };
                writeln!(f, "{direction} {} -> {}", list(&report.from), list(&report.to))?;
                for revision in &report.executed {
                    writeln!(f, "  ran {revision}")?;
                }
                for revision in &report.irreversible {
                    writeln!(f, "  passed irreversible {revision}; nothing was reverted")?;
                }
                Ok(())
            }
            Self::Plan(plan) => {
                let Some(direction) = plan.direction else {
                    return write!(f, "nothing to do; already at {}", list(&plan.to));
                };
                writeln!(
                    f,
                    "would {direction} {} -> {}",
                    list(&plan.from),
                    list(&plan.to)
                )?;
                for entry in &plan.revisions {
                    write!(f, "  {} {}", entry.revision, entry.message)?;
                    if entry.irreversible {
                        f.write_str(" (irreversible, skipped)")?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            Self::Stamp(report) => {
                write!(f, "stamped {} -> {}", list(&report.from), list(&report.to))
            }
            Self::Current { heads, lock } => {
                write!(f, "{}", list(heads))?;
                if let Some(lock) = lock {
                    f.write_str(" (")?;
                    write_lock(f, lock)?;
                    f.write_str(")")?;
                }
                Ok(())
            }
            Self::History { revisions } => {
                for info in revisions {
                    writeln!(f, "{info}")?;
                }
                Ok(())
            }
            Self::Heads { heads } => {
                for info in heads {
                    writeln!(f, "{} {}", info.revision, info.message)?;
                }
                Ok(())
            }
            Self::Revision(info) => {
                writeln!(f, "Revision: {}", info.revision)?;
                writeln!(f, "Message: {}", info.message)?;
                writeln!(f, "Parents: {}", list(&info.down_revisions))?;
                if !info.branch_labels.is_empty() {
                    writeln!(f, "Branch labels: {}", info.branch_labels.join(", "))?;
                }
                if !info.depends_on.is_empty() {
                    writeln!(f, "Depends on: {}", info.depends_on.join(", "))?;
                }
                if !info.tables.is_empty() {
                    writeln!(f, "Tables: {}", info.tables.join(", "))?;
                }
                writeln!(f, "Upgrade:")?;
                for step in &info.upgrade {
                    writeln!(f, "  {step}")?;
                }
                match &info.irreversible {
                    Some(reason) => writeln!(f, "Downgrade: irreversible ({reason})"),
                    None => {
                        writeln!(f, "Downgrade:")?;
                        for step in &info.downgrade {
                            writeln!(f, "  {step}")?;
                        }
                        Ok(())
                    }
                }
            }
            Self::Check { heads } => write!(f, "up to date at {}", list(heads)),
            Self::Unlock { released } => match released {
                Some(lock) => {
                    f.write_str("released lock; was ")?;
                    write_lock(f, lock)
                }
                None => f.write_str("no lock held"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goodplaces_ledger::ops::{add_column, execute, Column, ColumnType};

    fn graph() -> MigrationGraph {
        MigrationGraph::build(vec![
            MigrationUnit::new("aaa111", "create things")
                .upgrade([execute("CREATE TABLE t (a)")])
                .irreversible("raw sql"),
            MigrationUnit::new("bbb222", "add b")
                .revises("aaa111")
                .upgrade([add_column("t", Column::new("b", ColumnType::Text))]),
        ])
        .expect("graph should build")
    }

    #[test]
    fn history_lines_show_parents_and_markers() {
        let graph = graph();
        let lines: Vec<String> = graph
            .history()
            .map(|unit| RevisionInfo::summary(&graph, unit).to_string())
            .collect();
        assert_eq!(
            lines,
            vec![
                "aaa111 -> bbb222 (head), add b",
                "<base> -> aaa111 (irreversible), create things",
            ]
        );
    }

    #[test]
    fn detailed_info_derives_inverse_steps() {
        let graph = graph();
        let unit = graph.get("bbb222").expect("unit should exist");
        let info = RevisionInfo::detailed(&graph, unit);
        assert_eq!(info.upgrade, vec!["add column t.b TEXT"]);
        assert_eq!(info.downgrade, vec!["drop column t.b"]);
    }

    #[test]
    fn merge_revisions_are_marked() {
        let graph = MigrationGraph::build(vec![
            MigrationUnit::new("root", "root"),
            MigrationUnit::new("left", "left").revises("root").branch_label("left"),
            MigrationUnit::new("right", "right").revises("root").branch_label("right"),
            MigrationUnit::new("joined", "join branches").merges(["left", "right"]),
        ])
        .expect("graph should build");
        let joined = graph.get("joined").expect("unit should exist");
        let info = RevisionInfo::summary(&graph, joined);
        assert!(info.is_merge);
        assert_eq!(info.to_string(), "left, right -> joined (head) (merge), join branches");
        let left = graph.get("left").expect("unit should exist");
        assert!(!RevisionInfo::summary(&graph, left).is_merge);
    }

    #[test]
    fn detailed_info_lists_touched_tables_once() {
        let graph = MigrationGraph::build(vec![MigrationUnit::new("ccc333", "widen t")
            .upgrade([
                add_column("t", Column::new("c", ColumnType::Text)),
                execute("UPDATE t SET c = 'x'"),
                add_column("u", Column::new("d", ColumnType::Text)),
                add_column("t", Column::new("e", ColumnType::Text)),
            ])
            .irreversible("raw sql")])
        .expect("graph should build");
        let unit = graph.get("ccc333").expect("unit should exist");
        let info = RevisionInfo::detailed(&graph, unit);
        assert_eq!(info.tables, vec!["t", "u"]);
        assert!(RevisionInfo::summary(&graph, unit).tables.is_empty());
    }

    #[test]
    fn outputs_are_tagged_in_json() {
        let output = Output::Unlock {
            released: Some(LockOutput {
                owner: "deploy".into(),
                acquired_at: "2024-01-01 00:00:00".into(),
            }),
        };
        let json = serde_json::to_value(&output).expect("should serialize");
        assert_eq!(json["kind"], "unlock");
        assert_eq!(json["released"]["owner"], "deploy");
        assert_eq!(
            output.to_string(),
            "released lock; was locked by deploy since 2024-01-01 00:00:00"
        );
    }

    #[test]
    fn noop_run_reads_as_already_at_target() {
        let output = Output::Run(RunReport {
            direction: None,
            from: vec!["bbb222".into()],
            to: vec!["bbb222".into()],
            executed: Vec::new(),
            irreversible: Vec::new(),
        });
        assert_eq!(output.to_string(), "already at bbb222");
    }
}
