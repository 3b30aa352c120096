//! Command execution.

use goodplaces_db::{create_pool, force_unlock, SqliteStore};
use goodplaces_ledger::{Direction, LedgerError, MigrationGraph, Plan, RunOptions, Runner, HEADS};
use rusqlite::Connection;

use crate::cli::Command;
use crate::config::Config;
use crate::error::CliError;
use crate::output::{LockOutput, Output, PlanOutput, PlannedRevision, RevisionInfo};

/// Runs `command` against the database named in `config`.
///
/// `history`, `heads` and `show` only read the graph and never open the
/// database.
///
/// # Errors
///
/// Returns a [`CliError`] for pool, ledger and store failures, and
/// [`CliError::Pending`] when `check` finds unapplied revisions.
pub fn execute(
    command: &Command,
    config: &Config,
    graph: &MigrationGraph,
) -> Result<Output, CliError> {
    match command {
        Command::History => return Ok(history(graph)),
        Command::Heads => return Ok(heads(graph)),
        Command::Show { revision } => return show(graph, revision),
        _ => {}
    }

    let pool = create_pool(&config.database.path, config.database.runtime_settings())?;
    let mut conn = pool.get()?;
    tracing::debug!(path = %config.database.path, "opened database");
    execute_on(command, config.ledger.run_options(), graph, &mut conn)
}

/// Runs `command` on an open connection.
///
/// # Errors
///
/// As [`execute`].
pub fn execute_on(
    command: &Command,
    options: RunOptions,
    graph: &MigrationGraph,
    conn: &mut Connection,
) -> Result<Output, CliError> {
    let output = match command {
        Command::History => history(graph),
        Command::Heads => heads(graph),
        Command::Show { revision } => return show(graph, revision),
        Command::Upgrade { target, dry_run: true } => {
            let plan = runner(graph, conn, options).plan(target)?;
            Output::Plan(dry_run(graph, plan, target, Direction::Upgrade)?)
        }
        Command::Upgrade { target, .. } => {
            Output::Run(runner(graph, conn, options).upgrade(target)?)
        }
        Command::Downgrade { target, dry_run: true } => {
            let plan = runner(graph, conn, options).plan(target)?;
            Output::Plan(dry_run(graph, plan, target, Direction::Downgrade)?)
        }
        Command::Downgrade { target, .. } => {
            Output::Run(runner(graph, conn, options).downgrade(target)?)
        }
        Command::Stamp { target } => Output::Stamp(runner(graph, conn, options).stamp(target)?),
        Command::Current => {
            let lock = SqliteStore::new(conn).lock_holder()?.map(LockOutput::from);
            let heads = runner(graph, conn, options).current()?;
            Output::Current { heads, lock }
        }
        Command::Check => {
            let plan = runner(graph, conn, options).plan(HEADS)?;
            if !plan.is_noop() {
                return Err(CliError::Pending {
                    current: plan.from,
                    pending: plan.revisions,
                });
            }
            Output::Check { heads: plan.from }
        }
        Command::Unlock => {
            let released = force_unlock(conn)?;
            match &released {
                Some(holder) => tracing::warn!(
                    owner = %holder.owner,
                    since = %holder.acquired_at,
                    "cleared migration lock"
                ),
                None => tracing::info!("no migration lock to clear"),
            }
            Output::Unlock {
                released: released.map(LockOutput::from),
            }
        }
    };
    Ok(output)
}

fn runner<'a>(
    graph: &'a MigrationGraph,
    conn: &'a mut Connection,
    options: RunOptions,
) -> Runner<'a, SqliteStore<'a>> {
    Runner::with_options(graph, SqliteStore::new(conn), options)
}

fn history(graph: &MigrationGraph) -> Output {
    Output::History {
        revisions: graph
            .history()
            .map(|unit| RevisionInfo::summary(graph, unit))
            .collect(),
    }
}

fn heads(graph: &MigrationGraph) -> Output {
    Output::Heads {
        heads: graph
            .heads()
            .into_iter()
            .filter_map(|rev| graph.get(rev))
            .map(|unit| RevisionInfo::summary(graph, unit))
            .collect(),
    }
}

/// `show` accepts a revision or a prefix naming exactly one revision.
fn show(graph: &MigrationGraph, revision: &str) -> Result<Output, CliError> {
    let resolved = graph.resolve(revision)?;
    let unit = match resolved.as_slice() {
        [single] => graph.get(single),
        _ => None,
    }
    .ok_or_else(|| LedgerError::UnknownRevision(revision.to_string()))?;
    Ok(Output::Revision(RevisionInfo::detailed(graph, unit)))
}

fn dry_run(
    graph: &MigrationGraph,
    plan: Plan,
    target: &str,
    requested: Direction,
) -> Result<PlanOutput, LedgerError> {
    if let Some(inferred) = plan.direction.filter(|&inferred| inferred != requested) {
        return Err(LedgerError::WrongDirection {
            target: target.to_string(),
            requested,
            inferred,
        });
    }

    let revisions = plan
        .revisions
        .iter()
        .map(|revision| PlannedRevision {
            revision: revision.clone(),
            message: graph
                .get(revision)
                .map(|unit| unit.message().to_string())
                .unwrap_or_default(),
            irreversible: requested == Direction::Downgrade && graph.is_irreversible(revision),
        })
        .collect();

    Ok(PlanOutput {
        direction: plan.direction,
        from: plan.from,
        to: plan.to,
        revisions,
    })
}
