use goodplaces_ledger::{Direction, LedgerError, StoreError};
use goodplaces_migrate::cli::Command;
use goodplaces_migrate::config::Config;
use goodplaces_migrate::error::CliError;
use goodplaces_migrate::output::Output;
use goodplaces_migrations::{BASE_REVISION, HEAD_REVISION};
use rusqlite::Connection;

fn config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = dir
        .path()
        .join("goodplaces.db")
        .to_str()
        .expect("temp path should be utf-8")
        .to_string();
    config
}

fn run(command: Command, config: &Config) -> Result<Output, CliError> {
    goodplaces_migrate::run(&command, config)
}

fn upgrade(target: &str, dry_run: bool) -> Command {
    Command::Upgrade {
        target: target.to_string(),
        dry_run,
    }
}

fn current(config: &Config) -> Vec<String> {
    match run(Command::Current, config).expect("current should succeed") {
        Output::Current { heads, .. } => heads,
        other => panic!("unexpected output: {other:?}"),
    }
}

#[test]
fn upgrade_brings_a_fresh_database_to_head() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);

    let output = run(upgrade("heads", false), &config).expect("upgrade should succeed");
    let Output::Run(report) = output else {
        panic!("expected a run report");
    };
    assert_eq!(report.direction, Some(Direction::Upgrade));
    assert!(report.from.is_empty());
    assert_eq!(report.to, vec![HEAD_REVISION]);
    assert_eq!(report.executed.first().map(String::as_str), Some(BASE_REVISION));
    assert_eq!(current(&config), vec![HEAD_REVISION]);

    let again = run(upgrade("heads", false), &config).expect("second upgrade should succeed");
    assert_eq!(again.to_string(), format!("already at {HEAD_REVISION}"));
}

#[test]
fn dry_run_leaves_the_database_untouched() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);

    let output = run(upgrade(BASE_REVISION, true), &config).expect("dry run should succeed");
    let Output::Plan(plan) = output else {
        panic!("expected a plan");
    };
    assert_eq!(plan.direction, Some(Direction::Upgrade));
    assert_eq!(plan.revisions.len(), 1);
    assert_eq!(plan.revisions[0].revision, BASE_REVISION);
    assert!(current(&config).is_empty());
}

#[test]
fn downgrade_dry_run_marks_irreversible_revisions() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);
    run(upgrade("heads", false), &config).expect("upgrade should succeed");

    let output = run(
        Command::Downgrade {
            target: "064a2159eb7b".to_string(),
            dry_run: true,
        },
        &config,
    )
    .expect("dry run should succeed");
    let Output::Plan(plan) = output else {
        panic!("expected a plan");
    };
    let marked: Vec<&str> = plan
        .revisions
        .iter()
        .filter(|entry| entry.irreversible)
        .map(|entry| entry.revision.as_str())
        .collect();
    assert_eq!(marked, vec!["761e1eabde1d"]);
    assert_eq!(current(&config), vec![HEAD_REVISION]);
}

#[test]
fn dry_run_rejects_the_wrong_direction() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);
    run(upgrade("heads", false), &config).expect("upgrade should succeed");

    let err = run(upgrade(BASE_REVISION, true), &config).expect_err("target is behind");
    assert!(matches!(
        err,
        CliError::Ledger(LedgerError::WrongDirection {
            requested: Direction::Upgrade,
            inferred: Direction::Downgrade,
            ..
        })
    ));
}

#[test]
fn check_reports_pending_revisions_until_upgraded() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);
    run(upgrade(BASE_REVISION, false), &config).expect("partial upgrade should succeed");

    let err = run(Command::Check, &config).expect_err("database is behind");
    let CliError::Pending { current, pending } = err else {
        panic!("expected pending revisions");
    };
    assert_eq!(current, vec![BASE_REVISION]);
    assert_eq!(pending.last().map(String::as_str), Some(HEAD_REVISION));
    assert!(!pending.iter().any(|rev| rev == BASE_REVISION));

    run(upgrade("heads", false), &config).expect("upgrade should succeed");
    let output = run(Command::Check, &config).expect("check should pass at head");
    assert_eq!(output.to_string(), format!("up to date at {HEAD_REVISION}"));
}

#[test]
fn stamp_moves_the_pointer_without_running_steps() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);

    run(
        Command::Stamp {
            target: "head".to_string(),
        },
        &config,
    )
    .expect("stamp should succeed");
    assert_eq!(current(&config), vec![HEAD_REVISION]);

    let conn = Connection::open(&config.database.path).expect("should open database");
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'place'",
            [],
            |row| row.get(0),
        )
        .expect("should count tables");
    assert_eq!(tables, 0, "stamp must not create schema");

    run(
        Command::Stamp {
            target: "base".to_string(),
        },
        &config,
    )
    .expect("stamp to base should succeed");
    assert!(current(&config).is_empty());
}

#[test]
fn unlock_clears_a_crashed_runners_lock() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);
    let conn = Connection::open(&config.database.path).expect("should open database");
    conn.execute_batch(
        "CREATE TABLE _ledger_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            owner TEXT NOT NULL,
            acquired_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        INSERT INTO _ledger_lock (id, owner) VALUES (1, 'crashed-runner');",
    )
    .expect("should plant lock");
    drop(conn);

    let Output::Current { lock, .. } = run(Command::Current, &config).expect("current") else {
        panic!("expected current output");
    };
    assert_eq!(lock.map(|lock| lock.owner).as_deref(), Some("crashed-runner"));

    let err = run(upgrade("heads", false), &config).expect_err("lock is held");
    assert!(matches!(
        err,
        CliError::Ledger(LedgerError::Store(StoreError::LockHeld { .. }))
    ));

    let Output::Unlock { released } = run(Command::Unlock, &config).expect("unlock") else {
        panic!("expected unlock output");
    };
    assert_eq!(released.map(|lock| lock.owner).as_deref(), Some("crashed-runner"));

    let again = run(Command::Unlock, &config).expect("second unlock");
    assert_eq!(again.to_string(), "no lock held");
    run(upgrade("heads", false), &config).expect("upgrade after unlock should succeed");
}

#[test]
fn graph_commands_do_not_create_the_database() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);

    let Output::History { revisions } = run(Command::History, &config).expect("history") else {
        panic!("expected history");
    };
    assert_eq!(revisions.first().map(|info| info.revision.as_str()), Some(HEAD_REVISION));
    assert_eq!(revisions.last().map(|info| info.revision.as_str()), Some(BASE_REVISION));

    let Output::Heads { heads } = run(Command::Heads, &config).expect("heads") else {
        panic!("expected heads");
    };
    assert_eq!(heads.len(), 1);
    assert!(heads[0].is_head);

    let Output::Revision(info) = run(
        Command::Show {
            revision: "761e".to_string(),
        },
        &config,
    )
    .expect("show should resolve a prefix") else {
        panic!("expected a revision");
    };
    assert_eq!(info.revision, "761e1eabde1d");
    assert!(info.irreversible.is_some());
    assert!(!info.upgrade.is_empty());

    assert!(!std::path::Path::new(&config.database.path).exists());
}

#[test]
fn show_rejects_unknown_revisions() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let err = run(
        Command::Show {
            revision: "ffffffffffff".to_string(),
        },
        &config(&dir),
    )
    .expect_err("revision does not exist");
    assert!(matches!(err, CliError::Ledger(LedgerError::UnknownRevision(_))));
}

#[test]
fn json_output_is_tagged_by_command() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = config(&dir);
    let output = run(upgrade("heads", false), &config).expect("upgrade should succeed");

    let json = serde_json::to_value(&output).expect("output should serialize");
    assert_eq!(json["kind"], "run");
    assert_eq!(json["direction"], "upgrade");
    assert_eq!(json["to"][0], HEAD_REVISION);
}
