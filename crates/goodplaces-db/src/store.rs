//! [`Store`] implementation over a rusqlite connection.

use goodplaces_ledger::ops::{ColumnChange, SchemaOp};
use goodplaces_ledger::{DataAccess, SqlValue, Store, StoreError, StoreTransaction};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension};

use crate::rebuild::{rebuild_table, Change};
use crate::render;

/// Table holding one row per applied head.
pub const VERSION_TABLE: &str = "_ledger_version";

/// Single-row table backing the advisory lock.
pub const LOCK_TABLE: &str = "_ledger_lock";

/// The holder of the migration lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// Owner recorded when the lock was taken.
    pub owner: String,
    /// Acquisition time (UTC, SQLite `datetime` format).
    pub acquired_at: String,
}

/// A migration store backed by a SQLite connection.
#[derive(Debug)]
pub struct SqliteStore<'c> {
    conn: &'c mut Connection,
    /// `PRAGMA foreign_keys` before the lock was taken.
    foreign_keys: Option<bool>,
}

impl<'c> SqliteStore<'c> {
    /// Wraps a connection.
    pub fn new(conn: &'c mut Connection) -> Self {
        Self {
            conn,
            foreign_keys: None,
        }
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &Connection {
        &*self.conn
    }

    /// Current lock holder, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the lock table cannot be read.
    pub fn lock_holder(&self) -> Result<Option<LockInfo>, StoreError> {
        lock_holder(&*self.conn)
    }
}

impl Store for SqliteStore<'_> {
    type Transaction<'a> = SqliteTransaction<'a> where Self: 'a;

    fn read_versions(&mut self) -> Result<Vec<String>, StoreError> {
        if !table_exists(&*self.conn, VERSION_TABLE)? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT version_num FROM {VERSION_TABLE} ORDER BY rowid"
            ))
            .map_err(StoreError::backend)?;
        let versions = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;
        Ok(versions)
    }

    fn begin(&mut self) -> Result<SqliteTransaction<'_>, StoreError> {
        let tx = self.conn.transaction().map_err(StoreError::backend)?;
        Ok(SqliteTransaction { tx })
    }

    fn acquire_lock(&mut self, owner: &str) -> Result<(), StoreError> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    owner TEXT NOT NULL,
                    acquired_at TEXT NOT NULL DEFAULT (datetime('now'))
                );"
            ))
            .map_err(StoreError::backend)?;

        let inserted = self.conn.execute(
            &format!("INSERT INTO {LOCK_TABLE} (id, owner) VALUES (1, ?1)"),
            [owner],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                let holder = lock_holder(&*self.conn)?.unwrap_or_else(|| LockInfo {
                    owner: "unknown".to_string(),
                    acquired_at: "unknown".to_string(),
                });
                return Err(StoreError::LockHeld {
                    owner: holder.owner,
                    since: holder.acquired_at,
                });
            }
            Err(err) => return Err(StoreError::backend(err)),
        }

        if let Err(err) = self.disable_foreign_keys() {
            if let Err(cleanup) = delete_lock_row(&*self.conn, owner) {
                tracing::warn!(owner, error = %cleanup, "failed to remove lock row after setup failure");
            }
            return Err(err);
        }
        Ok(())
    }

    fn release_lock(&mut self, owner: &str) -> Result<(), StoreError> {
        // Both steps always run; the first failure is reported.
        let restored = match self.foreign_keys.take() {
            Some(enforced) => self
                .conn
                .execute_batch(&format!(
                    "PRAGMA foreign_keys = {};",
                    if enforced { "ON" } else { "OFF" }
                ))
                .map_err(StoreError::backend),
            None => Ok(()),
        };
        let deleted = delete_lock_row(&*self.conn, owner);
        restored.and(deleted)
    }
}

impl SqliteStore<'_> {
    fn disable_foreign_keys(&mut self) -> Result<(), StoreError> {
        let enforced: bool = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .map_err(StoreError::backend)?;
        self.foreign_keys = Some(enforced);
        self.conn
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .map_err(StoreError::backend)
    }
}

fn delete_lock_row(conn: &Connection, owner: &str) -> Result<(), StoreError> {
    conn.execute(
        &format!("DELETE FROM {LOCK_TABLE} WHERE id = 1 AND owner = ?1"),
        [owner],
    )
    .map(|_| ())
    .map_err(StoreError::backend)
}

/// Clears the migration lock whoever holds it, returning the previous
/// holder. For locks left behind by a crashed run.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] on SQLite failures.
pub fn force_unlock(conn: &Connection) -> Result<Option<LockInfo>, StoreError> {
    let holder = lock_holder(conn)?;
    if holder.is_some() {
        conn.execute(&format!("DELETE FROM {LOCK_TABLE}"), [])
            .map_err(StoreError::backend)?;
    }
    Ok(holder)
}

fn lock_holder(conn: &Connection) -> Result<Option<LockInfo>, StoreError> {
    if !table_exists(conn, LOCK_TABLE)? {
        return Ok(None);
    }
    conn.query_row(
        &format!("SELECT owner, acquired_at FROM {LOCK_TABLE} WHERE id = 1"),
        [],
        |row| {
            Ok(LockInfo {
                owner: row.get(0)?,
                acquired_at: row.get(1)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::backend)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
    .map_err(StoreError::backend)
}

/// An open SQLite transaction. Rolls back when dropped.
#[derive(Debug)]
pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl SqliteTransaction<'_> {
    fn rebuild(&self, table: &str, change: Change<'_>) -> Result<(), StoreError> {
        rebuild_table(&self.tx, table, change)
    }

    fn run(&self, sql: &str) -> Result<(), StoreError> {
        tracing::debug!(sql, "executing");
        self.tx.execute_batch(sql).map_err(StoreError::backend)
    }

    fn require_table(&self, table: &str) -> Result<(), StoreError> {
        if table_exists(&self.tx, table)? {
            Ok(())
        } else {
            Err(StoreError::TableNotFound(table.to_string()))
        }
    }
}

impl DataAccess for SqliteTransaction<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, StoreError> {
        tracing::debug!(sql, params = params.len(), "data statement");
        self.tx
            .execute(sql, params_from_iter(params.iter().map(to_value)))
            .map_err(StoreError::backend)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Vec<SqlValue>>, StoreError> {
        tracing::debug!(sql, params = params.len(), "data query");
        let mut stmt = self.tx.prepare(sql).map_err(StoreError::backend)?;
        let width = stmt.column_count();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_value)))
            .map_err(StoreError::backend)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(StoreError::backend)? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(from_value_ref(row.get_ref(idx).map_err(StoreError::backend)?));
            }
            out.push(values);
        }
        Ok(out)
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn apply(&mut self, op: &SchemaOp) -> Result<(), StoreError> {
        match op {
            SchemaOp::CreateTable(table) => self.run(&render::create_table(table)),
            SchemaOp::DropTable { table } => {
                self.require_table(table)?;
                self.run(&render::drop_table(table))
            }
            SchemaOp::CreateIndex(index) => {
                self.require_table(&index.table)?;
                self.run(&render::create_index(index))
            }
            SchemaOp::DropIndex { name, .. } => self.run(&render::drop_index(name)),
            SchemaOp::AddColumn { table, column } => {
                self.require_table(table)?;
                let native = column.default.as_ref().map_or(column.nullable, |default| {
                    default.is_constant()
                });
                if native {
                    self.run(&render::add_column(table, column))
                } else {
                    self.rebuild(table, Change::AddColumn(column))
                }
            }
            SchemaOp::DropColumn { table, column } => {
                self.rebuild(table, Change::DropColumn(column))
            }
            SchemaOp::AddConstraint { table, constraint } => {
                self.rebuild(table, Change::AddConstraint(constraint))
            }
            SchemaOp::DropConstraint { table, name, kind } => self.rebuild(
                table,
                Change::DropConstraint {
                    name,
                    kind: *kind,
                },
            ),
            SchemaOp::AlterColumn {
                table,
                column,
                change: ColumnChange::Rename { to },
            } => {
                self.require_table(table)?;
                self.run(&render::rename_column(table, column, to))
            }
            SchemaOp::AlterColumn {
                table,
                column,
                change,
            } => self.rebuild(table, Change::AlterColumn { column, change }),
            SchemaOp::Execute { sql } => self.run(sql),
        }
    }

    fn write_versions(&mut self, heads: &[String]) -> Result<(), StoreError> {
        self.tx
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {VERSION_TABLE} (
                    version_num TEXT NOT NULL PRIMARY KEY
                );
                DELETE FROM {VERSION_TABLE};"
            ))
            .map_err(StoreError::backend)?;
        for head in heads {
            self.tx
                .execute(
                    &format!("INSERT INTO {VERSION_TABLE} (version_num) VALUES (?1)"),
                    [head],
                )
                .map_err(StoreError::backend)?;
        }
        Ok(())
    }

    fn check_integrity(&mut self) -> Result<(), StoreError> {
        let mut stmt = self
            .tx
            .prepare("PRAGMA foreign_key_check")
            .map_err(StoreError::backend)?;
        let violations = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;

        match violations.first() {
            None => Ok(()),
            Some((table, rowid, parent)) => Err(StoreError::Integrity(format!(
                "{} foreign key violation(s); first: {table} row {} references missing {parent} row",
                violations.len(),
                rowid.map_or_else(|| "?".to_string(), |id| id.to_string())
            ))),
        }
    }

    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(StoreError::backend)
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}
