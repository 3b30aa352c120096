//! Declarative schema primitives.
//!
//! Every migration step that touches the schema is one of the [`SchemaOp`]
//! variants below. Stores decide how each primitive is executed; the ledger
//! only needs to know how to describe a primitive and, where one exists,
//! how to build its structural inverse.

use std::fmt;

use serde::Serialize;

/// Column types understood by every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    /// Unbounded text.
    Text,
    /// Text with a maximum length.
    Varchar(u32),
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Boolean flag.
    Boolean,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// UUID / ULID identifier.
    Uuid,
    /// Timestamp without time zone.
    Timestamp,
    /// Timestamp with time zone.
    TimestampTz,
    /// JSON document.
    Json,
    /// Raw bytes.
    Blob,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("TEXT"),
            Self::Varchar(len) => write!(f, "VARCHAR({len})"),
            Self::Integer => f.write_str("INTEGER"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Float => f.write_str("REAL"),
            Self::Double => f.write_str("DOUBLE PRECISION"),
            Self::Uuid => f.write_str("UUID"),
            Self::Timestamp => f.write_str("TIMESTAMP"),
            Self::TimestampTz => f.write_str("TIMESTAMP WITH TIME ZONE"),
            Self::Json => f.write_str("JSON"),
            Self::Blob => f.write_str("BLOB"),
        }
    }
}

/// Server-side column default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DefaultValue {
    /// `NULL`.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Integer(i64),
    /// String literal.
    Text(String),
    /// The current timestamp at insert time.
    CurrentTimestamp,
    /// Arbitrary SQL expression, emitted in parentheses.
    Expression(String),
}

impl DefaultValue {
    /// Returns `true` if the default is a literal rather than an expression
    /// evaluated per row.
    pub fn is_constant(&self) -> bool {
        !matches!(self, Self::CurrentTimestamp | Self::Expression(_))
    }
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(true) => f.write_str("TRUE"),
            Self::Bool(false) => f.write_str("FALSE"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{}'", value.replace('\'', "''")),
            Self::CurrentTimestamp => f.write_str("CURRENT_TIMESTAMP"),
            Self::Expression(expr) => write!(f, "({expr})"),
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub ty: ColumnType,
    /// Whether `NULL` is allowed.
    pub nullable: bool,
    /// Server default, if any.
    pub default: Option<DefaultValue>,
}

impl Column {
    /// A nullable column without a default.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
        }
    }

    /// Marks the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the server default.
    pub fn default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ty)?;
        if !self.nullable {
            f.write_str(" NOT NULL")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {default}")?;
        }
        Ok(())
    }
}

/// Action taken on referencing rows when the referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ReferentialAction {
    /// No action (the SQL default).
    #[default]
    NoAction,
    /// Refuse the change.
    Restrict,
    /// Propagate the delete/update.
    Cascade,
    /// Set referencing columns to `NULL`.
    SetNull,
    /// Set referencing columns to their default.
    SetDefault,
}

impl ReferentialAction {
    /// SQL keyword sequence for this action.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key from one or more columns to another table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
    /// Behaviour on delete of the referenced row.
    pub on_delete: ReferentialAction,
}

/// Table constraint kinds that can be added or dropped after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConstraintKind {
    /// Foreign key.
    ForeignKey,
    /// Unique constraint.
    Unique,
    /// Check constraint.
    Check,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ForeignKey => "foreign key",
            Self::Unique => "unique",
            Self::Check => "check",
        })
    }
}

/// Body of a table constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConstraintDef {
    /// `FOREIGN KEY (...) REFERENCES ...`.
    ForeignKey(ForeignKey),
    /// `UNIQUE (...)`.
    Unique {
        /// Columns that must be unique together.
        columns: Vec<String>,
    },
    /// `CHECK (...)`.
    Check {
        /// Boolean SQL expression.
        expression: String,
    },
}

/// A table constraint, optionally named.
///
/// Unnamed constraints receive the conventional name from
/// [`Constraint::resolved_name`] so they can be dropped later.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint {
    /// Explicit name.
    pub name: Option<String>,
    /// Constraint body.
    pub def: ConstraintDef,
}

impl Constraint {
    /// The constraint kind.
    pub fn kind(&self) -> ConstraintKind {
        match self.def {
            ConstraintDef::ForeignKey(_) => ConstraintKind::ForeignKey,
            ConstraintDef::Unique { .. } => ConstraintKind::Unique,
            ConstraintDef::Check { .. } => ConstraintKind::Check,
        }
    }

    /// The explicit name, or the conventional one derived from the table
    /// and columns: `{table}_{col}_fkey`, `{table}_{cols}_key`,
    /// `{table}_check`.
    pub fn resolved_name(&self, table: &str) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.def {
            ConstraintDef::ForeignKey(fk) => format!("{table}_{}_fkey", fk.columns.join("_")),
            ConstraintDef::Unique { columns } => format!("{table}_{}_key", columns.join("_")),
            ConstraintDef::Check { .. } => format!("{table}_check"),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{name} ")?;
        }
        match &self.def {
            ConstraintDef::ForeignKey(fk) => write!(
                f,
                "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                fk.columns.join(", "),
                fk.references_table,
                fk.references_columns.join(", "),
                fk.on_delete.as_sql()
            ),
            ConstraintDef::Unique { columns } => write!(f, "UNIQUE ({})", columns.join(", ")),
            ConstraintDef::Check { expression } => write!(f, "CHECK ({expression})"),
        }
    }
}

/// A full table definition used by [`SchemaOp::CreateTable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Primary key columns. Empty means no primary key.
    pub primary_key: Vec<String>,
    /// Table-level constraints.
    pub constraints: Vec<Constraint>,
}

impl Table {
    /// An empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Appends a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a foreign key constraint.
    pub fn foreign_key(
        mut self,
        columns: &[&str],
        references_table: &str,
        references_columns: &[&str],
        on_delete: ReferentialAction,
    ) -> Self {
        self.constraints.push(Constraint {
            name: None,
            def: ConstraintDef::ForeignKey(ForeignKey {
                columns: strings(columns),
                references_table: references_table.to_string(),
                references_columns: strings(references_columns),
                on_delete,
            }),
        });
        self
    }

    /// Adds a unique constraint.
    pub fn unique(mut self, name: Option<&str>, columns: &[&str]) -> Self {
        self.constraints.push(Constraint {
            name: name.map(str::to_string),
            def: ConstraintDef::Unique {
                columns: strings(columns),
            },
        });
        self
    }
}

/// A change applied to an existing column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnChange {
    /// Rename the column.
    Rename {
        /// New column name.
        to: String,
    },
    /// Allow or forbid `NULL`.
    SetNullable(bool),
    /// Replace or remove the server default.
    SetDefault(Option<DefaultValue>),
    /// Change the declared type.
    SetType(ColumnType),
}

/// An index definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// The closed vocabulary of schema and data edits a migration step may use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SchemaOp {
    /// Add a column to an existing table.
    AddColumn {
        /// Target table.
        table: String,
        /// New column.
        column: Column,
    },
    /// Drop a column. Constraints and indexes referencing it go with it.
    DropColumn {
        /// Target table.
        table: String,
        /// Column name.
        column: String,
    },
    /// Create a table.
    CreateTable(Table),
    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Create an index.
    CreateIndex(Index),
    /// Drop an index.
    DropIndex {
        /// Index name.
        name: String,
        /// Table the index belongs to.
        table: String,
    },
    /// Add a table constraint.
    AddConstraint {
        /// Target table.
        table: String,
        /// The constraint.
        constraint: Constraint,
    },
    /// Drop a named table constraint.
    DropConstraint {
        /// Target table.
        table: String,
        /// Constraint name.
        name: String,
        /// Constraint kind.
        kind: ConstraintKind,
    },
    /// Alter an existing column.
    AlterColumn {
        /// Target table.
        table: String,
        /// Column name.
        column: String,
        /// The change.
        change: ColumnChange,
    },
    /// Execute a raw statement, for backfills and cleanups without a
    /// declarative equivalent.
    Execute {
        /// SQL text; may hold several statements.
        sql: String,
    },
}

impl SchemaOp {
    /// The structural inverse of this primitive, if it has one.
    ///
    /// Drops, default and type changes and raw statements lose information
    /// and return `None`; their reverse has to be written by hand.
    pub fn inverse(&self) -> Option<SchemaOp> {
        match self {
            Self::AddColumn { table, column } => Some(Self::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            }),
            Self::CreateTable(def) => Some(Self::DropTable {
                table: def.name.clone(),
            }),
            Self::CreateIndex(index) => Some(Self::DropIndex {
                name: index.name.clone(),
                table: index.table.clone(),
            }),
            Self::AddConstraint { table, constraint } => Some(Self::DropConstraint {
                table: table.clone(),
                name: constraint.resolved_name(table),
                kind: constraint.kind(),
            }),
            Self::AlterColumn {
                table,
                column,
                change: ColumnChange::Rename { to },
            } => Some(Self::AlterColumn {
                table: table.clone(),
                column: to.clone(),
                change: ColumnChange::Rename { to: column.clone() },
            }),
            Self::AlterColumn {
                table,
                column,
                change: ColumnChange::SetNullable(nullable),
            } => Some(Self::AlterColumn {
                table: table.clone(),
                column: column.clone(),
                change: ColumnChange::SetNullable(!nullable),
            }),
            Self::DropColumn { .. }
            | Self::DropTable { .. }
            | Self::DropIndex { .. }
            | Self::DropConstraint { .. }
            | Self::AlterColumn { .. }
            | Self::Execute { .. } => None,
        }
    }

    /// The table this primitive edits, if it edits exactly one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::DropTable { table }
            | Self::DropIndex { table, .. }
            | Self::AddConstraint { table, .. }
            | Self::DropConstraint { table, .. }
            | Self::AlterColumn { table, .. } => Some(table),
            Self::CreateTable(def) => Some(&def.name),
            Self::CreateIndex(index) => Some(&index.table),
            Self::Execute { .. } => None,
        }
    }
}

impl fmt::Display for SchemaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddColumn { table, column } => write!(f, "add column {table}.{column}"),
            Self::DropColumn { table, column } => write!(f, "drop column {table}.{column}"),
            Self::CreateTable(def) => write!(f, "create table {}", def.name),
            Self::DropTable { table } => write!(f, "drop table {table}"),
            Self::CreateIndex(index) => write!(
                f,
                "create {}index {} on {} ({})",
                if index.unique { "unique " } else { "" },
                index.name,
                index.table,
                index.columns.join(", ")
            ),
            Self::DropIndex { name, table } => write!(f, "drop index {name} on {table}"),
            Self::AddConstraint { table, constraint } => write!(
                f,
                "add {} constraint {} on {table}",
                constraint.kind(),
                constraint.resolved_name(table)
            ),
            Self::DropConstraint { table, name, kind } => {
                write!(f, "drop {kind} constraint {name} on {table}")
            }
            Self::AlterColumn {
                table,
                column,
                change,
            } => match change {
                ColumnChange::Rename { to } => write!(f, "rename column {table}.{column} to {to}"),
                ColumnChange::SetNullable(true) => write!(f, "drop not null on {table}.{column}"),
                ColumnChange::SetNullable(false) => write!(f, "set not null on {table}.{column}"),
                ColumnChange::SetDefault(Some(default)) => {
                    write!(f, "set default {default} on {table}.{column}")
                }
                ColumnChange::SetDefault(None) => write!(f, "drop default on {table}.{column}"),
                ColumnChange::SetType(ty) => write!(f, "set type {ty} on {table}.{column}"),
            },
            Self::Execute { sql } => {
                let first = sql.trim().lines().next().unwrap_or_default();
                write!(f, "execute `{}`", first.trim())
            }
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// `ALTER TABLE ... ADD COLUMN`.
pub fn add_column(table: &str, column: Column) -> SchemaOp {
    SchemaOp::AddColumn {
        table: table.to_string(),
        column,
    }
}

/// `ALTER TABLE ... DROP COLUMN`.
pub fn drop_column(table: &str, column: &str) -> SchemaOp {
    SchemaOp::DropColumn {
        table: table.to_string(),
        column: column.to_string(),
    }
}

/// `CREATE TABLE`.
pub fn create_table(table: Table) -> SchemaOp {
    SchemaOp::CreateTable(table)
}

/// `DROP TABLE`.
pub fn drop_table(table: &str) -> SchemaOp {
    SchemaOp::DropTable {
        table: table.to_string(),
    }
}

/// `CREATE INDEX`.
pub fn create_index(name: &str, table: &str, columns: &[&str]) -> SchemaOp {
    SchemaOp::CreateIndex(Index {
        name: name.to_string(),
        table: table.to_string(),
        columns: strings(columns),
        unique: false,
    })
}

/// `CREATE UNIQUE INDEX`.
pub fn create_unique_index(name: &str, table: &str, columns: &[&str]) -> SchemaOp {
    SchemaOp::CreateIndex(Index {
        name: name.to_string(),
        table: table.to_string(),
        columns: strings(columns),
        unique: true,
    })
}

/// `DROP INDEX`.
pub fn drop_index(name: &str, table: &str) -> SchemaOp {
    SchemaOp::DropIndex {
        name: name.to_string(),
        table: table.to_string(),
    }
}

/// Adds a foreign key. `None` as name yields `{table}_{col}_fkey`.
pub fn create_foreign_key(
    name: Option<&str>,
    table: &str,
    references_table: &str,
    columns: &[&str],
    references_columns: &[&str],
    on_delete: ReferentialAction,
) -> SchemaOp {
    SchemaOp::AddConstraint {
        table: table.to_string(),
        constraint: Constraint {
            name: name.map(str::to_string),
            def: ConstraintDef::ForeignKey(ForeignKey {
                columns: strings(columns),
                references_table: references_table.to_string(),
                references_columns: strings(references_columns),
                on_delete,
            }),
        },
    }
}

/// Adds a unique constraint.
pub fn create_unique_constraint(name: &str, table: &str, columns: &[&str]) -> SchemaOp {
    SchemaOp::AddConstraint {
        table: table.to_string(),
        constraint: Constraint {
            name: Some(name.to_string()),
            def: ConstraintDef::Unique {
                columns: strings(columns),
            },
        },
    }
}

/// Adds a check constraint.
pub fn create_check_constraint(name: &str, table: &str, expression: &str) -> SchemaOp {
    SchemaOp::AddConstraint {
        table: table.to_string(),
        constraint: Constraint {
            name: Some(name.to_string()),
            def: ConstraintDef::Check {
                expression: expression.to_string(),
            },
        },
    }
}

/// Drops a named constraint.
pub fn drop_constraint(name: &str, table: &str, kind: ConstraintKind) -> SchemaOp {
    SchemaOp::DropConstraint {
        table: table.to_string(),
        name: name.to_string(),
        kind,
    }
}

/// Renames a column.
pub fn rename_column(table: &str, column: &str, to: &str) -> SchemaOp {
    SchemaOp::AlterColumn {
        table: table.to_string(),
        column: column.to_string(),
        change: ColumnChange::Rename { to: to.to_string() },
    }
}

/// Allows or forbids `NULL` in a column.
pub fn alter_nullable(table: &str, column: &str, nullable: bool) -> SchemaOp {
    SchemaOp::AlterColumn {
        table: table.to_string(),
        column: column.to_string(),
        change: ColumnChange::SetNullable(nullable),
    }
}

/// Replaces (or with `None`, removes) a column default.
pub fn alter_default(table: &str, column: &str, default: Option<DefaultValue>) -> SchemaOp {
    SchemaOp::AlterColumn {
        table: table.to_string(),
        column: column.to_string(),
        change: ColumnChange::SetDefault(default),
    }
}

/// Changes a column's declared type.
pub fn alter_type(table: &str, column: &str, ty: ColumnType) -> SchemaOp {
    SchemaOp::AlterColumn {
        table: table.to_string(),
        column: column.to_string(),
        change: ColumnChange::SetType(ty),
    }
}

/// Executes raw SQL.
pub fn execute(sql: &str) -> SchemaOp {
    SchemaOp::Execute {
        sql: sql.to_string(),
    }
}
