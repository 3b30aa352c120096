//! Table rebuilds for changes SQLite cannot make with `ALTER TABLE`.
//!
//! Follows the procedure from the SQLite documentation: create the new
//! table under a temporary name, copy the rows, drop the old table, rename
//! the new one and recreate the indexes and triggers. Foreign key
//! enforcement must be off while this runs; the store switches it off for
//! the whole migration run.

use goodplaces_ledger::ops::{Column, ColumnChange, Constraint, ConstraintKind};
use goodplaces_ledger::StoreError;
use rusqlite::{Connection, OptionalExtension};

use crate::render;

/// A change that needs a rebuild.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Change<'a> {
    AddColumn(&'a Column),
    DropColumn(&'a str),
    AddConstraint(&'a Constraint),
    DropConstraint {
        name: &'a str,
        kind: ConstraintKind,
    },
    AlterColumn {
        column: &'a str,
        change: &'a ColumnChange,
    },
}

/// One comma-separated item of a `CREATE TABLE` body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Column {
        name: String,
        text: String,
    },
    Constraint {
        name: Option<String>,
        /// `None` for `PRIMARY KEY`.
        kind: Option<ConstraintKind>,
        /// Columns of this table the constraint mentions.
        columns: Vec<String>,
        text: String,
    },
}

impl Item {
    fn text(&self) -> &str {
        match self {
            Self::Column { text, .. } | Self::Constraint { text, .. } => text,
        }
    }
}

/// A parsed `CREATE TABLE` statement.
#[derive(Debug)]
struct Layout {
    items: Vec<Item>,
    /// Table options after the closing parenthesis, such as `WITHOUT ROWID`.
    options: String,
}

/// Column metadata from `PRAGMA table_info`.
#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    ty: String,
    not_null: bool,
    default: Option<String>,
    primary_key: bool,
}

/// Rebuilds `table` with `change` applied.
pub(crate) fn rebuild_table(
    conn: &Connection,
    table: &str,
    change: Change<'_>,
) -> Result<(), StoreError> {
    let sql = table_sql(conn, table)?;
    let mut layout = parse_create_table(&sql).ok_or_else(|| {
        StoreError::Data(format!("cannot parse definition of table '{table}'"))
    })?;
    let info = table_info(conn, table)?;
    let old_columns: Vec<String> = info.iter().map(|col| col.name.clone()).collect();

    let mut dropped: Option<&str> = None;
    match change {
        Change::AddColumn(column) => {
            // Column definitions must precede table constraints.
            let at = layout
                .items
                .iter()
                .position(|item| matches!(item, Item::Constraint { .. }))
                .unwrap_or(layout.items.len());
            layout.items.insert(
                at,
                Item::Column {
                    name: column.name.clone(),
                    text: render::column_def(column),
                },
            );
        }
        Change::DropColumn(column) => {
            require_column(&info, table, column)?;
            layout.items.retain(|item| match item {
                Item::Column { name, .. } => !name.eq_ignore_ascii_case(column),
                Item::Constraint { columns, text, .. } => {
                    let keep = !contains(columns, column);
                    if !keep {
                        tracing::debug!(table, column, constraint = text.as_str(), "dropping constraint with column");
                    }
                    keep
                }
            });
            dropped = Some(column);
        }
        Change::AddConstraint(constraint) => {
            let text = render::constraint_def(table, constraint);
            let item = parse_item(&text);
            layout.items.push(item);
        }
        Change::DropConstraint { name, kind } => {
            let before = layout.items.len();
            layout.items.retain(|item| {
                !matches!(item, Item::Constraint { name: Some(n), kind: Some(k), .. }
                    if n.eq_ignore_ascii_case(name) && *k == kind)
            });
            if layout.items.len() == before {
                return Err(StoreError::ConstraintNotFound {
                    table: table.to_string(),
                    name: name.to_string(),
                    kind: kind.to_string(),
                });
            }
        }
        Change::AlterColumn { column, change } => {
            let current = require_column(&info, table, column)?;
            let has_table_pk = layout
                .items
                .iter()
                .any(|item| matches!(item, Item::Constraint { kind: None, .. }));
            let text = altered_column(current, change, !has_table_pk);
            let slot = layout
                .items
                .iter_mut()
                .find(|item| matches!(item, Item::Column { name, .. } if name.eq_ignore_ascii_case(column)))
                .ok_or_else(|| StoreError::ColumnNotFound {
                    table: table.to_string(),
                    column: column.to_string(),
                })?;
            *slot = Item::Column {
                name: current.name.clone(),
                text,
            };
        }
    }

    let copied: Vec<String> = old_columns
        .into_iter()
        .filter(|name| dropped.map_or(true, |d| !name.eq_ignore_ascii_case(d)))
        .collect();
    let dependents = dependent_objects(conn, table, dropped)?;

    let staging = format!("_ledger_new_{table}");
    let body: Vec<&str> = layout.items.iter().map(Item::text).collect();
    let create = format!(
        "CREATE TABLE {} (\n    {}\n){}",
        render::quote(&staging),
        body.join(",\n    "),
        layout.options
    );
    let columns = render::quote_list(&copied);
    let statements = [
        create,
        format!(
            "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
            render::quote(&staging),
            render::quote(table)
        ),
        render::drop_table(table),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            render::quote(&staging),
            render::quote(table)
        ),
    ];
    for statement in statements.iter().chain(&dependents) {
        tracing::debug!(table, sql = statement.as_str(), "rebuild");
        conn.execute_batch(statement).map_err(StoreError::backend)?;
    }

    Ok(())
}

fn table_sql(conn: &Connection, table: &str) -> Result<String, StoreError> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(StoreError::backend)?
    .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", render::quote(table)))
        .map_err(StoreError::backend)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                ty: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default: row.get(4)?,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })
        .map_err(StoreError::backend)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::backend)
}

fn require_column<'i>(
    info: &'i [ColumnInfo],
    table: &str,
    column: &str,
) -> Result<&'i ColumnInfo, StoreError> {
    info.iter()
        .find(|col| col.name.eq_ignore_ascii_case(column))
        .ok_or_else(|| StoreError::ColumnNotFound {
            table: table.to_string(),
            column: column.to_string(),
        })
}

/// Indexes and triggers to recreate after the rename. Indexes on a dropped
/// column are left out.
fn dependent_objects(
    conn: &Connection,
    table: &str,
    dropped: Option<&str>,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT type, name, sql FROM sqlite_master
             WHERE tbl_name = ?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL
             ORDER BY type, name",
        )
        .map_err(StoreError::backend)?;
    let objects = stmt
        .query_map([table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(StoreError::backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::backend)?;

    let mut kept = Vec::with_capacity(objects.len());
    for (kind, name, sql) in objects {
        if let (Some(column), "index") = (dropped, kind.as_str()) {
            if index_columns(conn, &name)?.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                tracing::debug!(table, index = name.as_str(), column, "dropping index with column");
                continue;
            }
        }
        kept.push(sql);
    }
    Ok(kept)
}

fn index_columns(conn: &Connection, index: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA index_info({})", render::quote(index)))
        .map_err(StoreError::backend)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, Option<String>>(2))
        .map_err(StoreError::backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::backend)?;
    Ok(columns.into_iter().flatten().collect())
}

fn altered_column(current: &ColumnInfo, change: &ColumnChange, inline_pk: bool) -> String {
    let mut ty = current.ty.clone();
    let mut not_null = current.not_null;
    let mut default = current.default.clone();
    match change {
        ColumnChange::SetNullable(nullable) => not_null = !nullable,
        ColumnChange::SetDefault(value) => default = value.as_ref().map(ToString::to_string),
        ColumnChange::SetType(new_ty) => ty = new_ty.to_string(),
        ColumnChange::Rename { .. } => {}
    }

    let mut sql = render::quote(&current.name);
    if !ty.is_empty() {
        sql.push(' ');
        sql.push_str(&ty);
    }
    if current.primary_key && inline_pk {
        sql.push_str(" PRIMARY KEY");
    }
    if not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = default {
        if default.starts_with('(') {
            sql.push_str(&format!(" DEFAULT {default}"));
        } else {
            sql.push_str(&format!(" DEFAULT ({default})"));
        }
    }
    sql
}

fn contains(columns: &[String], column: &str) -> bool {
    columns.iter().any(|c| c.eq_ignore_ascii_case(column))
}

fn parse_create_table(sql: &str) -> Option<Layout> {
    let open = find_top_level(sql, '(')?;
    let close = matching_paren(sql, open)?;
    let items = split_top_level(&sql[open + 1..close])
        .into_iter()
        .map(|item| parse_item(&item))
        .collect();
    Some(Layout {
        items,
        options: sql[close + 1..].to_string(),
    })
}

fn parse_item(text: &str) -> Item {
    let text = text.trim().to_string();
    let tokens = tokens(&text);
    let upper: Vec<String> = tokens.iter().map(|t| t.text.to_ascii_uppercase()).collect();

    let (name, body_start) = if upper.first().map(String::as_str) == Some("CONSTRAINT") && tokens.len() > 1 {
        (Some(tokens[1].text.clone()), 2)
    } else {
        (None, 0)
    };

    let keyword = |offset: usize| upper.get(body_start + offset).map(String::as_str);
    let kind = match (keyword(0), keyword(1)) {
        (Some("PRIMARY"), Some("KEY")) => Some(None),
        (Some("UNIQUE"), _) => Some(Some(ConstraintKind::Unique)),
        (Some("CHECK"), _) => Some(Some(ConstraintKind::Check)),
        (Some("FOREIGN"), Some("KEY")) => Some(Some(ConstraintKind::ForeignKey)),
        _ => None,
    };

    match kind {
        Some(kind) => {
            // Referenced columns of another table do not count.
            let end = upper
                .iter()
                .position(|t| t == "REFERENCES")
                .unwrap_or(tokens.len());
            let columns = tokens[body_start..end]
                .iter()
                .filter(|t| t.identifier)
                .map(|t| t.text.clone())
                .filter(|t| !is_keyword(t))
                .collect();
            Item::Constraint {
                name,
                kind,
                columns,
                text,
            }
        }
        None => Item::Column {
            name: tokens.first().map(|t| t.text.clone()).unwrap_or_default(),
            text,
        },
    }
}

fn is_keyword(word: &str) -> bool {
    const KEYWORDS: [&str; 14] = [
        "PRIMARY", "KEY", "UNIQUE", "CHECK", "FOREIGN", "AND", "OR", "NOT", "NULL", "IS", "IN",
        "ASC", "DESC", "COLLATE",
    ];
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

#[derive(Debug)]
struct Token {
    text: String,
    /// Bare word or quoted identifier, as opposed to punctuation or a
    /// string literal.
    identifier: bool,
}

fn tokens(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if let Some(close) = closing_quote(c) {
            let mut text = String::new();
            i += 1;
            while i < chars.len() {
                if chars[i] == close {
                    if chars.get(i + 1) == Some(&close) && close != ']' {
                        text.push(close);
                        i += 2;
                        continue;
                    }
                    break;
                }
                text.push(chars[i]);
                i += 1;
            }
            i += 1;
            out.push(Token {
                text,
                identifier: c != '\'',
            });
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let identifier = !text.chars().next().is_some_and(|first| first.is_ascii_digit());
            out.push(Token { text, identifier });
        } else {
            out.push(Token {
                text: c.to_string(),
                identifier: false,
            });
            i += 1;
        }
    }
    out
}

fn closing_quote(c: char) -> Option<char> {
    match c {
        '"' => Some('"'),
        '\'' => Some('\''),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    }
}

/// Byte offset of the first `target` outside quotes.
fn find_top_level(sql: &str, target: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (pos, c) in sql.char_indices() {
        match quote {
            Some(close) if c == close => quote = None,
            Some(_) => {}
            None if c == target => return Some(pos),
            None => quote = closing_quote(c),
        }
    }
    None
}

fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (pos, c) in sql[open..].char_indices() {
        match quote {
            Some(close) if c == close => quote = None,
            Some(_) => {}
            None => match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + pos);
                    }
                }
                _ => quote = closing_quote(c),
            },
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in body.chars() {
        match quote {
            Some(close) => {
                if c == close {
                    quote = None;
                }
                current.push(c);
            }
            None => match c {
                ',' if depth == 0 => {
                    items.push(std::mem::take(&mut current));
                }
                '(' => {
                    depth += 1;
                    current.push(c);
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                _ => {
                    quote = closing_quote(c);
                    current.push(c);
                }
            },
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &str = "CREATE TABLE \"post\" (
    \"id\" UUID NOT NULL,
    \"category\" VARCHAR(255) DEFAULT ('food, drinks'),
    \"place_id\" UUID,
    PRIMARY KEY (\"id\"),
    CONSTRAINT \"post_place_id_fkey\" FOREIGN KEY (\"place_id\") REFERENCES \"place\" (\"id\"),
    CONSTRAINT \"post_category_check\" CHECK (length(category) > 0)
)";

    #[test]
    fn splits_body_at_top_level_commas_only() {
        let layout = parse_create_table(POST).expect("should parse");
        assert_eq!(layout.items.len(), 6);
        assert!(layout.options.is_empty());
        assert_eq!(
            layout.items[1],
            Item::Column {
                name: "category".to_string(),
                text: "\"category\" VARCHAR(255) DEFAULT ('food, drinks')".to_string(),
            }
        );
    }

    #[test]
    fn classifies_constraints_and_their_columns() {
        let layout = parse_create_table(POST).expect("should parse");
        match &layout.items[3] {
            Item::Constraint { name, kind, columns, .. } => {
                assert!(name.is_none());
                assert!(kind.is_none(), "primary key");
                assert_eq!(columns, &["id"]);
            }
            other => panic!("expected constraint, got {other:?}"),
        }
        match &layout.items[4] {
            Item::Constraint { name, kind, columns, .. } => {
                assert_eq!(name.as_deref(), Some("post_place_id_fkey"));
                assert_eq!(*kind, Some(ConstraintKind::ForeignKey));
                assert_eq!(columns, &["place_id"], "referenced columns are excluded");
            }
            other => panic!("expected constraint, got {other:?}"),
        }
        match &layout.items[5] {
            Item::Constraint { kind, columns, .. } => {
                assert_eq!(*kind, Some(ConstraintKind::Check));
                assert!(columns.contains(&"category".to_string()));
            }
            other => panic!("expected constraint, got {other:?}"),
        }
    }

    #[test]
    fn keeps_table_options() {
        let layout = parse_create_table("CREATE TABLE t (a INTEGER PRIMARY KEY) WITHOUT ROWID")
            .expect("should parse");
        assert_eq!(layout.options, " WITHOUT ROWID");
        assert_eq!(layout.items.len(), 1);
    }
}
