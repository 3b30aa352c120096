//! SQL text for ledger primitives.
//!
//! Identifiers are always double-quoted. Primary keys and table constraints
//! are emitted as table-level clauses and constraints always carry a name,
//! so the rebuild procedure can find them again.

use goodplaces_ledger::ops::{Column, Constraint, ConstraintDef, Index, ReferentialAction, Table};

/// Quotes an identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn quote_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|ident| quote(ident))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn column_def(column: &Column) -> String {
    let mut sql = format!("{} {}", quote(&column.name), column.ty);
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        sql.push_str(&format!(" DEFAULT {default}"));
    }
    sql
}

pub(crate) fn constraint_def(table: &str, constraint: &Constraint) -> String {
    let name = quote(&constraint.resolved_name(table));
    match &constraint.def {
        ConstraintDef::ForeignKey(fk) => {
            let mut sql = format!(
                "CONSTRAINT {name} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_list(&fk.columns),
                quote(&fk.references_table),
                quote_list(&fk.references_columns)
            );
            if fk.on_delete != ReferentialAction::NoAction {
                sql.push_str(" ON DELETE ");
                sql.push_str(fk.on_delete.as_sql());
            }
            sql
        }
        ConstraintDef::Unique { columns } => {
            format!("CONSTRAINT {name} UNIQUE ({})", quote_list(columns))
        }
        ConstraintDef::Check { expression } => format!("CONSTRAINT {name} CHECK ({expression})"),
    }
}

pub(crate) fn create_table(table: &Table) -> String {
    let mut items: Vec<String> = table.columns.iter().map(column_def).collect();
    if !table.primary_key.is_empty() {
        items.push(format!("PRIMARY KEY ({})", quote_list(&table.primary_key)));
    }
    items.extend(
        table
            .constraints
            .iter()
            .map(|constraint| constraint_def(&table.name, constraint)),
    );
    format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote(&table.name),
        items.join(",\n    ")
    )
}

pub(crate) fn create_index(index: &Index) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote(&index.name),
        quote(&index.table),
        quote_list(&index.columns)
    )
}

pub(crate) fn drop_index(name: &str) -> String {
    format!("DROP INDEX {}", quote(name))
}

pub(crate) fn drop_table(table: &str) -> String {
    format!("DROP TABLE {}", quote(table))
}

pub(crate) fn add_column(table: &str, column: &Column) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", quote(table), column_def(column))
}

pub(crate) fn rename_column(table: &str, from: &str, to: &str) -> String {
    format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote(table),
        quote(from),
        quote(to)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use goodplaces_ledger::ops::{ColumnType, DefaultValue};

    #[test]
    fn renders_table_with_named_constraints() {
        let table = Table::new("post_like")
            .column(Column::new("user_id", ColumnType::Uuid).not_null())
            .column(Column::new("post_id", ColumnType::Uuid).not_null())
            .column(
                Column::new("created_at", ColumnType::Timestamp)
                    .not_null()
                    .default(DefaultValue::CurrentTimestamp),
            )
            .primary_key(["user_id", "post_id"])
            .foreign_key(&["post_id"], "post", &["id"], ReferentialAction::Cascade);

        assert_eq!(
            create_table(&table),
            "CREATE TABLE \"post_like\" (\n    \
             \"user_id\" UUID NOT NULL,\n    \
             \"post_id\" UUID NOT NULL,\n    \
             \"created_at\" TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,\n    \
             PRIMARY KEY (\"user_id\", \"post_id\"),\n    \
             CONSTRAINT \"post_like_post_id_fkey\" FOREIGN KEY (\"post_id\") REFERENCES \"post\" (\"id\") ON DELETE CASCADE\n)"
        );
    }

    #[test]
    fn quotes_embedded_quotes() {
        assert_eq!(quote("user"), "\"user\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
