//! SQLite table creation and upgrades.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::info;

use crate::backends::sql::{SqlBuilder, SqliteDialect, quote};
use crate::error::StorageResult;
use crate::model::Model;

/// Statements that bring one model's table up to date.
#[derive(Debug, Clone)]
pub(crate) struct TablePlan {
    pub table: String,
    pub create: Vec<String>,
    pub columns: Vec<(String, String)>,
}

impl TablePlan {
    pub fn for_model(model: &Model) -> Self {
        let builder = SqlBuilder::new(&SqliteDialect, model);
        Self {
            table: model.collection().to_string(),
            create: builder.create_table(),
            columns: model
                .stored_fields()
                .map(|f| (f.name.clone(), builder.add_column(&f.name, f.kind)))
                .collect(),
        }
    }
}

/// Creates the table, appends missing columns, then creates indexes.
pub(crate) fn apply(conn: &Connection, plan: &TablePlan) -> StorageResult<()> {
    let mut statements = plan.create.iter();
    if let Some(create) = statements.next() {
        conn.execute(create, [])?;
    }

    let existing = existing_columns(conn, &plan.table)?;
    for (name, alter) in &plan.columns {
        if !existing.contains(name) {
            conn.execute(alter, [])?;
            info!(table = %plan.table, column = %name, "added column");
        }
    }

    for index in statements {
        conn.execute(index, [])?;
    }
    Ok(())
}

fn existing_columns(conn: &Connection, table: &str) -> StorageResult<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}
