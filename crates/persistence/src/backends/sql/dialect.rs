use std::fmt::Debug;

use serde_json::Value;

use super::{SqlParam, is_textual};
use crate::backends::Accumulator;
use crate::model::FieldKind;
use crate::query::Direction;

/// The SQL spellings that differ between relational backends.
pub trait Dialect: Send + Sync + Debug {
    /// Backend name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Placeholder for a parameter in a condition.
    fn placeholder(&self, index: usize, param: &SqlParam) -> String;

    /// Placeholder for a parameter written into a column.
    fn value_placeholder(&self, index: usize) -> String;

    /// Column type for a field kind.
    fn column_type(&self, kind: FieldKind) -> &'static str;

    /// Column giving insertion order, used as the final sort key.
    fn sequence_column(&self) -> &'static str;

    /// Definition of the sequence column when the table must declare one.
    fn sequence_definition(&self) -> Option<&'static str> {
        None
    }

    /// Literal for boolean false.
    fn false_literal(&self) -> &'static str;

    /// Unanchored regular expression match.
    fn regex(&self, column: &str, placeholder: &str) -> String;

    /// Parameter for an array containment test of one element.
    fn contains_param(&self, value: &Value) -> SqlParam;

    /// Tests whether a JSON array column contains the bound element.
    fn array_contains(&self, column: &str, placeholder: &str) -> String;

    /// Column expression compared against `param`.
    fn operand_column(&self, column: &str, _kind: Option<FieldKind>, _param: &SqlParam) -> String {
        column.to_string()
    }

    /// Suffix placing nulls first ascending and last descending.
    fn nulls_order(&self, _direction: Direction) -> &'static str {
        ""
    }

    /// `LIMIT`/`OFFSET` clause, empty when neither applies.
    fn limit_clause(&self, limit: Option<u64>, offset: u64) -> String;

    /// Aggregate expression over a column.
    fn aggregate(&self, accumulator: Accumulator, column: &str) -> String {
        match accumulator {
            Accumulator::Sum => format!("SUM({})", column),
            Accumulator::Max => format!("MAX({})", column),
            Accumulator::Min => format!("MIN({})", column),
            Accumulator::Avg => format!("AVG({})", column),
        }
    }

    /// `ADD COLUMN` clause for schema upgrades.
    fn add_column(&self) -> &'static str {
        "ADD COLUMN"
    }
}

/// SQLite: `?N` placeholders, integer booleans, JSON stored as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize, _param: &SqlParam) -> String {
        format!("?{}", index)
    }

    fn value_placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn column_type(&self, kind: FieldKind) -> &'static str {
        match kind {
            FieldKind::Number | FieldKind::Bool => "INTEGER",
            FieldKind::Float => "REAL",
            _ => "TEXT",
        }
    }

    fn sequence_column(&self) -> &'static str {
        "rowid"
    }

    fn false_literal(&self) -> &'static str {
        "0"
    }

    fn regex(&self, column: &str, placeholder: &str) -> String {
        format!("{} REGEXP {}", column, placeholder)
    }

    fn contains_param(&self, value: &Value) -> SqlParam {
        SqlParam::operand(None, value)
    }

    fn array_contains(&self, column: &str, placeholder: &str) -> String {
        format!(
            "EXISTS (SELECT 1 FROM json_each({}) WHERE json_each.value = {})",
            column, placeholder
        )
    }

    fn limit_clause(&self, limit: Option<u64>, offset: u64) -> String {
        match (limit, offset) {
            (Some(limit), 0) => format!(" LIMIT {}", limit),
            (Some(limit), offset) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (None, 0) => String::new(),
            (None, offset) => format!(" LIMIT -1 OFFSET {}", offset),
        }
    }
}

/// PostgreSQL: `$N::type` placeholders, native booleans, `JSONB` documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize, param: &SqlParam) -> String {
        format!("${}::{}", index, param.type_name())
    }

    fn value_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn column_type(&self, kind: FieldKind) -> &'static str {
        match kind {
            FieldKind::Number => "BIGINT",
            FieldKind::Float => "DOUBLE PRECISION",
            FieldKind::Bool => "BOOLEAN",
            FieldKind::Object | FieldKind::Array => "JSONB",
            _ => "TEXT",
        }
    }

    fn sequence_column(&self) -> &'static str {
        "\"_seq\""
    }

    fn sequence_definition(&self) -> Option<&'static str> {
        Some("\"_seq\" BIGSERIAL")
    }

    fn false_literal(&self) -> &'static str {
        "FALSE"
    }

    fn regex(&self, column: &str, placeholder: &str) -> String {
        format!("{}::text ~ {}", column, placeholder)
    }

    fn contains_param(&self, value: &Value) -> SqlParam {
        SqlParam::Json(Some(Value::Array(vec![value.clone()])))
    }

    fn array_contains(&self, column: &str, placeholder: &str) -> String {
        format!("{} @> {}", column, placeholder)
    }

    fn operand_column(&self, column: &str, kind: Option<FieldKind>, param: &SqlParam) -> String {
        match kind {
            Some(kind) if param.is_text() && !is_textual(kind) => format!("{}::text", column),
            _ => column.to_string(),
        }
    }

    fn nulls_order(&self, direction: Direction) -> &'static str {
        match direction {
            Direction::Asc => " NULLS FIRST",
            Direction::Desc => " NULLS LAST",
        }
    }

    fn limit_clause(&self, limit: Option<u64>, offset: u64) -> String {
        let mut clause = String::new();
        if let Some(limit) = limit {
            clause.push_str(&format!(" LIMIT {}", limit));
        }
        if offset > 0 {
            clause.push_str(&format!(" OFFSET {}", offset));
        }
        clause
    }

    fn aggregate(&self, accumulator: Accumulator, column: &str) -> String {
        match accumulator {
            Accumulator::Sum => format!("SUM({})::float8", column),
            Accumulator::Avg => format!("AVG({})::float8", column),
            Accumulator::Max => format!("MAX({})", column),
            Accumulator::Min => format!("MIN({})", column),
        }
    }

    fn add_column(&self) -> &'static str {
        "ADD COLUMN IF NOT EXISTS"
    }
}
