//! Shared relational compilation.
//!
//! Both relational backends compile the same lowered [`Predicate`] through a
//! [`SqlBuilder`]; a [`Dialect`] supplies the spellings that differ between
//! them (placeholders, regular expressions, JSON containment, null ordering).
//!
//! Every model maps to one table with an `_id TEXT PRIMARY KEY` column and one
//! column per stored field. Dates are stored as canonical RFC 3339 strings so
//! that text comparison orders them chronologically.
//!
//! [`Predicate`]: crate::query::Predicate

mod builder;
mod dialect;

pub use builder::{SqlBuilder, SqlStatement};
pub use dialect::{Dialect, PostgresDialect, SqliteDialect};

use serde_json::Value;

use crate::model::{FieldKind, Model, PRIMARY_KEY};

/// A typed statement parameter.
///
/// The variant decides how the driver binds the value; `None` binds a typed
/// SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Text value.
    Text(Option<String>),
    /// 64-bit integer.
    Int(Option<i64>),
    /// Double precision float.
    Float(Option<f64>),
    /// Boolean.
    Bool(Option<bool>),
    /// JSON document.
    Json(Option<Value>),
}

impl SqlParam {
    /// Converts a stored value to the column type of `kind`.
    pub fn for_kind(kind: FieldKind, value: &Value) -> Self {
        match kind {
            FieldKind::Number => SqlParam::Int(match value {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
                Value::Bool(b) => Some(i64::from(*b)),
                Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
                _ => None,
            }),
            FieldKind::Float => SqlParam::Float(match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }),
            FieldKind::Bool => SqlParam::Bool(match value {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => n.as_f64().map(|f| f != 0.0),
                Value::String(s) => Some(matches!(s.trim(), "true" | "1" | "yes")),
                _ => None,
            }),
            FieldKind::Object | FieldKind::Array => SqlParam::Json(match value {
                Value::Null => None,
                other => Some(other.clone()),
            }),
            FieldKind::Id | FieldKind::String | FieldKind::Date | FieldKind::File => {
                SqlParam::Text(text_of(value))
            }
        }
    }

    /// Converts a comparison operand for a column of `kind`.
    ///
    /// Operands that do not fit the column type are bound as text; the dialect
    /// decides how the column side is compared in that case.
    pub fn operand(kind: Option<FieldKind>, value: &Value) -> Self {
        match (kind, value) {
            (Some(k), v) if k.is_structured() => SqlParam::Json(Some(v.clone())),
            (Some(k), v) if is_textual(k) => SqlParam::Text(text_of(v)),
            (Some(FieldKind::Bool) | None, Value::Bool(b)) => SqlParam::Bool(Some(*b)),
            (Some(FieldKind::Number | FieldKind::Float) | None, Value::Number(n)) => {
                match n.as_i64() {
                    Some(i) => SqlParam::Int(Some(i)),
                    None => SqlParam::Float(n.as_f64()),
                }
            }
            (_, v) => SqlParam::Text(text_of(v)),
        }
    }

    /// Returns true when the parameter binds as text.
    pub fn is_text(&self) -> bool {
        matches!(self, SqlParam::Text(_))
    }

    /// PostgreSQL type name used in placeholder casts.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlParam::Text(_) => "text",
            SqlParam::Int(_) => "bigint",
            SqlParam::Float(_) => "float8",
            SqlParam::Bool(_) => "boolean",
            SqlParam::Json(_) => "jsonb",
        }
    }
}

/// Returns true for kinds stored in text columns.
pub fn is_textual(kind: FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::Id | FieldKind::String | FieldKind::Date | FieldKind::File
    )
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Quotes an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Table columns in select order: the primary key, then every stored field.
pub fn columns(model: &Model) -> Vec<(String, FieldKind)> {
    std::iter::once((PRIMARY_KEY.to_string(), FieldKind::Id))
        .chain(model.stored_fields().map(|f| (f.name.clone(), f.kind)))
        .collect()
}

/// Decodes a text cell by field kind; structured kinds hold serialized JSON.
pub fn decode_text(kind: FieldKind, text: String) -> Value {
    if kind.is_structured() {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    }
}
