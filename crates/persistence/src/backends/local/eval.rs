//! In-process predicate evaluation and value ordering.
//!
//! A [`Matcher`] is compiled from a [`Predicate`] once per call, so regular
//! expressions are validated before any record is touched. Evaluation is
//! two-valued: a comparison that cannot be decided (absent field, mismatched
//! types) is false, and negation inverts that result. The relational compilers
//! reach the same answers through `NOT COALESCE(..., false)`.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use crate::backends::Record;
use crate::coerce::{Calculated, float_value, format_timestamp, parse_timestamp};
use crate::error::ValidationError;
use crate::model::{FieldKind, Model, PRIMARY_KEY};
use crate::query::{Comparison, Direction, Predicate, SortKey};

/// A compiled, owned predicate.
#[derive(Debug, Clone)]
pub enum Matcher {
    Eq(String, Value),
    Cmp(String, Comparison, Calculated),
    In(String, Vec<Value>),
    All(String, Vec<Value>),
    Exists(String, bool),
    Regex(String, Regex),
    /// Known to be true or false without looking at the record.
    Constant(bool),
    Not(Box<Matcher>),
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
}

impl Matcher {
    /// Compiles a predicate for `model`.
    pub fn compile(model: &Model, predicate: &Predicate) -> Result<Self, ValidationError> {
        Ok(match predicate {
            Predicate::Eq(field, value) => Matcher::Eq(key(field), value.clone()),
            Predicate::Cmp(field, comparison, operand) => {
                if operand.comparable_with(model.field(field).map(|f| f.kind)) {
                    Matcher::Cmp(key(field), *comparison, *operand)
                } else {
                    Matcher::Constant(false)
                }
            }
            Predicate::In(field, values) => Matcher::In(key(field), values.clone()),
            Predicate::All(field, values) => Matcher::All(key(field), values.clone()),
            Predicate::Exists(field, present) => Matcher::Exists(key(field), *present),
            Predicate::Regex(field, pattern) => {
                let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidRegex {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                Matcher::Regex(key(field), regex)
            }
            Predicate::Type(field, type_name) => {
                let is_date = model.field(field).map(|f| f.kind) == Some(FieldKind::Date);
                if type_name == "date" && is_date {
                    Matcher::Exists(key(field), true)
                } else {
                    Matcher::Constant(false)
                }
            }
            Predicate::Not(inner) => Matcher::Not(Box::new(Self::compile(model, inner)?)),
            Predicate::And(parts) => Matcher::And(compile_all(model, parts)?),
            Predicate::Or(parts) => Matcher::Or(compile_all(model, parts)?),
            Predicate::Nor(parts) => {
                Matcher::Not(Box::new(Matcher::Or(compile_all(model, parts)?)))
            }
        })
    }

    /// Evaluates the matcher against one record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Matcher::Eq(field, Value::Null) => lookup(record, field).is_null(),
            Matcher::Eq(field, value) => equals(lookup(record, field), value),
            Matcher::Cmp(field, comparison, operand) => compare_operand(lookup(record, field), operand)
                .is_some_and(|ordering| comparison.holds(ordering)),
            Matcher::In(field, values) => {
                let stored = lookup(record, field);
                values.iter().any(|value| match value {
                    Value::Null => stored.is_null(),
                    value => equals(stored, value),
                })
            }
            Matcher::All(field, values) => match lookup(record, field) {
                Value::Array(items) => values
                    .iter()
                    .all(|value| items.iter().any(|item| equals(item, value))),
                _ => values.is_empty(),
            },
            Matcher::Exists(field, present) => !lookup(record, field).is_null() == *present,
            Matcher::Regex(field, regex) => match lookup(record, field) {
                Value::String(s) => regex.is_match(s),
                _ => false,
            },
            Matcher::Constant(value) => *value,
            Matcher::Not(inner) => !inner.matches(record),
            Matcher::And(parts) => parts.iter().all(|p| p.matches(record)),
            Matcher::Or(parts) => parts.iter().any(|p| p.matches(record)),
        }
    }
}

fn compile_all(model: &Model, parts: &[Predicate]) -> Result<Vec<Matcher>, ValidationError> {
    parts.iter().map(|p| Matcher::compile(model, p)).collect()
}

/// Records store the identifier under `_id`; `id` is accepted for it.
fn key(field: &str) -> String {
    if field == "id" {
        PRIMARY_KEY.to_string()
    } else {
        field.to_string()
    }
}

/// Field value, `null` when absent.
pub fn lookup<'a>(record: &'a Record, field: &str) -> &'a Value {
    record.get(field).unwrap_or(&Value::Null)
}

/// Equality with numbers compared by value, so `3` equals `3.0`.
pub fn equals(stored: &Value, operand: &Value) -> bool {
    match (stored, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

/// Compares a stored value to a normalized operand; `None` when undecidable.
fn compare_operand(stored: &Value, operand: &Calculated) -> Option<Ordering> {
    match (stored, operand) {
        (Value::Number(n), Calculated::Number(op)) => n.as_f64()?.partial_cmp(op),
        (Value::String(s), Calculated::Number(op)) => {
            Some(s.as_str().cmp(float_value(*op).to_string().as_str()))
        }
        (Value::String(s), Calculated::Timestamp(ts)) => match parse_timestamp(s) {
            Some(stored) => Some(stored.cmp(ts)),
            None => Some(s.as_str().cmp(format_timestamp(ts).as_str())),
        },
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over values: null, numbers, strings, objects, arrays, booleans.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| compare_values(va, vb)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Stable sort by the keys in priority order; ties keep insertion order.
pub fn sort_records(records: &mut [Record], order: &[SortKey]) {
    if order.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        order
            .iter()
            .map(|sort_key| {
                let field = key(&sort_key.field);
                let ordering = compare_values(lookup(a, &field), lookup(b, &field));
                match sort_key.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}
