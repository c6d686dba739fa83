//! In-process evaluation of `$group` stages.
//!
//! Supported expressions: `$field` references, literals, objects of
//! expressions, `$dateToString` and the `$sum`/`$max`/`$min`/`$avg`
//! accumulators. Groups come back ordered by `_id`.

use chrono::format::{Item, StrftimeItems};
use serde_json::{Map, Value};

use super::eval::{compare_values, lookup};
use crate::backends::Record;
use crate::coerce::{float_value, numeric, parse_timestamp};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::query::Grouping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Sum,
    Max,
    Min,
    Avg,
}

impl Operator {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "$sum" => Some(Operator::Sum),
            "$max" => Some(Operator::Max),
            "$min" => Some(Operator::Min),
            "$avg" => Some(Operator::Avg),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Accumulation {
    name: String,
    operator: Operator,
    operand: Value,
}

fn invalid(message: String) -> StorageError {
    StorageError::Backend(BackendError::QueryError { message })
}

/// Splits a single-key object into its operator and operand.
fn single_entry(value: &Value) -> Option<(&str, &Value)> {
    match value {
        Value::Object(map) if map.len() == 1 => map.iter().next().map(|(k, v)| (k.as_str(), v)),
        _ => None,
    }
}

/// Evaluates an expression against one record.
fn evaluate(expression: &Value, record: &Record) -> Value {
    match expression {
        Value::String(s) => match s.strip_prefix('$') {
            Some(field) => lookup(record, field).clone(),
            None => expression.clone(),
        },
        Value::Object(map) => {
            if let Some((name, operand)) = single_entry(expression) {
                if name == "$dateToString" {
                    return date_to_string(operand, record);
                }
                if let Some(operator) = Operator::parse(name) {
                    let value = evaluate(operand, record);
                    return reduce(operator, std::slice::from_ref(&value));
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), evaluate(v, record)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| evaluate(v, record)).collect()),
        other => other.clone(),
    }
}

/// `{$dateToString: {format, date}}`; `null` when the value is not a date
/// or the format has a specifier chrono does not know.
fn date_to_string(operand: &Value, record: &Record) -> Value {
    let Value::Object(spec) = operand else {
        return Value::Null;
    };
    let format = spec
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or("%Y-%m-%dT%H:%M:%S.%LZ")
        .replace("%L", "%3f");
    let date = spec
        .get("date")
        .map(|d| evaluate(d, record))
        .unwrap_or(Value::Null);

    let Some(ts) = date.as_str().and_then(parse_timestamp) else {
        return Value::Null;
    };
    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Value::Null;
    }
    Value::String(ts.format_with_items(items.into_iter()).to_string())
}

fn reduce(operator: Operator, values: &[Value]) -> Value {
    match operator {
        Operator::Sum => {
            let total: f64 = values
                .iter()
                .filter(|v| v.is_number())
                .filter_map(numeric)
                .sum();
            float_value(total)
        }
        Operator::Avg => {
            let numbers: Vec<f64> = values
                .iter()
                .filter(|v| v.is_number())
                .filter_map(numeric)
                .collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                float_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Operator::Max => values
            .iter()
            .filter(|v| !v.is_null())
            .max_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        Operator::Min => values
            .iter()
            .filter(|v| !v.is_null())
            .min_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Groups `records` by the stage built from `grouping`.
pub fn group(records: &[Record], grouping: &Grouping) -> StorageResult<Vec<Record>> {
    let stage = grouping.stage();
    let key_expression = stage.get("_id").cloned().unwrap_or(Value::Null);

    let mut accumulations = Vec::new();
    for (name, expression) in stage.iter().filter(|(name, _)| name.as_str() != "_id") {
        let (operator, operand) = single_entry(expression)
            .and_then(|(op, operand)| Operator::parse(op).map(|op| (op, operand)))
            .ok_or_else(|| {
                invalid(format!(
                    "group field '{}' must be a single $sum, $max, $min or $avg accumulator",
                    name
                ))
            })?;
        accumulations.push(Accumulation {
            name: name.clone(),
            operator,
            operand: operand.clone(),
        });
    }

    let mut buckets: Vec<(Value, Vec<&Record>)> = Vec::new();
    for record in records {
        let key = evaluate(&key_expression, record);
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(record),
            None => buckets.push((key, vec![record])),
        }
    }
    buckets.sort_by(|(a, _), (b, _)| compare_values(a, b));

    Ok(buckets
        .into_iter()
        .map(|(key, members)| {
            let mut row = Map::new();
            row.insert("_id".to_string(), key);
            for accumulation in &accumulations {
                let values: Vec<Value> = members
                    .iter()
                    .map(|record| evaluate(&accumulation.operand, record))
                    .collect();
                row.insert(
                    accumulation.name.clone(),
                    reduce(accumulation.operator, &values),
                );
            }
            row
        })
        .collect())
}
