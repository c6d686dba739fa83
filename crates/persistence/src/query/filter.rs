//! The filter AST and its wire format.
//!
//! A filter document maps field names to conditions and may carry `AND`, `OR`
//! and `NOR` arms:
//!
//! ```json
//! {
//!   "status": "paid",
//!   "total": {"greaterThan": 100},
//!   "customer": {"name": {"matchesRegex": "^A"}},
//!   "OR": [{"priority": "high"}, {"escalated": true}]
//! }
//! ```
//!
//! A literal means equality (an array literal means `in`), an object whose keys
//! are all operators is an operator map, and any other object is a nested
//! filter against a relationship alias.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};

use crate::coerce::normalize_null;
use crate::error::ValidationError;

/// Filter operators. Variant names mirror their wire spelling.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    EqualTo,
    NotEqualTo,
    LessThan,
    NotLessThan,
    LessThanOrEqualTo,
    NotLessThanOrEqualTo,
    GreaterThan,
    NotGreaterThan,
    GreaterThanOrEqualTo,
    NotGreaterThanOrEqualTo,
    In,
    All,
    NotIn,
    Exists,
    MatchesRegex,
    Options,
    /// BSON type guard, only produced by the aggregation primitive.
    Type,
}

impl Operator {
    /// Parses an operator name, accepting the `$`-prefixed native spellings.
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "equalTo" | "$eq" => Operator::EqualTo,
            "notEqualTo" | "$ne" => Operator::NotEqualTo,
            "lessThan" | "$lt" => Operator::LessThan,
            "notLessThan" => Operator::NotLessThan,
            "lessThanOrEqualTo" | "$lte" => Operator::LessThanOrEqualTo,
            "notLessThanOrEqualTo" => Operator::NotLessThanOrEqualTo,
            "greaterThan" | "$gt" => Operator::GreaterThan,
            "notGreaterThan" => Operator::NotGreaterThan,
            "greaterThanOrEqualTo" | "$gte" => Operator::GreaterThanOrEqualTo,
            "notGreaterThanOrEqualTo" => Operator::NotGreaterThanOrEqualTo,
            "in" | "$in" => Operator::In,
            "all" | "$all" => Operator::All,
            "notIn" | "$nin" => Operator::NotIn,
            "exists" | "$exists" => Operator::Exists,
            "matchesRegex" | "$regex" => Operator::MatchesRegex,
            "options" => Operator::Options,
            "$type" => Operator::Type,
            _ => return None,
        };
        Some(op)
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::EqualTo => "equalTo",
            Operator::NotEqualTo => "notEqualTo",
            Operator::LessThan => "lessThan",
            Operator::NotLessThan => "notLessThan",
            Operator::LessThanOrEqualTo => "lessThanOrEqualTo",
            Operator::NotLessThanOrEqualTo => "notLessThanOrEqualTo",
            Operator::GreaterThan => "greaterThan",
            Operator::NotGreaterThan => "notGreaterThan",
            Operator::GreaterThanOrEqualTo => "greaterThanOrEqualTo",
            Operator::NotGreaterThanOrEqualTo => "notGreaterThanOrEqualTo",
            Operator::In => "in",
            Operator::All => "all",
            Operator::NotIn => "notIn",
            Operator::Exists => "exists",
            Operator::MatchesRegex => "matchesRegex",
            Operator::Options => "options",
            Operator::Type => "$type",
        }
    }

    /// Splits a negated operator into its positive form.
    ///
    /// Returns the operator itself and `false` for positive operators.
    pub fn positive(self) -> (Operator, bool) {
        match self {
            Operator::NotEqualTo => (Operator::EqualTo, true),
            Operator::NotLessThan => (Operator::LessThan, true),
            Operator::NotLessThanOrEqualTo => (Operator::LessThanOrEqualTo, true),
            Operator::NotGreaterThan => (Operator::GreaterThan, true),
            Operator::NotGreaterThanOrEqualTo => (Operator::GreaterThanOrEqualTo, true),
            Operator::NotIn => (Operator::In, true),
            other => (other, false),
        }
    }

    fn takes_list(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn | Operator::All)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The condition placed on one filter key.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Implicit equality; an array means membership.
    Literal(Value),
    /// Explicit operators, combined with AND.
    Operators(BTreeMap<Operator, Value>),
    /// A nested filter on a relationship alias.
    Relation(Box<Filter>),
}

impl Condition {
    /// Parses the condition for `field`.
    pub fn parse(field: &str, value: Value) -> Result<Self, ValidationError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Array(items) => {
                return Ok(Condition::Literal(Value::Array(
                    items.into_iter().map(normalize_null).collect(),
                )));
            }
            other => return Ok(Condition::Literal(normalize_null(other))),
        };

        let operator_keys = map.keys().filter(|k| Operator::parse(k).is_some()).count();
        if operator_keys == map.len() {
            let mut operators = BTreeMap::new();
            for (name, operand) in map {
                if let Some(op) = Operator::parse(&name) {
                    operators.insert(op, parse_operand(field, op, operand)?);
                }
            }
            return Ok(Condition::Operators(operators));
        }

        if operator_keys > 0 {
            return Err(ValidationError::InvalidFilter {
                field: field.to_string(),
                message: "operators cannot be mixed with nested fields".to_string(),
            });
        }

        Ok(Condition::Relation(Box::new(Filter::from_map(map)?)))
    }

    /// Returns true when the condition constrains nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Literal(_) => false,
            Condition::Operators(ops) => ops.is_empty(),
            Condition::Relation(filter) => filter.is_empty(),
        }
    }

    /// Serializes back into the wire format.
    pub fn to_value(&self) -> Value {
        match self {
            Condition::Literal(value) => value.clone(),
            Condition::Operators(ops) => Value::Object(
                ops.iter()
                    .map(|(op, v)| (op.as_str().to_string(), v.clone()))
                    .collect(),
            ),
            Condition::Relation(filter) => filter.to_value(),
        }
    }
}

fn parse_operand(field: &str, op: Operator, operand: Value) -> Result<Value, ValidationError> {
    match op {
        Operator::MatchesRegex => {
            let pattern = operand.as_str().ok_or_else(|| ValidationError::InvalidFilter {
                field: field.to_string(),
                message: "matchesRegex expects a string pattern".to_string(),
            })?;
            Regex::new(pattern).map_err(|e| ValidationError::InvalidRegex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
            Ok(operand)
        }
        Operator::Exists => match operand {
            Value::Bool(_) => Ok(operand),
            Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|n| n != 0.0))),
            _ => Err(ValidationError::InvalidFilter {
                field: field.to_string(),
                message: "exists expects a boolean".to_string(),
            }),
        },
        op if op.takes_list() => match operand {
            Value::Array(items) => Ok(Value::Array(items.into_iter().map(normalize_null).collect())),
            single => Ok(Value::Array(vec![normalize_null(single)])),
        },
        _ => Ok(normalize_null(operand)),
    }
}

/// A backend-agnostic filter tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Field conditions, implicitly combined with AND.
    pub conditions: BTreeMap<String, Condition>,
    /// Arms that must all match.
    pub and: Vec<Filter>,
    /// Arms of which at least one must match.
    pub or: Vec<Filter>,
    /// Arms of which none may match.
    pub nor: Vec<Filter>,
}

impl Filter {
    /// Creates an empty filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a single equality filter.
    pub fn equals(field: &str, value: Value) -> Self {
        let mut filter = Self::new();
        filter.insert(canonical_field(field), Condition::Literal(normalize_null(value)));
        filter
    }

    /// Creates a single membership filter.
    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        let mut filter = Self::new();
        filter.insert(
            canonical_field(field),
            Condition::Operators(BTreeMap::from([(Operator::In, Value::Array(values))])),
        );
        filter
    }

    /// Parses a filter document. `null` parses to the empty filter.
    pub fn parse(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Self::from_map(map),
            other => Err(ValidationError::InvalidFilter {
                field: String::new(),
                message: format!("expected an object, got {}", other),
            }),
        }
    }

    fn from_map(map: Map<String, Value>) -> Result<Self, ValidationError> {
        let mut filter = Self::new();
        for (key, value) in map {
            filter.apply(&key, value)?;
        }
        Ok(filter)
    }

    /// Applies one key of a filter document, merging with what is already present.
    pub fn apply(&mut self, key: &str, value: Value) -> Result<(), ValidationError> {
        match combinator(key) {
            Some(kind) => {
                let arms = parse_arms(key, value)?;
                match kind {
                    Combinator::And => self.and.extend(arms),
                    Combinator::Or => self.or.extend(arms),
                    Combinator::Nor => self.nor.extend(arms),
                }
            }
            None => {
                let field = canonical_field(key);
                let condition = Condition::parse(&field, value)?;
                self.insert(field, condition);
            }
        }
        Ok(())
    }

    /// Inserts a condition, merging with an existing one on the same field.
    ///
    /// Operator maps merge per operator (the later operand wins), nested
    /// filters merge recursively, anything else is overwritten.
    pub fn insert(&mut self, field: String, condition: Condition) {
        match (self.conditions.remove(&field), condition) {
            (Some(Condition::Operators(mut existing)), Condition::Operators(incoming)) => {
                existing.extend(incoming);
                self.conditions.insert(field, Condition::Operators(existing));
            }
            (Some(Condition::Relation(mut existing)), Condition::Relation(incoming)) => {
                existing.merge(*incoming);
                self.conditions.insert(field, Condition::Relation(existing));
            }
            (_, incoming) => {
                self.conditions.insert(field, incoming);
            }
        }
    }

    /// Merges another filter into this one.
    pub fn merge(&mut self, other: Filter) {
        for (field, condition) in other.conditions {
            self.insert(field, condition);
        }
        self.and.extend(other.and);
        self.or.extend(other.or);
        self.nor.extend(other.nor);
    }

    /// Returns true when the filter constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.conditions.values().all(Condition::is_empty)
            && self.and.iter().all(Filter::is_empty)
            && self.or.iter().all(Filter::is_empty)
            && self.nor.iter().all(Filter::is_empty)
    }

    /// Serializes back into the wire format.
    pub fn to_value(&self) -> Value {
        let mut map: Map<String, Value> = self
            .conditions
            .iter()
            .map(|(field, condition)| (field.clone(), condition.to_value()))
            .collect();

        for (key, arms) in [("AND", &self.and), ("OR", &self.or), ("NOR", &self.nor)] {
            if !arms.is_empty() {
                map.insert(
                    key.to_string(),
                    Value::Array(arms.iter().map(Filter::to_value).collect()),
                );
            }
        }

        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy)]
enum Combinator {
    And,
    Or,
    Nor,
}

fn combinator(key: &str) -> Option<Combinator> {
    match key {
        "AND" | "and" | "$and" => Some(Combinator::And),
        "OR" | "or" | "$or" => Some(Combinator::Or),
        "NOR" | "nor" | "$nor" => Some(Combinator::Nor),
        _ => None,
    }
}

fn parse_arms(key: &str, value: Value) -> Result<Vec<Filter>, ValidationError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        Value::Null => Vec::new(),
        other => {
            return Err(ValidationError::InvalidFilter {
                field: key.to_string(),
                message: format!("combinator arms must be filter objects, got {}", other),
            });
        }
    };

    items
        .into_iter()
        .map(Filter::parse)
        .filter(|arm| !matches!(arm, Ok(f) if f.is_empty()))
        .collect()
}

/// Maps the public `id` alias onto the stored primary key.
pub fn canonical_field(field: &str) -> String {
    if field == "id" {
        "_id".to_string()
    } else {
        field.to_string()
    }
}
