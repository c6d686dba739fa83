//! Lowered predicates.
//!
//! After relationship aliases are resolved, a [`Filter`] is lowered against its
//! model into a [`Predicate`]: operands are coerced to the field kind, ordering
//! operands are normalized, negated operators become [`Predicate::Not`] and
//! empty arms disappear. Every backend compiles from this form, so the
//! semantics of the wire format are decided here once.

use std::collections::BTreeMap;

use serde_json::Value;

use super::filter::{Condition, Filter, Operator};
use crate::coerce::{Calculated, calculated_value, coerce_operand};
use crate::error::ValidationError;
use crate::model::Model;

/// Ordering comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl Comparison {
    /// SQL spelling of the comparison.
    pub fn sql(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
        }
    }

    /// MongoDB operator for the comparison.
    pub fn mongo(self) -> &'static str {
        match self {
            Comparison::Lt => "$lt",
            Comparison::Lte => "$lte",
            Comparison::Gt => "$gt",
            Comparison::Gte => "$gte",
        }
    }

    /// Evaluates the comparison on an ordering.
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Comparison::Lt => ordering == Less,
            Comparison::Lte => ordering != Greater,
            Comparison::Gt => ordering == Greater,
            Comparison::Gte => ordering != Less,
        }
    }
}

/// A backend-neutral boolean predicate over one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value; a null value matches null or absent fields.
    Eq(String, Value),
    /// Field compares to a normalized operand.
    Cmp(String, Comparison, Calculated),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Stored array contains every value.
    All(String, Vec<Value>),
    /// Field is present and non-null (`true`) or absent or null (`false`).
    Exists(String, bool),
    /// Field matches an unanchored regular expression.
    Regex(String, String),
    /// Field holds a value of the named type (only `date` is interpreted).
    Type(String, String),
    /// Negation; a predicate that cannot be decided for a record counts as false before negation.
    Not(Box<Predicate>),
    /// Conjunction; the empty conjunction is true.
    And(Vec<Predicate>),
    /// Disjunction.
    Or(Vec<Predicate>),
    /// None of the arms match.
    Nor(Vec<Predicate>),
}

impl Predicate {
    /// The predicate that matches every record.
    pub fn always() -> Self {
        Predicate::And(Vec::new())
    }

    /// Returns true when the predicate constrains nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Predicate::And(parts) if parts.iter().all(Predicate::is_empty))
    }

    /// Lowers a filter against `model`.
    ///
    /// Relationship conditions must have been resolved beforehand; one left in
    /// the tree names a field that is not a relationship alias.
    pub fn lower(model: &Model, filter: &Filter, strict: bool) -> Result<Self, ValidationError> {
        let mut parts = Vec::new();

        for (field, condition) in &filter.conditions {
            lower_condition(model, field, condition, strict, &mut parts)?;
        }

        for arm in &filter.and {
            let lowered = Self::lower(model, arm, strict)?;
            if !lowered.is_empty() {
                parts.push(lowered);
            }
        }

        let or = lower_arms(model, &filter.or, strict)?;
        if !or.is_empty() {
            parts.push(Predicate::Or(or));
        }

        let nor = lower_arms(model, &filter.nor, strict)?;
        if !nor.is_empty() {
            parts.push(Predicate::Nor(nor));
        }

        Ok(match parts.len() {
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        })
    }

    /// Names of every field the predicate references.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Eq(f, _)
            | Predicate::Cmp(f, _, _)
            | Predicate::In(f, _)
            | Predicate::All(f, _)
            | Predicate::Exists(f, _)
            | Predicate::Regex(f, _)
            | Predicate::Type(f, _) => out.push(f),
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::And(parts) | Predicate::Or(parts) | Predicate::Nor(parts) => {
                for p in parts {
                    p.collect_fields(out);
                }
            }
        }
    }
}

fn lower_arms(model: &Model, arms: &[Filter], strict: bool) -> Result<Vec<Predicate>, ValidationError> {
    let mut out = Vec::new();
    for arm in arms {
        let lowered = Predicate::lower(model, arm, strict)?;
        if !lowered.is_empty() {
            out.push(lowered);
        }
    }
    Ok(out)
}

fn lower_condition(
    model: &Model,
    field: &str,
    condition: &Condition,
    strict: bool,
    out: &mut Vec<Predicate>,
) -> Result<(), ValidationError> {
    let descriptor = model.field(field);

    match condition {
        Condition::Literal(Value::Array(items)) => {
            let values = as_list(coerce_operand(descriptor, Value::Array(items.clone())));
            out.push(Predicate::In(field.to_string(), values));
        }
        Condition::Literal(value) => {
            out.push(Predicate::Eq(
                field.to_string(),
                coerce_operand(descriptor, value.clone()),
            ));
        }
        Condition::Operators(ops) => {
            for (op, operand) in ops {
                let (positive, negated) = op.positive();
                let predicate = lower_operator(field, descriptor, positive, operand, strict)?;
                out.push(if negated {
                    Predicate::Not(Box::new(predicate))
                } else {
                    predicate
                });
            }
        }
        Condition::Relation(nested) => {
            if !nested.is_empty() {
                return Err(ValidationError::InvalidFilter {
                    field: field.to_string(),
                    message: format!(
                        "'{}' is neither a field nor a relationship of {}",
                        field,
                        model.name()
                    ),
                });
            }
        }
    }

    Ok(())
}

fn lower_operator(
    field: &str,
    descriptor: Option<&crate::model::FieldDescriptor>,
    op: Operator,
    operand: &Value,
    strict: bool,
) -> Result<Predicate, ValidationError> {
    let name = field.to_string();
    let predicate = match op {
        Operator::EqualTo | Operator::Options => {
            Predicate::Eq(name, coerce_operand(descriptor, operand.clone()))
        }
        Operator::LessThan
        | Operator::LessThanOrEqualTo
        | Operator::GreaterThan
        | Operator::GreaterThanOrEqualTo => {
            let comparison = match op {
                Operator::LessThan => Comparison::Lt,
                Operator::LessThanOrEqualTo => Comparison::Lte,
                Operator::GreaterThan => Comparison::Gt,
                _ => Comparison::Gte,
            };
            Predicate::Cmp(name, comparison, calculated_value(field, operand, strict)?)
        }
        Operator::In => Predicate::In(name, as_list(coerce_operand(descriptor, operand.clone()))),
        Operator::All => Predicate::All(name, as_list(coerce_operand(descriptor, operand.clone()))),
        Operator::Exists => Predicate::Exists(name, operand.as_bool().unwrap_or(true)),
        Operator::MatchesRegex => {
            Predicate::Regex(name, operand.as_str().unwrap_or_default().to_string())
        }
        Operator::Type => Predicate::Type(name, operand.as_str().unwrap_or_default().to_string()),
        Operator::NotEqualTo
        | Operator::NotLessThan
        | Operator::NotLessThanOrEqualTo
        | Operator::NotGreaterThan
        | Operator::NotGreaterThanOrEqualTo
        | Operator::NotIn => {
            return Err(ValidationError::InvalidFilter {
                field: field.to_string(),
                message: format!("'{}' must be lowered through its positive form", op),
            });
        }
    };
    Ok(predicate)
}

fn as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// Parses `asc`/`desc` (case-insensitive) and the numeric forms `1`/`-1`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "desc" | "descending" | "-1" => Direction::Desc,
            _ => Direction::Asc,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field to sort on.
    pub field: String,
    /// Direction.
    pub direction: Direction,
}

/// Grouping configuration: plain group-by fields plus raw stage expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    /// Fields grouped by value.
    pub fields: Vec<String>,
    /// Raw `$group` stage entries in insertion order.
    pub raw: Vec<(String, Value)>,
}

impl Grouping {
    /// Returns true when nothing is grouped.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.raw.is_empty()
    }

    /// Builds the `$group` stage document.
    ///
    /// Group-by fields and raw entries form the `_id` expression unless a raw
    /// entry is itself named `_id`, in which case the raw entries are the stage.
    pub fn stage(&self) -> serde_json::Map<String, Value> {
        let mut entries: BTreeMap<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.clone(), Value::String(format!("${}", f))))
            .collect();
        for (key, expr) in &self.raw {
            entries.insert(key.clone(), expr.clone());
        }

        if entries.contains_key("_id") {
            entries.into_iter().collect()
        } else {
            let mut stage = serde_json::Map::new();
            stage.insert("_id".to_string(), Value::Object(entries.into_iter().collect()));
            stage
        }
    }
}

/// A fully lowered read: what every backend primitive receives.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Row predicate.
    pub predicate: Predicate,
    /// Sort keys, before the backend's default tiebreaker.
    pub order: Vec<SortKey>,
    /// Fields whose distinct combinations are counted.
    pub distinct: Vec<String>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: u64,
}

impl Selection {
    /// A selection over the given predicate with no ordering or paging.
    pub fn matching(predicate: Predicate) -> Self {
        Self {
            predicate,
            order: Vec::new(),
            distinct: Vec::new(),
            limit: None,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use serde_json::json;

    fn order_model() -> std::sync::Arc<Model> {
        let registry = ModelRegistry::from_json(&json!({
            "orders": {
                "status": {"type": "string"},
                "total": {"type": "number"},
                "placedAt": {"type": "date"}
            }
        }))
        .unwrap();
        registry.get("Order").unwrap()
    }

    #[test]
    fn test_lower_literals() {
        let model = order_model();
        let filter = Filter::parse(json!({"status": "paid", "total": "12"})).unwrap();
        let predicate = Predicate::lower(&model, &filter, false).unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::Eq("status".into(), json!("paid")),
                Predicate::Eq("total".into(), json!(12)),
            ])
        );
    }

    #[test]
    fn test_lower_negations_and_ordering() {
        let model = order_model();
        let filter = Filter::parse(json!({
            "total": {"notLessThan": "5"},
            "status": {"notIn": "void"}
        }))
        .unwrap();
        let predicate = Predicate::lower(&model, &filter, false).unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::Not(Box::new(Predicate::In("status".into(), vec![json!("void")]))),
                Predicate::Not(Box::new(Predicate::Cmp(
                    "total".into(),
                    Comparison::Lt,
                    Calculated::Number(5.0)
                ))),
            ])
        );
    }

    #[test]
    fn test_lower_combinators_drop_empty_arms() {
        let model = order_model();
        let filter = Filter::parse(json!({
            "OR": [{"status": "paid"}, {"status": {}}],
            "NOR": [{}]
        }))
        .unwrap();
        let predicate = Predicate::lower(&model, &filter, false).unwrap();
        assert_eq!(
            predicate,
            Predicate::Or(vec![Predicate::Eq("status".into(), json!("paid"))])
        );
    }

    #[test]
    fn test_empty_filter_lowers_to_always() {
        let model = order_model();
        let predicate = Predicate::lower(&model, &Filter::new(), false).unwrap();
        assert!(predicate.is_empty());
        assert_eq!(predicate, Predicate::always());
    }

    #[test]
    fn test_unresolved_relation_is_rejected() {
        let model = order_model();
        let filter = Filter::parse(json!({"customer": {"name": "Ann"}})).unwrap();
        let err = Predicate::lower(&model, &filter, false).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFilter { .. }));
    }

    #[test]
    fn test_strict_coercion() {
        let model = order_model();
        let filter = Filter::parse(json!({"placedAt": {"greaterThan": "soon"}})).unwrap();
        assert!(Predicate::lower(&model, &filter, true).is_err());
        assert!(Predicate::lower(&model, &filter, false).is_ok());
    }

    #[test]
    fn test_grouping_stage() {
        let grouping = Grouping {
            fields: vec!["status".into()],
            raw: vec![],
        };
        assert_eq!(
            Value::Object(grouping.stage()),
            json!({"_id": {"status": "$status"}})
        );

        let grouping = Grouping {
            fields: vec![],
            raw: vec![
                ("_id".into(), json!({"group": "$status"})),
                ("total".into(), json!({"$sum": 1})),
            ],
        };
        assert_eq!(
            Value::Object(grouping.stage()),
            json!({"_id": {"group": "$status"}, "total": {"$sum": 1}})
        );
    }
}
