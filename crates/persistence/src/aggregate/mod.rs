//! Chart aggregation.
//!
//! [`ChartParams`] reads the chart description out of free-form request
//! parameters, checks it against the model and turns it into grouping on a
//! [`QuerySpec`]. The grouped query itself runs through
//! [`ModelQuery::graph`](crate::engine::ModelQuery::graph).
//!
//! Bucket keys live under `_id`:
//!
//! | periodicity | breakdown | `_id` |
//! |-------------|-----------|-------|
//! | set | set | `{period, group}` |
//! | set | unset | `{period}` |
//! | `NONE` | set | `{group, dimension}` |
//! | `NONE` | unset | `{dimension}` |
//!
//! Period buckets add a `$type: date` guard on the dimension so records
//! without a date never form a bucket of their own.

use std::fmt;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::backends::Record;
use crate::error::ValidationError;
use crate::model::Model;
use crate::query::QuerySpec;

/// Chart layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    /// One value per dimension option.
    Pie,
    /// Series over a dimension, the default.
    Linear,
}

impl ChartKind {
    /// Parses the `type` parameter; anything but `PIE` is linear.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("pie") {
            ChartKind::Pie
        } else {
            ChartKind::Linear
        }
    }
}

/// Time bucket size for date dimensions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Periodicity {
    /// No time bucketing.
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Periodicity {
    /// Parses the `periodicity` parameter, case-insensitively.
    ///
    /// Unknown spellings mean no bucketing.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "HOURLY" => Periodicity::Hourly,
            "DAILY" => Periodicity::Daily,
            "WEEKLY" => Periodicity::Weekly,
            "MONTHLY" => Periodicity::Monthly,
            "YEARLY" => Periodicity::Yearly,
            _ => Periodicity::None,
        }
    }

    /// `$dateToString` format of the bucket, `None` when not bucketing.
    pub fn format(self) -> Option<&'static str> {
        match self {
            Periodicity::None => None,
            Periodicity::Hourly => Some("%Y-%m-%d %H:00"),
            Periodicity::Daily => Some("%Y-%m-%d"),
            Periodicity::Weekly => Some("%V-Week-%Y"),
            Periodicity::Monthly => Some("%Y-%m"),
            Periodicity::Yearly => Some("%Y"),
        }
    }
}

impl fmt::Display for Periodicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Periodicity::None => "NONE",
            Periodicity::Hourly => "HOURLY",
            Periodicity::Daily => "DAILY",
            Periodicity::Weekly => "WEEKLY",
            Periodicity::Monthly => "MONTHLY",
            Periodicity::Yearly => "YEARLY",
        };
        f.write_str(name)
    }
}

/// How each bucket is totalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Total {
    /// Number of records, the default.
    Count,
    /// Sum of the metric.
    Sum,
    /// Largest metric value.
    Max,
    /// Smallest metric value.
    Min,
    /// Mean of the metric.
    Average,
}

impl Total {
    /// Parses `runningCalculation`/`total`; unknown spellings count.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "SUM" => Total::Sum,
            "MAX" => Total::Max,
            "MIN" => Total::Min,
            "AVG" | "AVERAGE" => Total::Average,
            _ => Total::Count,
        }
    }

    fn accumulator(self) -> Option<&'static str> {
        match self {
            Total::Count => None,
            Total::Sum => Some("$sum"),
            Total::Max => Some("$max"),
            Total::Min => Some("$min"),
            Total::Average => Some("$avg"),
        }
    }
}

/// A validated-on-demand chart description.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartParams {
    /// Chart layout.
    pub kind: ChartKind,
    /// Time bucketing of the dimension.
    pub periodicity: Periodicity,
    /// Field the chart is laid out along.
    pub dimension: Option<String>,
    /// Field splitting each bucket into series.
    pub breakdown: Option<String>,
    /// Field the total is computed from.
    pub metric: Option<String>,
    /// Bucket total.
    pub total: Total,
}

impl Default for ChartParams {
    fn default() -> Self {
        Self {
            kind: ChartKind::Linear,
            periodicity: Periodicity::None,
            dimension: None,
            breakdown: None,
            metric: None,
            total: Total::Count,
        }
    }
}

impl ChartParams {
    /// Reads chart parameters, trying each alias in turn.
    ///
    /// `dimension`, then `xAxis`, then `targetKey` name the dimension;
    /// `dimensionBreakdown` or `groupBy` the breakdown. A pie chart takes its
    /// metric from `metric` or `targetKey`, other charts from `metric` or `yAxis`.
    pub fn from_params(params: &Map<String, Value>) -> Self {
        let kind = ChartKind::parse(&param(params, &["type"]).unwrap_or_default());
        let metric = match kind {
            ChartKind::Pie => param(params, &["metric", "targetKey"]),
            ChartKind::Linear => param(params, &["metric", "yAxis"]),
        };

        Self {
            kind,
            periodicity: Periodicity::parse(&param(params, &["periodicity"]).unwrap_or_default()),
            dimension: param(params, &["dimension", "xAxis", "targetKey"]),
            breakdown: param(params, &["dimensionBreakdown", "groupBy"]),
            metric,
            total: Total::parse(&param(params, &["runningCalculation", "total"]).unwrap_or_default()),
        }
    }

    /// Checks the parameters against `model`.
    pub fn validate(&self, model: &Model) -> Result<(), ValidationError> {
        let dimension = self.dimension.as_deref().unwrap_or_default();
        let categorical = model.option_fields().iter().any(|f| f == dimension)
            || model.parent_keys().iter().any(|f| f == dimension);

        match (self.kind, self.periodicity) {
            (ChartKind::Linear, Periodicity::None) => {
                if !categorical {
                    return Err(not_categorical(model));
                }
                if self.breakdown.is_none() {
                    return Err(chart_error(
                        r#"Field "dimensionBreakdown" is required when "periodicity" is NONE"#,
                    ));
                }
            }
            (ChartKind::Linear, _) => {
                if !model.date_fields().iter().any(|f| f == dimension) {
                    return Err(chart_error(r#"Field "dimension" must be date / time"#));
                }
            }
            (ChartKind::Pie, _) => {
                if !categorical {
                    return Err(not_categorical(model));
                }
            }
        }

        if self.total != Total::Count && self.metric.is_none() {
            return Err(chart_error(r#"Field "metric" is required unless counting"#));
        }
        Ok(())
    }

    /// Periodicity in effect; pie charts never bucket by time.
    pub fn effective_periodicity(&self) -> Periodicity {
        match self.kind {
            ChartKind::Pie => Periodicity::None,
            ChartKind::Linear => self.periodicity,
        }
    }

    /// Validates and adds the grouping to `spec`.
    pub fn configure(&self, model: &Model, spec: &mut QuerySpec) -> Result<(), ValidationError> {
        self.validate(model)?;

        let mut key = Map::new();
        if let Some(format) = self.effective_periodicity().format() {
            let dimension = self.dimension.as_deref().unwrap_or_default();
            key.insert(
                "period".to_string(),
                json!({"$dateToString": {"format": format, "date": format!("${}", dimension)}}),
            );
            spec.where_field(dimension, json!({"$type": "date"}))?;
        } else if let Some(dimension) = &self.dimension {
            key.insert("dimension".to_string(), Value::String(format!("${}", dimension)));
        }
        if let Some(breakdown) = &self.breakdown {
            key.insert("group".to_string(), Value::String(format!("${}", breakdown)));
        }

        let total = match (self.total.accumulator(), &self.metric) {
            (Some(accumulator), Some(metric)) => json!({ accumulator: format!("${}", metric) }),
            _ => json!({"$sum": 1}),
        };

        debug!(
            model = %model.name(),
            periodicity = %self.effective_periodicity(),
            key = %serde_json::Value::Object(key.clone()),
            total = %total,
            "configured chart grouping"
        );

        spec.group_by_raw("_id", Value::Object(key));
        spec.group_by_raw("total", total);
        Ok(())
    }
}

/// Moves the parts of each row's `_id` onto the row itself.
///
/// A scalar `_id` is left in place.
pub fn flatten(rows: Vec<Record>) -> Vec<Record> {
    rows.into_iter()
        .map(|mut row| {
            if let Some(Value::Object(parts)) = row.get("_id").cloned() {
                row.remove("_id");
                for (key, value) in parts {
                    row.entry(key).or_insert(value);
                }
            }
            row
        })
        .collect()
}

fn param(params: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match params.get(*name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn chart_error(message: &str) -> ValidationError {
    ValidationError::InvalidChart {
        message: message.to_string(),
    }
}

fn not_categorical(model: &Model) -> ValidationError {
    ValidationError::InvalidChart {
        message: format!(
            r#"Field "dimension" must be one of these ({})"#,
            model
                .option_fields()
                .iter()
                .chain(model.parent_keys())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use std::sync::Arc;

    fn order_model() -> Arc<Model> {
        ModelRegistry::from_json(&json!({
            "customers": {"name": {}},
            "orders": {
                "status": {"options": ["open", "paid"]},
                "customerId": {"foreignKey": "customers.id"},
                "total": {"type": "float"},
                "placedAt": {"type": "date"}
            }
        }))
        .unwrap()
        .get("Order")
        .unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_aliases() {
        let chart = ChartParams::from_params(&params(json!({
            "xAxis": "placedAt",
            "groupBy": "status",
            "yAxis": "total",
            "total": "avg",
            "periodicity": "monthly"
        })));
        assert_eq!(chart.kind, ChartKind::Linear);
        assert_eq!(chart.dimension.as_deref(), Some("placedAt"));
        assert_eq!(chart.breakdown.as_deref(), Some("status"));
        assert_eq!(chart.metric.as_deref(), Some("total"));
        assert_eq!(chart.total, Total::Average);
        assert_eq!(chart.periodicity, Periodicity::Monthly);

        let pie = ChartParams::from_params(&params(json!({"type": "PIE", "targetKey": "status"})));
        assert_eq!(pie.kind, ChartKind::Pie);
        assert_eq!(pie.dimension.as_deref(), Some("status"));
        assert_eq!(pie.metric.as_deref(), Some("status"));
        assert_eq!(pie.total, Total::Count);
    }

    #[test]
    fn test_validation() {
        let model = order_model();

        let chart = ChartParams {
            dimension: Some("status".into()),
            periodicity: Periodicity::Daily,
            ..Default::default()
        };
        let err = chart.validate(&model).unwrap_err();
        assert!(err.to_string().contains("must be date / time"));

        let chart = ChartParams {
            dimension: Some("customerId".into()),
            ..Default::default()
        };
        let err = chart.validate(&model).unwrap_err();
        assert!(err.to_string().contains("dimensionBreakdown"));

        let chart = ChartParams {
            kind: ChartKind::Pie,
            dimension: Some("total".into()),
            ..Default::default()
        };
        let err = chart.validate(&model).unwrap_err();
        assert!(err.to_string().contains("status, customerId"));

        let chart = ChartParams {
            kind: ChartKind::Pie,
            dimension: Some("status".into()),
            total: Total::Sum,
            ..Default::default()
        };
        assert!(chart.validate(&model).is_err());
    }

    #[test]
    fn test_period_grouping() {
        let model = order_model();
        let chart = ChartParams {
            dimension: Some("placedAt".into()),
            breakdown: Some("status".into()),
            metric: Some("total".into()),
            total: Total::Sum,
            periodicity: Periodicity::Weekly,
            ..Default::default()
        };
        let mut spec = QuerySpec::new();
        chart.configure(&model, &mut spec).unwrap();

        let stage = spec.grouping().stage();
        assert_eq!(
            stage["_id"],
            json!({
                "period": {"$dateToString": {"format": "%V-Week-%Y", "date": "$placedAt"}},
                "group": "$status"
            })
        );
        assert_eq!(stage["total"], json!({"$sum": "$total"}));
        assert_eq!(spec.filter().to_value(), json!({"placedAt": {"$type": "date"}}));
    }

    #[test]
    fn test_categorical_grouping_counts() {
        let model = order_model();
        let chart = ChartParams {
            dimension: Some("status".into()),
            breakdown: Some("customerId".into()),
            ..Default::default()
        };
        let mut spec = QuerySpec::new();
        chart.configure(&model, &mut spec).unwrap();

        let stage = spec.grouping().stage();
        assert_eq!(stage["_id"], json!({"dimension": "$status", "group": "$customerId"}));
        assert_eq!(stage["total"], json!({"$sum": 1}));
        assert!(spec.filter().is_empty());
    }

    #[test]
    fn test_flatten() {
        let rows = vec![
            params(json!({"_id": {"period": "2024-03", "group": "paid"}, "total": 3})),
            params(json!({"_id": "scalar", "total": 1})),
        ];
        let rows = flatten(rows);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"period": "2024-03", "group": "paid", "total": 3})
        );
        assert_eq!(Value::Object(rows[1].clone()), json!({"_id": "scalar", "total": 1}));
    }
}
