//! Predicate and record conversion to BSON.
//!
//! Everything here is pure, so the documents sent to the server can be
//! checked without one.

use chrono::{TimeZone, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, DateTime, Document, doc};
use serde_json::{Map, Value};

use crate::backends::{Accumulator, Record};
use crate::coerce::{Calculated, float_value, format_timestamp, parse_timestamp};
use crate::model::{FieldKind, Model, PRIMARY_KEY};
use crate::query::{Direction, Grouping, Predicate, Selection};

/// Converts JSON to BSON without interpreting strings.
pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Bson::Int64(i),
            None => Bson::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_bson(v)))
                .collect(),
        ),
    }
}

/// Converts BSON back to the engine's JSON conventions.
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(f) => float_value(f),
        Bson::String(s) => Value::String(s),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => match Utc.timestamp_millis_opt(dt.timestamp_millis()).single() {
            Some(ts) => Value::String(format_timestamp(&ts)),
            None => Value::Null,
        },
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(document_to_record(doc)),
        other => other.into_relaxed_extjson(),
    }
}

/// Converts a stored document to a record.
pub fn document_to_record(doc: Document) -> Record {
    doc.into_iter().map(|(k, v)| (k, bson_to_json(v))).collect::<Map<_, _>>()
}

/// Promotes a 24-hex string to an `ObjectId`; anything else converts as is.
pub fn identifier(value: &Value) -> Bson {
    match value {
        Value::String(s) => match ObjectId::parse_str(s) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => Bson::String(s.clone()),
        },
        Value::Array(items) => Bson::Array(items.iter().map(identifier).collect()),
        other => json_to_bson(other),
    }
}

fn date(value: &Value) -> Bson {
    match value {
        Value::String(s) => match parse_timestamp(s) {
            Some(ts) => Bson::DateTime(DateTime::from_millis(ts.timestamp_millis())),
            None => Bson::String(s.clone()),
        },
        Value::Array(items) => Bson::Array(items.iter().map(date).collect()),
        other => json_to_bson(other),
    }
}

/// Converts a field value using the field's storage conventions.
pub fn field_value(model: &Model, field: &str, value: &Value) -> Bson {
    if model.is_identifier_field(field) {
        return identifier(value);
    }
    match model.field(field).map(|f| f.kind) {
        Some(FieldKind::Date) => date(value),
        _ => json_to_bson(value),
    }
}

/// Converts a record for writing.
pub fn record_to_document(model: &Model, record: &Record) -> Document {
    record
        .iter()
        .filter(|(k, _)| k.as_str() != "id")
        .map(|(k, v)| (k.clone(), field_value(model, k, v)))
        .collect()
}

fn operand(model: &Model, field: &str, value: &Calculated) -> Bson {
    match value {
        Calculated::Number(n) => json_to_bson(&float_value(*n)),
        Calculated::Timestamp(ts) => match model.field(field).map(|f| f.kind) {
            Some(FieldKind::Date) => Bson::DateTime(DateTime::from_millis(ts.timestamp_millis())),
            _ => Bson::String(format_timestamp(ts)),
        },
    }
}

/// Compiles a predicate into a query document.
pub fn compile(model: &Model, predicate: &Predicate) -> Document {
    match predicate {
        Predicate::Eq(field, value) => {
            doc! { field: { "$eq": field_value(model, field, value) } }
        }
        Predicate::Cmp(field, comparison, value) => {
            if !value.comparable_with(model.field(field).map(|f| f.kind)) {
                return doc! { field: { "$in": Bson::Array(Vec::new()) } };
            }
            doc! { field: { comparison.mongo(): operand(model, field, value) } }
        }
        Predicate::In(field, values) => {
            let values: Vec<Bson> = values.iter().map(|v| field_value(model, field, v)).collect();
            doc! { field: { "$in": values } }
        }
        Predicate::All(field, values) => {
            let values: Vec<Bson> = values.iter().map(|v| field_value(model, field, v)).collect();
            doc! { field: { "$all": values } }
        }
        Predicate::Exists(field, true) => doc! { field: { "$exists": true, "$ne": Bson::Null } },
        Predicate::Exists(field, false) => doc! { field: { "$eq": Bson::Null } },
        Predicate::Regex(field, pattern) => doc! { field: { "$regex": pattern.as_str() } },
        Predicate::Type(field, type_name) => doc! { field: { "$type": type_name.as_str() } },
        Predicate::Not(inner) => doc! { "$nor": [compile(model, inner)] },
        Predicate::And(parts) => match parts.as_slice() {
            [] => Document::new(),
            [single] => compile(model, single),
            parts => doc! { "$and": compile_all(model, parts) },
        },
        Predicate::Or(parts) => doc! { "$or": compile_all(model, parts) },
        Predicate::Nor(parts) => doc! { "$nor": compile_all(model, parts) },
    }
}

fn compile_all(model: &Model, parts: &[Predicate]) -> Vec<Document> {
    parts.iter().map(|p| compile(model, p)).collect()
}

/// Sort document: the requested keys, then `_id`.
pub fn sort(selection: &Selection) -> Document {
    let mut sort = Document::new();
    for key in &selection.order {
        let direction = match key.direction {
            Direction::Asc => 1,
            Direction::Desc => -1,
        };
        sort.insert(key.field.clone(), direction);
    }
    if !sort.contains_key(PRIMARY_KEY) {
        sort.insert(PRIMARY_KEY, 1);
    }
    sort
}

/// Pipeline counting distinct combinations of the selection's distinct fields.
pub fn distinct_count_pipeline(model: &Model, selection: &Selection) -> Vec<Document> {
    let mut key = Document::new();
    for (i, field) in selection.distinct.iter().enumerate() {
        key.insert(format!("d{}", i), format!("${}", field));
    }
    vec![
        doc! { "$match": compile(model, &selection.predicate) },
        doc! { "$group": { "_id": key } },
        doc! { "$count": "n" },
    ]
}

/// Pipeline computing one scalar aggregate.
pub fn aggregate_pipeline(
    model: &Model,
    predicate: &Predicate,
    accumulator: Accumulator,
    field: &str,
) -> Vec<Document> {
    let operator = match accumulator {
        Accumulator::Sum => "$sum",
        Accumulator::Max => "$max",
        Accumulator::Min => "$min",
        Accumulator::Avg => "$avg",
    };
    vec![
        doc! { "$match": compile(model, predicate) },
        doc! { "$group": { "_id": Bson::Null, "value": { operator: format!("${}", field) } } },
    ]
}

/// Pipeline running a grouped query, ordered by the selection then group key, and paged.
pub fn group_pipeline(model: &Model, selection: &Selection, grouping: &Grouping) -> Vec<Document> {
    let stage = match json_to_bson(&Value::Object(grouping.stage())) {
        Bson::Document(stage) => stage,
        _ => Document::new(),
    };
    let mut pipeline = vec![
        doc! { "$match": compile(model, &selection.predicate) },
        doc! { "$group": stage },
        doc! { "$sort": sort(selection) },
    ];
    if selection.offset > 0 {
        pipeline.push(doc! { "$skip": selection.offset as i64 });
    }
    if let Some(limit) = selection.limit {
        pipeline.push(doc! { "$limit": limit as i64 });
    }
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use crate::query::{Filter, SortKey};
    use serde_json::json;
    use std::sync::Arc;

    fn order_model() -> Arc<Model> {
        ModelRegistry::from_json(&json!({
            "customers": {"name": {"type": "string"}},
            "orders": {
                "status": {"type": "string"},
                "total": {"type": "number"},
                "placedAt": {"type": "date"},
                "customerId": {"type": "id", "foreignKey": "customers.id"}
            }
        }))
        .unwrap()
        .get("Order")
        .unwrap()
    }

    fn compiled(model: &Model, filter: Value) -> Document {
        let predicate = Predicate::lower(model, &Filter::parse(filter).unwrap(), false).unwrap();
        compile(model, &predicate)
    }

    #[test]
    fn test_compile_equality_and_negation() {
        let model = order_model();
        let doc = compiled(&model, json!({"status": {"notEqualTo": "void"}}));
        assert_eq!(doc, doc! { "$nor": [{ "status": { "$eq": "void" } }] });

        let doc = compiled(&model, json!({"status": "NULL"}));
        assert_eq!(doc, doc! { "status": { "$eq": Bson::Null } });
    }

    #[test]
    fn test_compile_promotes_identifiers() {
        let model = order_model();
        let hex = "65a1f0c2e4b0a1b2c3d4e5f6";
        let doc = compiled(&model, json!({"customerId": hex, "_id": "plain"}));
        let oid = ObjectId::parse_str(hex).unwrap();
        assert_eq!(
            doc,
            doc! { "$and": [
                { "_id": { "$eq": "plain" } },
                { "customerId": { "$eq": oid } },
            ] }
        );
    }

    #[test]
    fn test_compile_dates_and_combinators() {
        let model = order_model();
        let doc = compiled(
            &model,
            json!({"OR": [{"placedAt": {"greaterThan": "2024-01-01"}}, {"total": {"exists": false}}]}),
        );
        let since = DateTime::from_millis(
            parse_timestamp("2024-01-01").unwrap().timestamp_millis(),
        );
        assert_eq!(
            doc,
            doc! { "$or": [
                { "placedAt": { "$gt": since } },
                { "total": { "$eq": Bson::Null } },
            ] }
        );
    }

    #[test]
    fn test_empty_predicate_is_empty_document() {
        let model = order_model();
        assert!(compile(&model, &Predicate::always()).is_empty());
    }

    #[test]
    fn test_round_trip_conventions() {
        let model = order_model();
        let record = json!({
            "_id": "65a1f0c2e4b0a1b2c3d4e5f6",
            "placedAt": "2024-03-05T10:20:30.000Z",
            "total": 3,
            "status": "paid"
        })
        .as_object()
        .cloned()
        .unwrap();

        let doc = record_to_document(&model, &record);
        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));
        assert!(matches!(doc.get("placedAt"), Some(Bson::DateTime(_))));

        let back = document_to_record(doc);
        assert_eq!(Value::Object(back), Value::Object(record));
    }

    #[test]
    fn test_sort_and_group_pipeline() {
        let model = order_model();
        let mut selection = Selection::matching(Predicate::always());
        selection.order = vec![SortKey {
            field: "total".into(),
            direction: Direction::Desc,
        }];
        assert_eq!(sort(&selection), doc! { "total": -1, "_id": 1 });

        selection.limit = Some(5);
        let grouping = Grouping {
            fields: vec!["status".into()],
            raw: vec![("count".into(), json!({"$sum": 1}))],
        };
        let pipeline = group_pipeline(&model, &selection, &grouping);
        assert_eq!(
            pipeline[1],
            doc! { "$group": { "_id": { "count": { "$sum": 1_i64 }, "status": "$status" } } }
        );
        assert_eq!(pipeline[2], doc! { "$sort": { "total": -1, "_id": 1 } });
        assert_eq!(pipeline.last(), Some(&doc! { "$limit": 5_i64 }));
    }

    #[test]
    fn test_incomparable_operands_never_match() {
        let model = order_model();
        let never = doc! { "total": { "$in": Bson::Array(Vec::new()) } };
        assert_eq!(compiled(&model, json!({"total": {"lessThan": "garbage"}})), never);
        assert_eq!(
            compiled(&model, json!({"total": {"notLessThan": "garbage"}})),
            doc! { "$nor": [never] }
        );
        assert_eq!(
            compiled(&model, json!({"placedAt": {"greaterThan": 5}})),
            doc! { "placedAt": { "$in": Bson::Array(Vec::new()) } }
        );
    }

    #[test]
    fn test_ordering_operands_are_coerced() {
        let model = order_model();
        assert_eq!(
            compiled(&model, json!({"total": {"greaterThan": "8"}})),
            doc! { "total": { "$gt": 8_i64 } }
        );
        let since = DateTime::from_millis(
            parse_timestamp("2024-02-01").unwrap().timestamp_millis(),
        );
        assert_eq!(
            compiled(&model, json!({"placedAt": {"greaterThanOrEqualTo": "2024-02-01"}})),
            doc! { "placedAt": { "$gte": since } }
        );
    }
}
