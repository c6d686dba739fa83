//! Shaping records on their way into and out of storage.

use serde_json::{Map, Value};

use crate::backends::Record;
use crate::coerce::{coerce_input, identifier_value, is_empty};
use crate::error::{StorageResult, ValidationError};
use crate::model::{Model, PRIMARY_KEY, TENANT_FIELD};

/// Stamps identity and removes protected fields.
pub fn present(model: &Model, mut record: Record) -> Record {
    let id = record.get(PRIMARY_KEY).cloned().unwrap_or(Value::Null);
    record.insert("id".to_string(), id);
    record.insert(
        "_collection".to_string(),
        Value::String(model.collection().to_string()),
    );
    record.insert("_model".to_string(), Value::String(model.name().to_string()));
    for field in model.protected_fields() {
        record.remove(field);
    }
    record
}

/// Builds a full record for insertion.
///
/// Every stored field is present: supplied values are coerced to their kind,
/// missing ones take the field default. An `id` or `_id` in the input becomes
/// the primary key; otherwise the backend assigns one.
pub fn create_input(model: &Model, input: &Map<String, Value>, tenant: Option<&str>) -> Record {
    let mut record = Record::new();

    if let Some(id) = ["id", PRIMARY_KEY]
        .iter()
        .filter_map(|key| input.get(*key))
        .find(|value| !is_empty(value))
    {
        record.insert(PRIMARY_KEY.to_string(), identifier_value(id.clone()));
    }

    for field in model.stored_fields() {
        let value = input
            .get(&field.name)
            .cloned()
            .unwrap_or_else(|| field.default_value.clone());
        record.insert(field.name.clone(), coerce_input(field, value));
    }

    if let Some(tenant) = tenant {
        record.insert(TENANT_FIELD.to_string(), Value::String(tenant.to_string()));
    }
    record
}

/// Builds the change set of an update: only supplied stored fields, coerced.
pub fn update_input(model: &Model, input: &Map<String, Value>) -> Record {
    model
        .stored_fields()
        .filter_map(|field| {
            input
                .get(&field.name)
                .map(|value| (field.name.clone(), coerce_input(field, value.clone())))
        })
        .collect()
}

/// Requires a mutation payload to be an object.
pub fn expect_object(value: Value) -> StorageResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ValidationError::InvalidInput {
            message: format!("expected an object, got {}", other),
        }
        .into()),
    }
}

/// Reads a hook replacement back as a list of records.
pub fn expect_records(value: Value) -> StorageResult<Vec<Record>> {
    match value {
        Value::Array(items) => items.into_iter().map(expect_object).collect(),
        Value::Object(map) => Ok(vec![map]),
        Value::Null => Ok(Vec::new()),
        other => Err(ValidationError::InvalidInput {
            message: format!("expected records, got {}", other),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn user_model() -> Arc<Model> {
        ModelRegistry::from_json(&json!({
            "users": {
                "name": {"required": true},
                "password": {"protected": true},
                "age": {"type": "int"},
                "active": {"type": "bool"},
                "tags": {"type": "array"},
                "tenantId": {"type": "id"}
            }
        }))
        .unwrap()
        .get("User")
        .unwrap()
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_present_stamps_and_redacts() {
        let model = user_model();
        let record = present(&model, map(json!({"_id": "u1", "name": "Ann", "password": "x"})));
        assert_eq!(record["id"], json!("u1"));
        assert_eq!(record["_collection"], json!("users"));
        assert_eq!(record["_model"], json!("User"));
        assert!(!record.contains_key("password"));
    }

    #[test]
    fn test_create_input_fills_defaults() {
        let model = user_model();
        let record = create_input(&model, &map(json!({"name": "Ann", "age": "41.9", "id": 7})), Some("t1"));
        assert_eq!(record["_id"], json!("7"));
        assert_eq!(record["age"], json!(41));
        assert_eq!(record["active"], json!(false));
        assert_eq!(record["tags"], json!([]));
        assert_eq!(record["tenantId"], json!("t1"));
        assert!(!record.contains_key("id"));
    }

    #[test]
    fn test_update_input_keeps_supplied_fields() {
        let model = user_model();
        let changes = update_input(&model, &map(json!({"active": "true", "id": "x", "unknown": 1})));
        assert_eq!(Value::Object(changes), json!({"active": true}));
    }

    #[test]
    fn test_expect_records() {
        assert_eq!(expect_records(json!({"a": 1})).unwrap().len(), 1);
        assert_eq!(expect_records(json!([{"a": 1}, {"b": 2}])).unwrap().len(), 2);
        assert!(expect_records(json!([1])).is_err());
    }
}
