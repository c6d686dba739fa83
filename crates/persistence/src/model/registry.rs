//! The model registry.
//!
//! Building happens in two passes. The first pass parses every collection into
//! a [`Model`]; the second wires relationship aliases in both directions, once
//! every model exists, so declaration order never matters. An edge into a model
//! that was never declared is logged and skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::descriptor::Model;
use super::field::{FieldDescriptor, FieldSpec, ForeignKey};
use crate::error::{ConfigurationError, StorageResult};
use crate::naming;

/// Declarative structure: collection → field → field specification.
pub type StructureSpec = BTreeMap<String, BTreeMap<String, FieldSpec>>;

/// Immutable set of models, shared by every operation.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<Model>>,
}

impl ModelRegistry {
    /// Builds the registry from a typed structure.
    pub fn build(structure: &StructureSpec) -> StorageResult<Self> {
        let mut models: BTreeMap<String, Model> = BTreeMap::new();

        for (collection, field_specs) in structure {
            let mut fields = BTreeMap::new();
            for (name, spec) in field_specs {
                let field = FieldDescriptor::from_spec(collection, name, spec)?;
                fields.insert(name.clone(), field);
            }

            let model = Model::new(collection, fields);
            if models.contains_key(model.name()) {
                return Err(ConfigurationError::MalformedStructure {
                    message: format!(
                        "collection '{}' maps to model '{}', which is already declared",
                        collection,
                        model.name()
                    ),
                }
                .into());
            }
            models.insert(model.name().to_string(), model);
        }

        wire_relationships(&mut models);

        debug!(models = models.len(), "built model registry");

        Ok(Self {
            models: models
                .into_iter()
                .map(|(name, model)| (name, Arc::new(model)))
                .collect(),
        })
    }

    /// Builds the registry from a JSON structure document.
    pub fn from_json(structure: &Value) -> StorageResult<Self> {
        let collections = structure.as_object().ok_or_else(|| {
            ConfigurationError::MalformedStructure {
                message: "expected an object of collections".to_string(),
            }
        })?;

        let mut typed = StructureSpec::new();
        for (collection, fields) in collections {
            let fields = fields.as_object().ok_or_else(|| {
                ConfigurationError::MalformedStructure {
                    message: format!("collection '{}' must be an object of fields", collection),
                }
            })?;

            let mut specs = BTreeMap::new();
            for (name, spec) in fields {
                let spec: FieldSpec = serde_json::from_value(spec.clone()).map_err(|e| {
                    ConfigurationError::MalformedField {
                        collection: collection.clone(),
                        field: name.clone(),
                        message: e.to_string(),
                    }
                })?;
                specs.insert(name.clone(), spec);
            }
            typed.insert(collection.clone(), specs);
        }

        Self::build(&typed)
    }

    /// Looks up a model by model name, collection name or any case variant of either.
    pub fn get(&self, name: &str) -> Option<Arc<Model>> {
        self.models
            .get(name)
            .or_else(|| self.models.get(&naming::model_name(name)))
            .cloned()
    }

    /// Like [`get`](Self::get), failing with a configuration error on a miss.
    pub fn require(&self, name: &str) -> StorageResult<Arc<Model>> {
        self.get(name).ok_or_else(|| {
            ConfigurationError::UnknownModel {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Returns true when a model resolves for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All models in name order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true when no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn wire_relationships(models: &mut BTreeMap<String, Model>) {
    let mut edges: Vec<(String, ForeignKey)> = Vec::new();
    for model in models.values() {
        for field in model.fields().values() {
            if let Some(fk) = &field.foreign_key {
                edges.push((model.name().to_string(), fk.clone()));
            }
        }
    }

    for (child_name, fk) in edges {
        if !models.contains_key(&fk.model_name) {
            warn!(
                model = %child_name,
                field = %fk.foreign_key,
                related = %fk.model_name,
                "foreign key references an unknown model, relationship disabled"
            );
            continue;
        }

        let parent_alias = naming::parent_alias(&fk.foreign_key);
        if let Some(child) = models.get_mut(&child_name) {
            if !child.add_parent(parent_alias.clone(), fk.clone()) {
                warn!(model = %child_name, alias = %parent_alias, "parent alias already taken");
            }
        }

        let child_alias = naming::child_alias(&fk.model_name, &child_name, &fk.foreign_key);
        let reciprocal = ForeignKey {
            model_name: child_name.clone(),
            primary_key: fk.primary_key.clone(),
            foreign_key: fk.foreign_key.clone(),
        };
        if let Some(parent) = models.get_mut(&fk.model_name) {
            if !parent.add_child(child_alias.clone(), reciprocal) {
                warn!(model = %fk.model_name, alias = %child_alias, "child alias already taken");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Relationship;
    use serde_json::json;

    fn shop() -> Value {
        json!({
            "customers": {
                "name": {"type": "string", "required": true},
                "password": {"type": "string", "protected": true}
            },
            "orders": {
                "status": {"type": "string", "options": ["pending", "paid"]},
                "customerId": {"type": "id", "foreignKey": "customers.id"},
                "billingCustomerId": {"type": "id", "foreignKey": "customers.id"},
                "warehouseId": {"type": "id", "foreignKey": "warehouses.id"},
                "total": {"type": "float"}
            }
        })
    }

    #[test]
    fn test_build_from_json() {
        let registry = ModelRegistry::from_json(&shop()).unwrap();
        assert_eq!(registry.len(), 2);

        let customer = registry.get("customers").unwrap();
        assert_eq!(customer.name(), "Customer");
        assert_eq!(customer.primary_name(), "name");
        assert_eq!(customer.protected_fields(), ["password".to_string()]);

        assert!(registry.contains("Order"));
        assert!(registry.contains("order"));
        assert!(!registry.contains("Invoice"));
    }

    #[test]
    fn test_relationships_are_wired_both_ways() {
        let registry = ModelRegistry::from_json(&shop()).unwrap();
        let order = registry.get("Order").unwrap();
        let customer = registry.get("Customer").unwrap();

        match order.relationship("customer") {
            Some(Relationship::Parent(fk)) => {
                assert_eq!(fk.model_name, "Customer");
                assert_eq!(fk.foreign_key, "customerId");
            }
            other => panic!("expected parent relationship, got {:?}", other),
        }
        assert!(order.relationship("billingCustomer").is_some());

        match customer.relationship("orders") {
            Some(Relationship::Child(fk)) => {
                assert_eq!(fk.model_name, "Order");
                assert_eq!(fk.foreign_key, "customerId");
            }
            other => panic!("expected child relationship, got {:?}", other),
        }
        assert!(customer.relationship("billingCustomerOrders").is_some());
    }

    #[test]
    fn test_unknown_related_model_is_tolerated() {
        let registry = ModelRegistry::from_json(&shop()).unwrap();
        let order = registry.get("Order").unwrap();
        assert!(order.relationship("warehouse").is_none());
        assert_eq!(order.parent_keys().len(), 3);
    }

    #[test]
    fn test_malformed_structure() {
        let err = ModelRegistry::from_json(&json!(["orders"])).unwrap_err();
        assert!(err.to_string().contains("malformed structure"));

        let err = ModelRegistry::from_json(&json!({"orders": {"status": "string"}})).unwrap_err();
        assert!(err.to_string().contains("orders.status"));
    }

    #[test]
    fn test_require_unknown_model() {
        let registry = ModelRegistry::from_json(&shop()).unwrap();
        let err = registry.require("Invoice").unwrap_err();
        assert_eq!(err.to_string(), "unknown model: Invoice");
    }
}
