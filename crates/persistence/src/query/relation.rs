//! Relationship alias resolution.
//!
//! A filter key that names a relationship alias never becomes a join. The
//! nested filter runs as a subquery against the related model, the matching
//! key values are collected, and the condition is rewritten to an `in`
//! predicate on the local key. Nested aliases resolve depth first. The same
//! resolution serves every backend.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::filter::{Condition, Filter, Operator};
use crate::error::StorageResult;
use crate::model::{Model, ModelRegistry, Relationship};

/// Runs the subqueries behind relationship aliases.
#[async_trait]
pub trait KeyLookup: Send + Sync {
    /// Returns the values of `key` on every `model` record matching `filter`.
    ///
    /// The filter contains no relationship aliases.
    async fn collect_keys(&self, model: &Model, filter: Filter, key: &str)
    -> StorageResult<Vec<Value>>;
}

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = StorageResult<Filter>> + Send + 'a>>;

/// Rewrites every relationship condition of `filter` into an `in` condition.
pub fn resolve<'a>(
    registry: &'a ModelRegistry,
    lookup: &'a dyn KeyLookup,
    model: &'a Model,
    filter: Filter,
) -> ResolveFuture<'a> {
    Box::pin(async move {
        let mut resolved = Filter::new();

        for (field, condition) in filter.conditions {
            let nested = match condition {
                Condition::Relation(nested) => nested,
                other => {
                    resolved.insert(field, other);
                    continue;
                }
            };

            let Some(relationship) = model.relationship(&field) else {
                // Not an alias: lowering reports it against the model.
                resolved.insert(field, Condition::Relation(nested));
                continue;
            };

            if nested.is_empty() {
                continue;
            }

            let (related_name, related_key, local_key) = match relationship {
                Relationship::Parent(fk) => (&fk.model_name, &fk.primary_key, &fk.foreign_key),
                Relationship::Child(fk) => (&fk.model_name, &fk.foreign_key, &fk.primary_key),
            };
            let related = registry.require(related_name)?;

            let nested = resolve(registry, lookup, &related, *nested).await?;
            let keys = dedupe(lookup.collect_keys(&related, nested, related_key).await?);

            debug!(
                model = %model.name(),
                alias = %field,
                related = %related.name(),
                matches = keys.len(),
                "resolved relationship filter"
            );

            resolved.insert(
                local_key.clone(),
                Condition::Operators(BTreeMap::from([(Operator::In, Value::Array(keys))])),
            );
        }

        for arm in filter.and {
            resolved.and.push(resolve(registry, lookup, model, arm).await?);
        }
        for arm in filter.or {
            resolved.or.push(resolve(registry, lookup, model, arm).await?);
        }
        for arm in filter.nor {
            resolved.nor.push(resolve(registry, lookup, model, arm).await?);
        }

        Ok(resolved)
    })
}

fn dedupe(values: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert(v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorded {
        calls: Mutex<Vec<(String, Value, String)>>,
        answer: Vec<Value>,
    }

    #[async_trait]
    impl KeyLookup for Recorded {
        async fn collect_keys(
            &self,
            model: &Model,
            filter: Filter,
            key: &str,
        ) -> StorageResult<Vec<Value>> {
            self.calls
                .lock()
                .push((model.name().to_string(), filter.to_value(), key.to_string()));
            Ok(self.answer.clone())
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::from_json(&json!({
            "customers": {"name": {"type": "string"}},
            "orders": {
                "status": {"type": "string"},
                "customerId": {"type": "id", "foreignKey": "customers.id"}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_parent_alias_rewrites_foreign_key() {
        let registry = registry();
        let order = registry.get("Order").unwrap();
        let lookup = Recorded {
            calls: Mutex::new(Vec::new()),
            answer: vec![json!("c1"), json!("c2"), json!("c1"), Value::Null],
        };

        let filter = Filter::parse(json!({"customer": {"name": "Ann"}, "status": "paid"})).unwrap();
        let resolved = resolve(&registry, &lookup, &order, filter).await.unwrap();

        assert_eq!(
            resolved.to_value(),
            json!({"customerId": {"in": ["c1", "c2"]}, "status": "paid"})
        );
        let calls = lookup.calls.lock();
        assert_eq!(calls[0], ("Customer".to_string(), json!({"name": "Ann"}), "_id".to_string()));
    }

    #[tokio::test]
    async fn test_child_alias_rewrites_primary_key() {
        let registry = registry();
        let customer = registry.get("Customer").unwrap();
        let lookup = Recorded {
            calls: Mutex::new(Vec::new()),
            answer: vec![json!("c9")],
        };

        let filter = Filter::parse(json!({
            "OR": [{"orders": {"status": {"equalTo": "active"}}}]
        }))
        .unwrap();
        let resolved = resolve(&registry, &lookup, &customer, filter).await.unwrap();

        assert_eq!(resolved.to_value(), json!({"OR": [{"_id": {"in": ["c9"]}}]}));
        let calls = lookup.calls.lock();
        assert_eq!(calls[0].0, "Order");
        assert_eq!(calls[0].2, "customerId");
    }

    #[tokio::test]
    async fn test_empty_nested_filter_is_dropped() {
        let registry = registry();
        let order = registry.get("Order").unwrap();
        let lookup = Recorded {
            calls: Mutex::new(Vec::new()),
            answer: Vec::new(),
        };

        let mut filter = Filter::new();
        filter.insert("customer".to_string(), Condition::Relation(Box::new(Filter::new())));
        let resolved = resolve(&registry, &lookup, &order, filter).await.unwrap();

        assert!(resolved.is_empty());
        assert!(lookup.calls.lock().is_empty());
    }
}
