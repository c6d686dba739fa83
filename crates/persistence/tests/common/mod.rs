//! Test infrastructure for the engine integration tests.
//!
//! Every test builds its own engine over a fresh store, so tests never share
//! state and can run in parallel.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};
use tessera_persistence::backends::local::LocalBackend;
use tessera_persistence::{Engine, EngineConfig, ModelRegistry, Record, RequestContext, StorageBackend};

#[cfg(feature = "sqlite")]
use tessera_persistence::backends::sqlite::SqliteBackend;

/// A small shop: tenant-scoped customers and orders, unscoped products.
pub fn shop_structure() -> Value {
    json!({
        "customers": {
            "name": {"required": true, "primaryKey": true},
            "email": {},
            "password": {"protected": true},
            "tier": {"options": ["gold", "silver"]},
            "tenantId": {"type": "id"}
        },
        "orders": {
            "customerId": {"type": "id", "foreignKey": "customers.id"},
            "status": {"options": ["open", "paid", "void"]},
            "total": {"type": "float"},
            "note": {},
            "placedAt": {"type": "date"},
            "tenantId": {"type": "id"}
        },
        "products": {
            "name": {},
            "price": {"type": "float"},
            "stock": {"type": "int"}
        }
    })
}

/// Builds the shop registry.
pub fn shop_registry() -> ModelRegistry {
    ModelRegistry::from_json(&shop_structure()).expect("shop structure is valid")
}

/// Binds the shop registry to `backend` and creates its collections.
pub async fn engine_on(backend: Arc<dyn StorageBackend>) -> Engine {
    let engine = Engine::new(shop_registry(), backend, EngineConfig::default());
    engine
        .ensure_collections()
        .await
        .expect("Failed to create collections");
    engine
}

/// An engine over a fresh in-memory local store.
pub async fn local_engine() -> Engine {
    engine_on(Arc::new(LocalBackend::in_memory())).await
}

/// An engine over a fresh in-memory SQLite database.
#[cfg(feature = "sqlite")]
pub async fn sqlite_engine() -> Engine {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    engine_on(Arc::new(backend)).await
}

/// One engine per in-process backend compiled into this build.
pub async fn engines() -> Vec<(&'static str, Engine)> {
    #[allow(unused_mut)]
    let mut engines = vec![("local", local_engine().await)];
    #[cfg(feature = "sqlite")]
    engines.push(("sqlite", sqlite_engine().await));
    engines
}

/// A caller belonging to `tenant`.
pub fn tenant(tenant: &str) -> RequestContext {
    RequestContext::default().with_fallback_tenant(tenant)
}

/// Creates one record and returns it.
pub async fn create(engine: &Engine, model: &str, request: &RequestContext, input: Value) -> Record {
    engine
        .query(model)
        .expect("model is registered")
        .with_request(request.clone())
        .create(input)
        .await
        .expect("create succeeds")
        .expect("create was not vetoed")
}

/// Seeds two customers and three orders for `acme`.
///
/// Ann (gold) has an open order of 10 placed in January and a paid order of
/// 20 with a note placed in February. Bob (silver) has an open order of 5
/// placed in March. All in 2024.
pub async fn seed_shop(engine: &Engine) {
    let acme = tenant("acme");
    let ann = create(engine, "customers", &acme, json!({"id": "c-ann", "name": "Ann", "tier": "gold", "password": "pw"})).await;
    let bob = create(engine, "customers", &acme, json!({"id": "c-bob", "name": "Bob", "tier": "silver"})).await;

    let orders = [
        (&ann, "o-1", "open", 10.0, None, "2024-01-15"),
        (&ann, "o-2", "paid", 20.0, Some("gift"), "2024-02-10"),
        (&bob, "o-3", "open", 5.0, None, "2024-03-05 09:30:00"),
    ];
    for (customer, id, status, total, note, placed_at) in orders {
        create(
            engine,
            "orders",
            &acme,
            json!({
                "id": id,
                "customerId": customer["id"],
                "status": status,
                "total": total,
                "note": note,
                "placedAt": placed_at,
            }),
        )
        .await;
    }
}

/// Sorted identifiers of `records`.
pub fn ids(records: &[Record]) -> Vec<String> {
    let mut ids: Vec<String> = records
        .iter()
        .filter_map(|record| record.get("id").and_then(Value::as_str).map(str::to_string))
        .collect();
    ids.sort();
    ids
}
