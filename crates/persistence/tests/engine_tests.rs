//! Engine integration tests.
//!
//! Every test runs against each in-process backend compiled into the build.

mod common;

use serde_json::{Value, json};

use tessera_persistence::error::{PolicyError, StorageError};
use tessera_persistence::triggers::{AccessKey, TriggerEvent};
use tessera_persistence::{ChangeAction, Phase, TriggerAction, TriggerOutcome};

use common::*;

// ============================================================================
// CRUD
// ============================================================================

#[tokio::test]
async fn test_create_find_round_trip() {
    for (name, engine) in engines().await {
        let acme = tenant("acme");
        let created = create(
            &engine,
            "products",
            &acme,
            json!({"name": "Lamp", "price": "19.5", "stock": "4"}),
        )
        .await;

        let id = created["id"].as_str().unwrap().to_string();
        assert!(!id.is_empty(), "{name}: identifier assigned");
        assert_eq!(created["_id"], created["id"], "{name}");
        assert_eq!(created["_collection"], "products", "{name}");
        assert_eq!(created["_model"], "Product", "{name}");
        assert_eq!(created["price"].as_f64(), Some(19.5), "{name}");
        assert_eq!(created["stock"], json!(4), "{name}");

        let found = engine
            .query("Product")
            .unwrap()
            .where_field("id", json!(id))
            .unwrap()
            .find_one()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], "Lamp", "{name}");
        assert_eq!(found["price"].as_f64(), Some(19.5), "{name}");
    }
}

#[tokio::test]
async fn test_protected_fields_are_redacted() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;

        let ann = engine
            .query("customers")
            .unwrap()
            .where_field("name", json!("Ann"))
            .unwrap()
            .find_one()
            .await
            .unwrap()
            .unwrap();
        assert!(!ann.contains_key("password"), "{name}");
        assert_eq!(ann["tier"], "gold", "{name}");
    }
}

#[tokio::test]
async fn test_create_rejects_existing_identifier() {
    for (name, engine) in engines().await {
        let products = || engine.query("products").unwrap();
        let first = products().create(json!({"id": "p-1", "name": "Lamp"})).await;
        assert!(first.is_ok(), "{name}");

        let err = products()
            .create(json!({"id": "p-1", "name": "Desk"}))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key(), "{name}: {err}");

        let stored = products()
            .where_field("id", json!("p-1"))
            .unwrap()
            .find()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.len(), 1, "{name}");
        assert_eq!(stored[0]["name"], "Lamp", "{name}");
    }
}

#[tokio::test]
async fn test_create_many_keeps_input_order() {
    for (name, engine) in engines().await {
        let created = engine
            .query("products")
            .unwrap()
            .create_many(vec![
                json!({"name": "First"}),
                json!({"name": "Second"}),
                json!({"name": "Third"}),
            ])
            .await
            .unwrap()
            .unwrap();
        let names: Vec<&str> = created.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["First", "Second", "Third"], "{name}");
    }
}

#[tokio::test]
async fn test_update_many_returns_stored_records() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;

        let updated = engine
            .query("orders")
            .unwrap()
            .where_field("status", json!("open"))
            .unwrap()
            .update_many(json!({"status": "void", "total": "0"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&updated), ["o-1", "o-3"], "{name}");
        assert!(updated.iter().all(|r| r["status"] == "void"), "{name}");
        assert!(updated.iter().all(|r| r["total"].as_f64() == Some(0.0)), "{name}");
        assert!(updated.iter().all(|r| r["_model"] == "Order"), "{name}");
    }
}

#[tokio::test]
async fn test_delete_policy() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;

        let err = engine.query("orders").unwrap().delete().await.unwrap_err();
        assert!(
            matches!(err, StorageError::Policy(PolicyError::EmptyDeleteFilter { .. })),
            "{name}: {err}"
        );

        // Tenant scope alone does not count as a filter.
        let err = engine
            .query("orders")
            .unwrap()
            .with_request(tenant("acme"))
            .delete()
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Policy(_)), "{name}");
        assert_eq!(engine.query("orders").unwrap().count().await.unwrap(), 3, "{name}");

        let report = engine
            .query("orders")
            .unwrap()
            .where_field("total", json!({"lessThan": 15}))
            .unwrap()
            .delete()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.deleted, 2, "{name}");
        assert_eq!(engine.query("orders").unwrap().count().await.unwrap(), 1, "{name}");
    }
}

// ============================================================================
// Pagination
// ============================================================================

#[tokio::test]
async fn test_paginate_second_page() {
    for (name, engine) in engines().await {
        let rows = (1..=25).map(|i| json!({"name": format!("p{:02}", i), "stock": i})).collect();
        engine.query("products").unwrap().create_many(rows).await.unwrap();

        let page = engine
            .query("products")
            .unwrap()
            .order_by("stock", "asc")
            .take(10)
            .page(2)
            .paginate()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(page.total, 25, "{name}");
        assert_eq!(page.per_page, 10, "{name}");
        assert_eq!(page.current_page, 2, "{name}");
        assert_eq!(page.last_page, 3, "{name}");
        assert_eq!(page.from, 11, "{name}");
        assert_eq!(page.to, 20, "{name}");
        assert_eq!(page.data.len(), 10, "{name}");
        assert_eq!(page.data[0]["stock"], json!(11), "{name}");
        assert_eq!(page.data[9]["stock"], json!(20), "{name}");
    }
}

#[tokio::test]
async fn test_paginate_uses_default_page_size() {
    for (name, engine) in engines().await {
        let rows = (0..12).map(|i| json!({"name": "p", "stock": i})).collect();
        engine.query("products").unwrap().create_many(rows).await.unwrap();

        let page = engine.query("products").unwrap().paginate().await.unwrap().unwrap();
        assert_eq!(page.per_page, 10, "{name}");
        assert_eq!(page.data.len(), 10, "{name}");
        assert_eq!(page.last_page, 2, "{name}");
    }
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_null_sentinel_matches_missing_values() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;

        let without_note = engine
            .query("orders")
            .unwrap()
            .where_field("note", json!({"equalTo": "NULL"}))
            .unwrap()
            .find()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&without_note), ["o-1", "o-3"], "{name}");

        let with_note = engine
            .query("orders")
            .unwrap()
            .where_field("note", json!({"notEqualTo": "null"}))
            .unwrap()
            .find()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&with_note), ["o-2"], "{name}");
    }
}

#[tokio::test]
async fn test_parent_alias_filter() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;

        let anns = engine
            .query("orders")
            .unwrap()
            .where_field("customer", json!({"name": "Ann"}))
            .unwrap()
            .find()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&anns), ["o-1", "o-2"], "{name}");
    }
}

#[tokio::test]
async fn test_child_alias_filter() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;

        let paying = engine
            .query("customers")
            .unwrap()
            .where_field("orders", json!({"status": "paid"}))
            .unwrap()
            .find()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&paying), ["c-ann"], "{name}");

        let nobody = engine
            .query("customers")
            .unwrap()
            .where_field("orders", json!({"status": "void"}))
            .unwrap()
            .count()
            .await
            .unwrap();
        assert_eq!(nobody, 0, "{name}");
    }
}

// ============================================================================
// Tenancy
// ============================================================================

#[tokio::test]
async fn test_tenant_scoping() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;
        let globex = tenant("globex");
        let carol = create(&engine, "customers", &globex, json!({"name": "Carol"})).await;
        assert_eq!(carol["tenantId"], "globex", "{name}");

        let visible = engine
            .query("customers")
            .unwrap()
            .with_request(globex.clone())
            .find()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(visible.len(), 1, "{name}");
        assert_eq!(visible[0]["name"], "Carol", "{name}");

        let acme_count = engine
            .query("customers")
            .unwrap()
            .with_request(tenant("acme"))
            .count()
            .await
            .unwrap();
        assert_eq!(acme_count, 2, "{name}");

        // Another tenant cannot update acme records, even by identifier.
        let updated = engine
            .query("customers")
            .unwrap()
            .with_request(globex)
            .where_field("id", json!("c-ann"))
            .unwrap()
            .update(json!({"tier": "silver"}))
            .await
            .unwrap();
        assert!(updated.is_none(), "{name}");

        // Unscoped models ignore the tenant.
        create(&engine, "products", &tenant("acme"), json!({"name": "Shared"})).await;
        let shared = engine
            .query("products")
            .unwrap()
            .with_request(tenant("globex"))
            .count()
            .await
            .unwrap();
        assert_eq!(shared, 1, "{name}");
    }
}

#[tokio::test]
async fn test_missing_tenant_uses_default() {
    for (name, engine) in engines().await {
        let anonymous = tessera_persistence::RequestContext::default();
        let created = create(&engine, "customers", &anonymous, json!({"name": "Dee"})).await;
        assert_eq!(created["tenantId"], "000", "{name}");
    }
}

// ============================================================================
// Triggers
// ============================================================================

#[tokio::test]
async fn test_before_create_veto() {
    for (name, engine) in engines().await {
        engine
            .triggers()
            .register(
                "products",
                Phase::Before,
                TriggerAction::Create,
                AccessKey::new(None, None),
                |event: TriggerEvent| async move {
                    let input = event.context.input.unwrap_or(Value::Null);
                    if input["name"] == "Forbidden" {
                        Ok(TriggerOutcome::Veto)
                    } else {
                        Ok(TriggerOutcome::Continue)
                    }
                },
            )
            .unwrap();

        let vetoed = engine
            .query("products")
            .unwrap()
            .create(json!({"name": "Forbidden"}))
            .await
            .unwrap();
        assert!(vetoed.is_none(), "{name}");
        assert_eq!(engine.query("products").unwrap().count().await.unwrap(), 0, "{name}");

        let allowed = engine
            .query("products")
            .unwrap()
            .create(json!({"name": "Fine"}))
            .await
            .unwrap();
        assert!(allowed.is_some(), "{name}");
    }
}

#[tokio::test]
async fn test_before_create_rewrites_input() {
    for (name, engine) in engines().await {
        engine
            .triggers()
            .register_all(Phase::Before, TriggerAction::Create, |event: TriggerEvent| async move {
                let mut input = event.context.input.unwrap_or(Value::Null);
                input["stock"] = json!(99);
                Ok(TriggerOutcome::Replace(input))
            })
            .unwrap();

        let created = engine
            .query("products")
            .unwrap()
            .create(json!({"name": "Boxed", "stock": 1}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created["stock"], json!(99), "{name}");
    }
}

#[tokio::test]
async fn test_after_find_replaces_result() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;
        engine
            .triggers()
            .register(
                "orders",
                Phase::After,
                TriggerAction::Find,
                AccessKey::new(Some("auditor"), None),
                |_event: TriggerEvent| async { Ok(TriggerOutcome::Replace(json!([]))) },
            )
            .unwrap();

        let hidden = engine
            .query("orders")
            .unwrap()
            .with_access(Some("auditor"), None)
            .find()
            .await
            .unwrap()
            .unwrap();
        assert!(hidden.is_empty(), "{name}");

        let visible = engine.query("orders").unwrap().find().await.unwrap().unwrap();
        assert_eq!(visible.len(), 3, "{name}");
    }
}

// ============================================================================
// Import and notifications
// ============================================================================

#[tokio::test]
async fn test_import_by_unique_key() {
    for (name, engine) in engines().await {
        seed_shop(&engine).await;
        let mut changes = engine.subscribe();

        let report = engine
            .query("customers")
            .unwrap()
            .with_request(tenant("acme"))
            .import(
                vec![
                    json!({"name": "Ann", "tier": "silver"}),
                    json!({"name": "Eve", "tier": "gold"}),
                    json!({"name": "", "tier": "gold"}),
                ],
                &["name"],
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.updated, 1, "{name}");
        assert_eq!(report.imported, 1, "{name}");
        assert_eq!(report.ignored, 1, "{name}");
        assert_eq!(report.message, "SUCCESS", "{name}");
        assert_eq!(report.data.len(), 2, "{name}");

        let ann = engine
            .query("customers")
            .unwrap()
            .where_field("id", json!("c-ann"))
            .unwrap()
            .find_one()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ann["tier"], "silver", "{name}");

        let event = changes.recv().await.unwrap();
        assert_eq!(event.action, ChangeAction::Import, "{name}");
        assert_eq!(event.model, "Customer", "{name}");
    }
}

#[tokio::test]
async fn test_change_events_follow_mutations() {
    for (name, engine) in engines().await {
        let mut changes = engine.subscribe();
        let acme = tenant("acme");

        create(&engine, "products", &acme, json!({"name": "Mug"})).await;
        engine
            .query("products")
            .unwrap()
            .where_field("name", json!("Mug"))
            .unwrap()
            .update(json!({"stock": 2}))
            .await
            .unwrap();
        engine
            .query("products")
            .unwrap()
            .where_field("name", json!("Mug"))
            .unwrap()
            .delete()
            .await
            .unwrap();

        let mut actions = Vec::new();
        for _ in 0..3 {
            actions.push(changes.recv().await.unwrap().action);
        }
        assert_eq!(
            actions,
            [ChangeAction::Create, ChangeAction::Update, ChangeAction::Delete],
            "{name}"
        );
    }
}
