//! Local store persistence tests.

mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use tessera_persistence::backends::local::{LocalBackend, LocalBackendConfig};
use tessera_persistence::{DatabaseConfig, Engine};

use common::*;

fn file_config(dir: &TempDir) -> LocalBackendConfig {
    LocalBackendConfig {
        path: Some(dir.path().join("store.json")),
        pretty: true,
    }
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let backend = LocalBackend::new(file_config(&dir)).unwrap();
        let engine = engine_on(Arc::new(backend)).await;
        seed_shop(&engine).await;
        engine
            .query("orders")
            .unwrap()
            .where_field("id", json!("o-3"))
            .unwrap()
            .delete()
            .await
            .unwrap();
    }
    assert!(dir.path().join("store.json").is_file());

    let backend = LocalBackend::new(file_config(&dir)).unwrap();
    let engine = engine_on(Arc::new(backend)).await;
    let orders = engine.query("orders").unwrap().find().await.unwrap().unwrap();
    assert_eq!(ids(&orders), ["o-1", "o-2"]);

    let customers = engine.query("customers").unwrap().count().await.unwrap();
    assert_eq!(customers, 2);
}

#[tokio::test]
async fn test_connect_from_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.json");

    let config = DatabaseConfig::for_backend("local", path.to_str()).unwrap();
    let engine = Engine::new(shop_registry(), config.connect().await.unwrap(), Default::default());
    engine.ensure_collections().await.unwrap();
    create(&engine, "products", &tenant("acme"), json!({"name": "Kettle"})).await;

    let reopened = engine_on(DatabaseConfig::for_backend("local", path.to_str()).unwrap().connect().await.unwrap()).await;
    let kettle = reopened
        .query("products")
        .unwrap()
        .where_field("name", json!("Kettle"))
        .unwrap()
        .exists()
        .await
        .unwrap();
    assert!(kettle);
}

#[test]
fn test_blocking_round_trip() {
    tokio_test::block_on(async {
        let engine = local_engine().await;
        create(&engine, "products", &tenant("acme"), json!({"name": "Pan", "stock": 3})).await;

        let stock = engine
            .query("products")
            .unwrap()
            .where_field("name", json!("Pan"))
            .unwrap()
            .value("stock")
            .await
            .unwrap();
        assert_eq!(stock, Some(json!(3)));
    });
}
