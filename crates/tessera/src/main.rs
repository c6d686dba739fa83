//! Tessera command line front end.
//!
//! Loads a model structure, connects the configured backend and runs one
//! operation, printing the result as JSON.

mod config;

use anyhow::Context;
use clap::Parser;
use serde_json::{Value, json};
use tessera_persistence::{DatabaseConfig, Engine, EngineConfig, ModelRegistry, RequestContext};
use tracing::info;

use crate::config::{CliConfig, Command};

/// Initializes the tracing subscriber. `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tessera={},tessera_persistence={}", level, level))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_registry(config: &CliConfig) -> anyhow::Result<ModelRegistry> {
    let raw = std::fs::read_to_string(&config.structure)
        .with_context(|| format!("reading {}", config.structure.display()))?;
    let structure: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", config.structure.display()))?;
    Ok(ModelRegistry::from_json(&structure)?)
}

fn describe_models(registry: &ModelRegistry) -> Value {
    registry
        .models()
        .map(|model| {
            let fields: serde_json::Map<String, Value> = model
                .fields()
                .values()
                .map(|field| (field.name.clone(), Value::String(field.kind.to_string())))
                .collect();
            json!({
                "name": model.name(),
                "collection": model.collection(),
                "fields": fields,
                "parents": model.parent_fields().keys().collect::<Vec<_>>(),
                "children": model.children_fields().keys().collect::<Vec<_>>(),
                "tenantScoped": model.is_tenant_scoped(),
            })
        })
        .collect()
}

async fn run(engine: &Engine, config: &CliConfig) -> anyhow::Result<Value> {
    let request = config
        .tenant
        .as_ref()
        .map(|tenant| RequestContext::default().with_fallback_tenant(tenant.clone()));
    let filter = config.command.filter().map_err(anyhow::Error::msg)?;

    let output = match &config.command {
        Command::Models => describe_models(engine.registry()),
        Command::Find {
            model, page, limit, ..
        } => {
            let mut query = engine.query(model)?.where_all(filter)?.take(*limit).page(*page);
            if let Some(request) = request {
                query = query.with_request(request);
            }
            serde_json::to_value(query.paginate().await?)?
        }
        Command::Count { model, .. } => {
            let mut query = engine.query(model)?.where_all(filter)?;
            if let Some(request) = request {
                query = query.with_request(request);
            }
            json!({ "count": query.count().await? })
        }
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let engine_config = EngineConfig::from_env();
    if let Err(errors) = engine_config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let registry = load_registry(&config)?;
    let database = DatabaseConfig::for_backend(&config.backend, config.database_url.as_deref())?;
    info!(
        backend = %database.kind(),
        models = registry.len(),
        structure = %config.structure.display(),
        "Starting Tessera"
    );

    let backend = database
        .connect()
        .await
        .context("connecting to the storage backend")?;
    let engine = Engine::new(registry, backend, engine_config);
    engine.ensure_collections().await?;

    let output = run(&engine, &config).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_persistence::backends::local::LocalBackend;

    fn engine() -> Engine {
        let registry = ModelRegistry::from_json(&json!({
            "authors": {"name": {}},
            "books": {"title": {}, "authorId": {"type": "id", "foreignKey": "authors.id"}}
        }))
        .unwrap();
        Engine::new(registry, Arc::new(LocalBackend::in_memory()), EngineConfig::default())
    }

    fn cli(args: &[&str]) -> CliConfig {
        CliConfig::try_parse_from(std::iter::once("tessera").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_describe_models() {
        let described = describe_models(engine().registry());
        let models = described.as_array().unwrap();
        assert_eq!(models.len(), 2);
        let book = models.iter().find(|m| m["name"] == "Book").unwrap();
        assert_eq!(book["collection"], "books");
        assert_eq!(book["fields"]["authorId"], "id");
        assert_eq!(book["parents"], json!(["author"]));
    }

    #[tokio::test]
    async fn test_run_find_and_count() {
        let engine = engine();
        engine.ensure_collections().await.unwrap();
        for title in ["Dune", "Emma", "Ulysses"] {
            engine
                .query("books")
                .unwrap()
                .create(json!({"title": title}))
                .await
                .unwrap();
        }

        let page = run(&engine, &cli(&["find", "books", "--limit", "2", "--page", "2"]))
            .await
            .unwrap();
        assert_eq!(page["total"], 3);
        assert_eq!(page["data"].as_array().unwrap().len(), 1);

        let count = run(&engine, &cli(&["count", "books", "--where", r#"{"title": "Emma"}"#]))
            .await
            .unwrap();
        assert_eq!(count, json!({"count": 1}));
    }
}
