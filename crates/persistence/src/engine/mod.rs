//! The engine: registry, backend and triggers bound together.
//!
//! An [`Engine`] is the explicit context every operation runs in. It is built
//! once and cloned cheaply; each operation starts from [`Engine::query`], which
//! hands out a fresh [`ModelQuery`] for one model.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use tessera_persistence::backends::local::LocalBackend;
//! use tessera_persistence::config::EngineConfig;
//! use tessera_persistence::engine::Engine;
//! use tessera_persistence::model::ModelRegistry;
//!
//! # async fn example() -> tessera_persistence::error::StorageResult<()> {
//! let registry = ModelRegistry::from_json(&json!({
//!     "orders": {"status": {"options": ["open", "paid"]}, "total": {"type": "float"}}
//! }))?;
//! let engine = Engine::new(registry, Arc::new(LocalBackend::in_memory()), EngineConfig::default());
//! engine.ensure_collections().await?;
//!
//! engine.query("orders")?.create(json!({"status": "open", "total": 12.5})).await?;
//! let open = engine
//!     .query("Order")?
//!     .where_field("status", json!("open"))?
//!     .count()
//!     .await?;
//! assert_eq!(open, 1);
//! # Ok(())
//! # }
//! ```

mod query;
mod record;
mod results;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub use query::ModelQuery;
pub use record::present;
pub use results::{DeleteReport, ImportReport, Paginated, Summary};

use crate::backends::StorageBackend;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::StorageResult;
use crate::model::{Model, ModelRegistry, TENANT_FIELD};
use crate::query::{Filter, KeyLookup, Predicate, Selection};
use crate::triggers::TriggerRegistry;

/// Kind of change announced to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Records were created.
    Create,
    /// Records were updated.
    Update,
    /// Records were deleted.
    Delete,
    /// Records were imported.
    Import,
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub action: ChangeAction,
    /// Model name.
    pub model: String,
}

/// Registry, backend, triggers and settings shared by every operation.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn StorageBackend>,
    triggers: Arc<TriggerRegistry>,
    config: EngineConfig,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Engine {
    /// Binds a registry to a backend with an empty trigger registry.
    pub fn new(
        registry: ModelRegistry,
        backend: Arc<dyn StorageBackend>,
        config: EngineConfig,
    ) -> Self {
        Self::with_triggers(registry, backend, Arc::new(TriggerRegistry::new()), config)
    }

    /// Binds a registry to a backend with an existing trigger registry.
    pub fn with_triggers(
        registry: ModelRegistry,
        backend: Arc<dyn StorageBackend>,
        triggers: Arc<TriggerRegistry>,
        config: EngineConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(config.change_capacity.max(1));
        info!(
            backend = backend.name(),
            models = registry.len(),
            tenancy = config.tenancy_enabled,
            "engine ready"
        );
        Self {
            registry: Arc::new(registry),
            backend,
            triggers,
            config,
            changes,
        }
    }

    /// The model registry.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The storage backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The trigger registry; hooks may be registered at any time.
    pub fn triggers(&self) -> &Arc<TriggerRegistry> {
        &self.triggers
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribes to change notifications emitted after every mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Starts an operation on a model, by model or collection name.
    pub fn query(&self, model: &str) -> StorageResult<ModelQuery<'_>> {
        Ok(ModelQuery::new(self, self.registry.require(model)?))
    }

    /// Creates the table or collection of every registered model.
    pub async fn ensure_collections(&self) -> StorageResult<()> {
        for model in self.registry.models() {
            self.backend.ensure_collection(model).await?;
        }
        debug!(models = self.registry.len(), "collections ready");
        Ok(())
    }

    /// Tenant a request is scoped to on `model`, if scoping applies.
    pub fn tenant_for(&self, model: &Model, request: Option<&RequestContext>) -> Option<String> {
        if !self.config.tenancy_enabled || !model.is_tenant_scoped() {
            return None;
        }
        request.map(|request| request.tenant_id(&self.config.tenant_key))
    }

    pub(crate) fn notify(&self, action: ChangeAction, model: &Model) {
        // Nobody listening is not an error.
        let _ = self.changes.send(ChangeEvent {
            action,
            model: model.name().to_string(),
        });
    }
}

/// Runs relationship subqueries: tenant scoped, without triggers.
pub(crate) struct ScopedLookup<'a> {
    pub(crate) engine: &'a Engine,
    pub(crate) request: Option<&'a RequestContext>,
}

#[async_trait]
impl KeyLookup for ScopedLookup<'_> {
    async fn collect_keys(
        &self,
        model: &Model,
        mut filter: Filter,
        key: &str,
    ) -> StorageResult<Vec<Value>> {
        if let Some(tenant) = self.engine.tenant_for(model, self.request) {
            filter.and.push(Filter::equals(TENANT_FIELD, Value::String(tenant)));
        }
        let predicate = Predicate::lower(model, &filter, self.engine.config.strict_coercion)?;
        let records = self
            .engine
            .backend
            .find(model, &Selection::matching(predicate))
            .await?;
        Ok(records
            .into_iter()
            .filter_map(|mut record| record.remove(key))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::local::LocalBackend;
    use crate::triggers::{Phase, TriggerAction, TriggerEvent, TriggerOutcome};
    use serde_json::json;

    fn engine(config: EngineConfig) -> Engine {
        let registry = ModelRegistry::from_json(&json!({
            "notes": {"title": {}, "tenantId": {"type": "id"}},
            "tags": {"label": {}}
        }))
        .unwrap();
        Engine::new(registry, Arc::new(LocalBackend::in_memory()), config)
    }

    #[test]
    fn test_tenant_for() {
        let engine = engine(EngineConfig::default());
        let notes = engine.registry().get("Note").unwrap();
        let tags = engine.registry().get("Tag").unwrap();
        let request = RequestContext::default().with_fallback_tenant("acme");

        assert_eq!(engine.tenant_for(&notes, Some(&request)).as_deref(), Some("acme"));
        assert_eq!(engine.tenant_for(&notes, None), None);
        assert_eq!(engine.tenant_for(&tags, Some(&request)), None);

        let engine = self::engine(EngineConfig {
            tenancy_enabled: false,
            ..Default::default()
        });
        assert_eq!(engine.tenant_for(&notes, Some(&request)), None);
    }

    #[test]
    fn test_unknown_model() {
        let engine = engine(EngineConfig::default());
        assert!(engine.query("missing").is_err());
        assert!(engine.query("notes").is_ok());
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let engine = engine(EngineConfig::default());
        let mut changes = engine.subscribe();

        engine
            .query("tags")
            .unwrap()
            .create(json!({"label": "urgent"}))
            .await
            .unwrap();

        let event = changes.recv().await.unwrap();
        assert_eq!(event.action, ChangeAction::Create);
        assert_eq!(event.model, "Tag");
    }

    #[tokio::test]
    async fn test_shared_triggers() {
        let engine = engine(EngineConfig::default());
        engine
            .triggers()
            .register_all(Phase::Before, TriggerAction::Create, |_e: TriggerEvent| async {
                Ok(TriggerOutcome::Veto)
            })
            .unwrap();

        let cloned = engine.clone();
        let created = cloned
            .query("tags")
            .unwrap()
            .create(json!({"label": "x"}))
            .await
            .unwrap();
        assert!(created.is_none());
    }
}
