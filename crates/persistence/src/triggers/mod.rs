//! Before/after hooks and named functions.
//!
//! Hooks live in two tiers. All-model hooks are keyed by phase and action and
//! fire for every model. Per-model hooks are additionally keyed by model and
//! by an [`AccessKey`] built from the caller's access role and route. For one
//! dispatch the all-model hook runs first, then the per-model hook.
//!
//! A hook answers with a [`TriggerOutcome`]:
//!
//! - `Continue` proceeds unchanged.
//! - `Veto` aborts the operation; the caller receives nothing.
//! - `Replace(value)` rewrites the payload. Before create and update it
//!   replaces the input, before find and delete it is merged into the filter,
//!   and after any action it replaces the result.
//!
//! An error from a hook aborts the operation and is returned unchanged.
//!
//! # Example
//!
//! ```
//! use tessera_persistence::triggers::{
//!     AccessKey, Phase, TriggerAction, TriggerEvent, TriggerOutcome, TriggerRegistry,
//! };
//!
//! let triggers = TriggerRegistry::new();
//! triggers
//!     .register(
//!         "Order",
//!         Phase::Before,
//!         TriggerAction::Delete,
//!         AccessKey::default(),
//!         |_event: TriggerEvent| async move { Ok(TriggerOutcome::Veto) },
//!     )
//!     .unwrap();
//! assert_eq!(triggers.len(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::context::{QueryContext, RequestContext};
use crate::error::{PolicyError, StorageResult};
use crate::model::Model;
use crate::naming;

/// Operations hooks can intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerAction {
    /// Any read.
    Find,
    /// Create, create many and import.
    Create,
    /// Update and update many.
    Update,
    /// Delete.
    Delete,
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerAction::Find => write!(f, "find"),
            TriggerAction::Create => write!(f, "create"),
            TriggerAction::Update => write!(f, "update"),
            TriggerAction::Delete => write!(f, "delete"),
        }
    }
}

/// When a hook runs relative to the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before execution, with the input or filter.
    Before,
    /// After execution, with the result.
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => write!(f, "before"),
            Phase::After => write!(f, "after"),
        }
    }
}

/// Access role and route selecting a per-model hook.
///
/// Both parts are slug-normalized on construction, so `"Admin Panel"`,
/// `"admin_panel"` and `"adminPanel"` name the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AccessKey {
    access_role: String,
    route: String,
}

impl AccessKey {
    /// Builds a key from optional role and route.
    pub fn new(access_role: Option<&str>, route: Option<&str>) -> Self {
        Self {
            access_role: access_role.map(naming::to_slug).unwrap_or_default(),
            route: route.map(naming::to_slug).unwrap_or_default(),
        }
    }

    /// The key a query context selects.
    pub fn from_context(context: &QueryContext) -> Self {
        Self::new(context.access_role.as_deref(), context.route.as_deref())
    }

    /// Normalized access role, empty when unset.
    pub fn access_role(&self) -> &str {
        &self.access_role
    }

    /// Normalized route, empty when unset.
    pub fn route(&self) -> &str {
        &self.route
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.access_role, self.route)
    }
}

/// What a hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Proceed unchanged.
    Continue,
    /// Abort the operation.
    Veto,
    /// Rewrite the payload or result.
    Replace(Value),
}

/// Everything a hook receives.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// Model the operation runs on.
    pub model: Arc<Model>,
    /// Intercepted action.
    pub action: TriggerAction,
    /// Phase of this dispatch.
    pub phase: Phase,
    /// The caller.
    pub request: RequestContext,
    /// Input, filters or result, depending on phase and action.
    pub context: QueryContext,
}

/// A before or after hook.
///
/// Implemented for every `Fn(TriggerEvent) -> impl Future<Output = StorageResult<TriggerOutcome>>`.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Runs the hook.
    async fn fire(&self, event: TriggerEvent) -> StorageResult<TriggerOutcome>;
}

#[async_trait]
impl<F, Fut> Trigger for F
where
    F: Fn(TriggerEvent) -> Fut + Send + Sync,
    Fut: Future<Output = StorageResult<TriggerOutcome>> + Send + 'static,
{
    async fn fire(&self, event: TriggerEvent) -> StorageResult<TriggerOutcome> {
        (self)(event).await
    }
}

/// A named function invoked through [`TriggerRegistry::run`].
#[async_trait]
pub trait Function: Send + Sync {
    /// Runs the function.
    async fn call(&self, payload: Value, request: RequestContext) -> StorageResult<Value>;
}

#[async_trait]
impl<F, Fut> Function for F
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = StorageResult<Value>> + Send + 'static,
{
    async fn call(&self, payload: Value, request: RequestContext) -> StorageResult<Value> {
        (self)(payload, request).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedKey {
    model: String,
    phase: Phase,
    action: TriggerAction,
    access: AccessKey,
}

#[derive(Default)]
struct Registrations {
    global: HashMap<(Phase, TriggerAction), Arc<dyn Trigger>>,
    scoped: HashMap<ScopedKey, Arc<dyn Trigger>>,
    functions: HashMap<String, Arc<dyn Function>>,
}

/// Hook and function registrations.
///
/// Registration takes the write lock; dispatch clones the matching hooks out
/// under the read lock and awaits them after releasing it.
#[derive(Default)]
pub struct TriggerRegistry {
    inner: RwLock<Registrations>,
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TriggerRegistry")
            .field("global", &inner.global.len())
            .field("scoped", &inner.scoped.len())
            .field("functions", &inner.functions.len())
            .finish()
    }
}

impl TriggerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook that fires for every model.
    pub fn register_all(
        &self,
        phase: Phase,
        action: TriggerAction,
        trigger: impl Trigger + 'static,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.global.contains_key(&(phase, action)) {
            return Err(PolicyError::DuplicateTrigger {
                key: format!("*/{}/{}", phase, action),
            }
            .into());
        }
        inner.global.insert((phase, action), Arc::new(trigger));
        info!(%phase, %action, "registered all-model trigger");
        Ok(())
    }

    /// Registers a hook for one model and access key.
    ///
    /// The model may be given as model name or collection name.
    pub fn register(
        &self,
        model: &str,
        phase: Phase,
        action: TriggerAction,
        access: AccessKey,
        trigger: impl Trigger + 'static,
    ) -> StorageResult<()> {
        let key = ScopedKey {
            model: naming::model_name(model),
            phase,
            action,
            access,
        };
        let mut inner = self.inner.write();
        if inner.scoped.contains_key(&key) {
            return Err(PolicyError::DuplicateTrigger {
                key: format!("{}/{}/{}/{}", key.model, phase, action, key.access),
            }
            .into());
        }
        info!(model = %key.model, %phase, %action, access = %key.access, "registered trigger");
        inner.scoped.insert(key, Arc::new(trigger));
        Ok(())
    }

    /// Registers a named function.
    pub fn define(&self, name: &str, function: impl Function + 'static) -> StorageResult<()> {
        let mut inner = self.inner.write();
        if inner.functions.contains_key(name) {
            return Err(PolicyError::DuplicateFunction {
                name: name.to_string(),
            }
            .into());
        }
        inner.functions.insert(name.to_string(), Arc::new(function));
        info!(function = name, "registered function");
        Ok(())
    }

    /// Runs a named function.
    pub async fn run(
        &self,
        name: &str,
        payload: Value,
        request: RequestContext,
    ) -> StorageResult<Value> {
        let function = self.inner.read().functions.get(name).cloned();
        let function = function.ok_or_else(|| PolicyError::UnknownFunction {
            name: name.to_string(),
        })?;
        debug!(function = name, "running function");
        function.call(payload, request).await
    }

    /// Number of registered hooks in both tiers.
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.global.len() + inner.scoped.len()
    }

    /// Returns true when no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hooks(
        &self,
        model: &Model,
        phase: Phase,
        action: TriggerAction,
        access: &AccessKey,
    ) -> Vec<Arc<dyn Trigger>> {
        let inner = self.inner.read();
        let key = ScopedKey {
            model: model.name().to_string(),
            phase,
            action,
            access: access.clone(),
        };
        inner
            .global
            .get(&(phase, action))
            .into_iter()
            .chain(inner.scoped.get(&key))
            .cloned()
            .collect()
    }

    /// Dispatches one phase of an action.
    ///
    /// Returns the context after every replacement, or `None` when a hook vetoed.
    pub async fn dispatch(
        &self,
        model: &Arc<Model>,
        phase: Phase,
        action: TriggerAction,
        request: &RequestContext,
        mut context: QueryContext,
    ) -> StorageResult<Option<QueryContext>> {
        let hooks = self.hooks(model, phase, action, &AccessKey::from_context(&context));
        if hooks.is_empty() {
            return Ok(Some(context));
        }

        for hook in hooks {
            let event = TriggerEvent {
                model: Arc::clone(model),
                action,
                phase,
                request: request.clone(),
                context: context.clone(),
            };
            match hook.fire(event).await? {
                TriggerOutcome::Continue => {}
                TriggerOutcome::Veto => {
                    debug!(model = %model.name(), %phase, %action, "trigger vetoed operation");
                    return Ok(None);
                }
                TriggerOutcome::Replace(value) => apply_replacement(&mut context, phase, action, value),
            }
        }
        Ok(Some(context))
    }
}

fn apply_replacement(context: &mut QueryContext, phase: Phase, action: TriggerAction, value: Value) {
    match (phase, action) {
        (Phase::After, _) => context.data = Some(value),
        (Phase::Before, TriggerAction::Create | TriggerAction::Update) => context.input = Some(value),
        (Phase::Before, TriggerAction::Find | TriggerAction::Delete) => {
            let mut filters = match context.filters.take() {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            if let Value::Object(extra) = value {
                filters.extend(extra);
            }
            context.filters = Some(Value::Object(filters));
        }
    }
}
