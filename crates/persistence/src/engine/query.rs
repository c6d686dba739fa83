//! The per-operation query builder and its terminal operations.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::record::{create_input, expect_object, expect_records, present, update_input};
use super::results::{DeleteReport, ImportReport, Paginated, Summary};
use super::{ChangeAction, Engine, ScopedLookup};
use crate::aggregate::{ChartParams, flatten};
use crate::backends::{Accumulator, Record, record_id};
use crate::coerce::is_empty;
use crate::context::RequestContext;
use crate::error::{PolicyError, StorageResult};
use crate::model::{Model, PRIMARY_KEY, TENANT_FIELD};
use crate::query::filter::canonical_field;
use crate::query::{Filter, Predicate, QuerySpec, Selection, relation};
use crate::triggers::{Phase, TriggerAction};

/// One operation on one model.
///
/// Builder calls accumulate into a [`QuerySpec`]; the terminal call consumes
/// the builder. Every terminal operation applies tenant scope, runs the
/// before and after triggers of its action, resolves relationship aliases and
/// stamps `id`, `_collection` and `_model` on the records it returns.
///
/// A hook veto surfaces as `None` (or `0` for [`count`](Self::count),
/// [`sum`](Self::sum) and [`average`](Self::average)).
#[derive(Debug)]
pub struct ModelQuery<'e> {
    engine: &'e Engine,
    model: Arc<Model>,
    spec: QuerySpec,
}

impl<'e> ModelQuery<'e> {
    pub(crate) fn new(engine: &'e Engine, model: Arc<Model>) -> Self {
        Self {
            engine,
            model,
            spec: QuerySpec::new(),
        }
    }

    /// The model this operation runs on.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// The accumulated specification.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Mutable access to the accumulated specification.
    pub fn spec_mut(&mut self) -> &mut QuerySpec {
        &mut self.spec
    }

    /// Adds a condition on one field. See [`QuerySpec::where_field`].
    pub fn where_field(mut self, field: &str, value: Value) -> StorageResult<Self> {
        self.spec.where_field(field, value)?;
        Ok(self)
    }

    /// Merges a filter document.
    pub fn where_all(mut self, filter: Value) -> StorageResult<Self> {
        self.spec.where_all(filter)?;
        Ok(self)
    }

    /// Merges a parsed filter.
    pub fn where_filter(mut self, filter: Filter) -> Self {
        self.spec.where_filter(filter);
        self
    }

    /// Appends a sort key.
    pub fn order_by(mut self, field: &str, direction: &str) -> Self {
        self.spec.order_by(field, direction);
        self
    }

    /// Appends several `{field: direction}` sort keys.
    pub fn order_by_all(mut self, keys: &[Map<String, Value>]) -> Self {
        self.spec.order_by_all(keys);
        self
    }

    /// Groups by a field value.
    pub fn group_by(mut self, field: &str) -> Self {
        self.spec.group_by(field);
        self
    }

    /// Adds a raw group stage entry.
    pub fn group_by_raw(mut self, key: &str, expression: Value) -> Self {
        self.spec.group_by_raw(key, expression);
        self
    }

    /// Counts distinct values of a field.
    pub fn distinct(mut self, field: &str) -> Self {
        self.spec.distinct(field);
        self
    }

    /// Counts distinct combinations of several fields.
    pub fn distinct_all(mut self, fields: &[&str]) -> Self {
        self.spec.distinct_all(fields);
        self
    }

    /// Limits the number of records.
    pub fn take(mut self, limit: u64) -> Self {
        self.spec.take(limit);
        self
    }

    /// Selects a 1-based page.
    pub fn page(mut self, page: u64) -> Self {
        self.spec.page(page);
        self
    }

    /// Skips records.
    pub fn skip(mut self, skip: u64) -> Self {
        self.spec.skip(skip);
        self
    }

    /// Attaches the caller.
    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.spec.with_request(request);
        self
    }

    /// Selects per-model hooks by access role and route.
    pub fn with_access(mut self, access_role: Option<&str>, route: Option<&str>) -> Self {
        self.spec
            .with_access(access_role.map(str::to_string), route.map(str::to_string));
        self
    }

    /// Merges request parameters.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.spec.with_params(params);
        self
    }

    /// Sets the parent record of a nested operation.
    pub fn with_parent(mut self, parent: Value) -> Self {
        self.spec.with_parent(parent);
        self
    }

    // Terminal operations

    /// Returns the first matching record.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn find_one(mut self) -> StorageResult<Option<Record>> {
        self.spec.take(1);
        if !self.before_find(TriggerAction::Find).await? {
            return Ok(None);
        }
        let predicate = self.predicate().await?;
        let record = self.read(predicate).await?.into_iter().next();

        let data = record.map(Value::Object).unwrap_or(Value::Null);
        match self.after(TriggerAction::Find, data).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(expect_object(value)?)),
        }
    }

    /// Same as [`find_one`](Self::find_one).
    pub async fn first(self) -> StorageResult<Option<Record>> {
        self.find_one().await
    }

    /// Returns true when at least one record matches.
    pub async fn exists(self) -> StorageResult<bool> {
        Ok(self.find_one().await?.is_some())
    }

    /// Returns one field of the first matching record.
    pub async fn value(self, field: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .find_one()
            .await?
            .and_then(|mut record| record.remove(field)))
    }

    /// Returns every matching record, ordered and paged.
    ///
    /// With grouping configured the grouped rows are returned instead.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn find(mut self) -> StorageResult<Option<Vec<Record>>> {
        if !self.before_find(TriggerAction::Find).await? {
            return Ok(None);
        }
        let predicate = self.predicate().await?;
        let records = self.read(predicate).await?;

        let data = Value::Array(records.into_iter().map(Value::Object).collect());
        self.after(TriggerAction::Find, data)
            .await?
            .map(expect_records)
            .transpose()
    }

    /// Returns one page plus the totals needed to navigate the rest.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn paginate(mut self) -> StorageResult<Option<Paginated>> {
        if !self.before_find(TriggerAction::Find).await? {
            return Ok(None);
        }
        let per_page = self
            .spec
            .limit()
            .unwrap_or(self.engine.config().default_per_page)
            .max(1);
        self.spec.take(per_page);

        let predicate = self.predicate().await?;
        let total = self
            .engine
            .backend()
            .count(&self.model, &Selection::matching(predicate.clone()))
            .await?;
        let records = self.read(predicate).await?;
        let page = Paginated::new(total, per_page, self.spec.current_page(), records);

        debug!(total, per_page, page = page.current_page, "paginated");
        match self
            .after(TriggerAction::Find, serde_json::to_value(&page)?)
            .await?
        {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Counts matching records, or distinct combinations of the distinct fields.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn count(mut self) -> StorageResult<u64> {
        if !self.before_find(TriggerAction::Find).await? {
            return Ok(0);
        }
        let predicate = self.predicate().await?;
        let mut selection = Selection::matching(predicate);
        selection.distinct = self.spec.distinct_fields().to_vec();
        self.engine.backend().count(&self.model, &selection).await
    }

    /// Sum of `field`; `0` when nothing matches or a hook vetoed.
    pub async fn sum(self, field: &str) -> StorageResult<Value> {
        self.scalar(Accumulator::Sum, field, Value::from(0)).await
    }

    /// Largest value of `field`; `null` when nothing matches or a hook vetoed.
    pub async fn max(self, field: &str) -> StorageResult<Value> {
        self.scalar(Accumulator::Max, field, Value::Null).await
    }

    /// Smallest value of `field`; `null` when nothing matches or a hook vetoed.
    pub async fn min(self, field: &str) -> StorageResult<Value> {
        self.scalar(Accumulator::Min, field, Value::Null).await
    }

    /// Mean of `field`; `null` when nothing matches, `0` when a hook vetoed.
    pub async fn average(self, field: &str) -> StorageResult<Value> {
        self.scalar(Accumulator::Avg, field, Value::from(0)).await
    }

    /// Count plus sum, max and min of `target`, and the grouped buckets when
    /// grouping is configured.
    #[instrument(skip_all, fields(model = %self.model.name(), field = %target))]
    pub async fn summary(mut self, target: &str) -> StorageResult<Option<Summary>> {
        if !self.before_find(TriggerAction::Find).await? {
            return Ok(None);
        }
        let predicate = self.predicate().await?;
        let backend = self.engine.backend();

        let mut counted = Selection::matching(predicate.clone());
        counted.distinct = self.spec.distinct_fields().to_vec();
        let count = backend.count(&self.model, &counted).await?;
        let sum = backend
            .aggregate(&self.model, &predicate, Accumulator::Sum, target)
            .await?;
        let max = backend
            .aggregate(&self.model, &predicate, Accumulator::Max, target)
            .await?;
        let min = backend
            .aggregate(&self.model, &predicate, Accumulator::Min, target)
            .await?;
        let graph = if self.spec.grouping().is_empty() {
            Vec::new()
        } else {
            backend
                .group(&self.model, &self.selection(predicate), self.spec.grouping())
                .await?
        };

        Ok(Some(Summary {
            count,
            sum,
            max,
            min,
            graph,
        }))
    }

    /// Runs a chart aggregation described by `params`.
    ///
    /// The parts of each bucket key are flattened onto its row.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn graph(mut self, params: Map<String, Value>) -> StorageResult<Option<Vec<Record>>> {
        self.spec.with_params(params);
        let chart = ChartParams::from_params(&self.spec.context().params);
        chart.configure(&self.model, &mut self.spec)?;

        if !self.before_find(TriggerAction::Find).await? {
            return Ok(None);
        }
        let predicate = self.predicate().await?;
        let rows = self
            .engine
            .backend()
            .group(&self.model, &self.selection(predicate), self.spec.grouping())
            .await?;

        let data = Value::Array(flatten(rows).into_iter().map(Value::Object).collect());
        self.after(TriggerAction::Find, data)
            .await?
            .map(expect_records)
            .transpose()
    }

    /// Creates one record and returns it as stored.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn create(mut self, input: Value) -> StorageResult<Option<Record>> {
        let input = self.stamp_tenant(expect_object(input)?);
        let Some(input) = self
            .before_input(TriggerAction::Create, Value::Object(input))
            .await?
        else {
            return Ok(None);
        };

        let record = create_input(&self.model, &expect_object(input)?, self.tenant().as_deref());
        let ids = self.engine.backend().insert(&self.model, vec![record]).await?;
        let created = self.reload(&ids).await?;
        self.engine.notify(ChangeAction::Create, &self.model);

        let data = created.into_iter().next().map(Value::Object).unwrap_or(Value::Null);
        match self.after(TriggerAction::Create, data).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(expect_object(value)?)),
        }
    }

    /// Creates several records in one write.
    #[instrument(skip_all, fields(model = %self.model.name(), rows = inputs.len()))]
    pub async fn create_many(mut self, inputs: Vec<Value>) -> StorageResult<Option<Vec<Record>>> {
        let inputs = inputs
            .into_iter()
            .map(|input| expect_object(input).map(|map| Value::Object(self.stamp_tenant(map))))
            .collect::<StorageResult<Vec<_>>>()?;
        let Some(inputs) = self
            .before_input(TriggerAction::Create, Value::Array(inputs))
            .await?
        else {
            return Ok(None);
        };

        let tenant = self.tenant();
        let records = expect_records(inputs)?
            .iter()
            .map(|input| create_input(&self.model, input, tenant.as_deref()))
            .collect::<Vec<_>>();
        let ids = self.engine.backend().insert(&self.model, records).await?;
        let created = self.reload(&ids).await?;
        self.engine.notify(ChangeAction::Create, &self.model);

        let data = Value::Array(created.into_iter().map(Value::Object).collect());
        self.after(TriggerAction::Create, data)
            .await?
            .map(expect_records)
            .transpose()
    }

    /// Updates the first matching record and returns it as stored.
    ///
    /// Returns `None` when nothing matches.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn update(mut self, changes: Value) -> StorageResult<Option<Record>> {
        let Some(updated) = self.apply_update(changes, true).await? else {
            return Ok(None);
        };
        let data = updated.into_iter().next().map(Value::Object).unwrap_or(Value::Null);
        match self.after(TriggerAction::Update, data).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(expect_object(value)?)),
        }
    }

    /// Updates every matching record and returns them as stored.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn update_many(mut self, changes: Value) -> StorageResult<Option<Vec<Record>>> {
        let Some(updated) = self.apply_update(changes, false).await? else {
            return Ok(None);
        };
        let data = Value::Array(updated.into_iter().map(Value::Object).collect());
        self.after(TriggerAction::Update, data)
            .await?
            .map(expect_records)
            .transpose()
    }

    /// Deletes every matching record.
    ///
    /// A filter that constrains nothing is refused with
    /// [`PolicyError::EmptyDeleteFilter`], whatever the tenant scope.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub async fn delete(mut self) -> StorageResult<Option<DeleteReport>> {
        if !self.before_find(TriggerAction::Delete).await? {
            return Ok(None);
        }
        if self.spec.filter().is_empty() {
            return Err(PolicyError::EmptyDeleteFilter {
                collection: self.model.collection().to_string(),
            }
            .into());
        }

        let predicate = self.predicate().await?;
        let deleted = self.engine.backend().delete(&self.model, &predicate).await?;
        self.engine.notify(ChangeAction::Delete, &self.model);
        debug!(deleted, "deleted records");

        let report = DeleteReport { deleted };
        match self
            .after(TriggerAction::Delete, serde_json::to_value(report)?)
            .await?
        {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Upserts rows by `unique_keys` (the primary key always counts as one).
    ///
    /// A row whose unique key values match an existing record updates it;
    /// any other row is created. A row carrying an empty unique key is ignored.
    /// Create hooks run once for the whole batch.
    #[instrument(skip_all, fields(model = %self.model.name(), rows = rows.len()))]
    pub async fn import(
        mut self,
        rows: Vec<Value>,
        unique_keys: &[&str],
    ) -> StorageResult<Option<ImportReport>> {
        let Some(rows) = self
            .before_input(TriggerAction::Create, Value::Array(rows))
            .await?
        else {
            return Ok(None);
        };
        let rows = match rows {
            Value::Array(items) => items,
            other => vec![other],
        };

        let mut keys: Vec<String> = unique_keys.iter().map(|k| canonical_field(k)).collect();
        if !keys.iter().any(|k| k == PRIMARY_KEY) {
            keys.push(PRIMARY_KEY.to_string());
        }

        let tenant = self.tenant();
        let mut report = ImportReport::default();
        let mut creates = Vec::new();
        let mut updates = Vec::new();

        'rows: for row in rows {
            let Value::Object(mut row) = row else {
                report.ignored += 1;
                continue;
            };
            if let Some(id) = row.remove("id") {
                row.entry(PRIMARY_KEY).or_insert(id);
            }
            let row = self.stamp_tenant(row);

            let mut lookup = Filter::new();
            for key in &keys {
                if let Some(value) = row.get(key) {
                    if is_empty(value) {
                        report.ignored += 1;
                        continue 'rows;
                    }
                    lookup.merge(Filter::equals(key, value.clone()));
                }
            }

            let existing = if lookup.is_empty() {
                None
            } else {
                self.existing_id(lookup).await?
            };
            match existing {
                Some(id) => updates.push((id, update_input(&self.model, &row))),
                None => creates.push(create_input(&self.model, &row, tenant.as_deref())),
            }
        }

        let backend = self.engine.backend();
        if !creates.is_empty() {
            let ids = backend.insert(&self.model, creates).await?;
            report.imported = ids.len() as u64;
            report.data.extend(self.reload(&ids).await?);
        }
        for (id, changes) in updates {
            let ids = [id];
            if backend.update_by_ids(&self.model, &ids, &changes).await? > 0 {
                report.updated += 1;
                report.data.extend(self.reload(&ids).await?);
            } else {
                report.ignored += 1;
            }
        }

        let mut report = report.finish();
        self.engine.notify(ChangeAction::Import, &self.model);
        debug!(
            imported = report.imported,
            updated = report.updated,
            ignored = report.ignored,
            "imported rows"
        );

        let data = Value::Array(report.data.drain(..).map(Value::Object).collect());
        match self.after(TriggerAction::Create, data).await? {
            Some(value) => {
                report.data = expect_records(value)?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    // Internals

    fn request(&self) -> RequestContext {
        self.spec.request().cloned().unwrap_or_default()
    }

    fn tenant(&self) -> Option<String> {
        self.engine.tenant_for(&self.model, self.spec.request())
    }

    fn stamp_tenant(&self, mut input: Map<String, Value>) -> Map<String, Value> {
        if let Some(tenant) = self.tenant() {
            input.insert(TENANT_FIELD.to_string(), Value::String(tenant));
        }
        input
    }

    /// Runs before-hooks that see the filter. Returns false on a veto.
    async fn before_find(&mut self, action: TriggerAction) -> StorageResult<bool> {
        let filters = self.spec.filter().to_value();
        let mut context = self.spec.context().clone();
        context.filters = Some(filters.clone());

        let Some(context) = self
            .engine
            .triggers()
            .dispatch(&self.model, Phase::Before, action, &self.request(), context)
            .await?
        else {
            return Ok(false);
        };

        if let Some(rewritten) = &context.filters {
            if *rewritten != filters {
                *self.spec.filter_mut() = Filter::parse(rewritten.clone())?;
            }
        }
        *self.spec.context_mut() = context;
        Ok(true)
    }

    /// Runs before-hooks that see the input. Returns `None` on a veto.
    async fn before_input(&mut self, action: TriggerAction, input: Value) -> StorageResult<Option<Value>> {
        let mut context = self.spec.context().clone();
        context.input = Some(input);

        let Some(context) = self
            .engine
            .triggers()
            .dispatch(&self.model, Phase::Before, action, &self.request(), context)
            .await?
        else {
            return Ok(None);
        };
        let input = context.input.clone().unwrap_or(Value::Null);
        *self.spec.context_mut() = context;
        Ok(Some(input))
    }

    /// Runs after-hooks on the result. Returns `None` on a veto.
    async fn after(&self, action: TriggerAction, data: Value) -> StorageResult<Option<Value>> {
        let mut context = self.spec.context().clone();
        context.data = Some(data);

        Ok(self
            .engine
            .triggers()
            .dispatch(&self.model, Phase::After, action, &self.request(), context)
            .await?
            .map(|context| context.data.unwrap_or(Value::Null)))
    }

    /// Lowers the filter after tenant scope and relationship resolution.
    async fn predicate(&self) -> StorageResult<Predicate> {
        let mut filter = self.spec.filter().clone();
        if let Some(tenant) = self.tenant() {
            filter.and.push(Filter::equals(TENANT_FIELD, Value::String(tenant)));
        }

        let lookup = ScopedLookup {
            engine: self.engine,
            request: self.spec.request(),
        };
        let resolved = relation::resolve(self.engine.registry(), &lookup, &self.model, filter).await?;
        Ok(Predicate::lower(
            &self.model,
            &resolved,
            self.engine.config().strict_coercion,
        )?)
    }

    fn selection(&self, predicate: Predicate) -> Selection {
        Selection {
            predicate,
            order: self.spec.order().to_vec(),
            distinct: self.spec.distinct_fields().to_vec(),
            limit: self.spec.limit(),
            offset: self.spec.offset(),
        }
    }

    async fn read(&self, predicate: Predicate) -> StorageResult<Vec<Record>> {
        let selection = self.selection(predicate);
        let backend = self.engine.backend();
        if !self.spec.grouping().is_empty() {
            return backend
                .group(&self.model, &selection, self.spec.grouping())
                .await;
        }
        Ok(backend
            .find(&self.model, &selection)
            .await?
            .into_iter()
            .map(|record| present(&self.model, record))
            .collect())
    }

    /// Re-reads records by identifier, in identifier order.
    async fn reload(&self, ids: &[String]) -> StorageResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::is_in(PRIMARY_KEY, ids.iter().cloned().map(Value::String).collect());
        let predicate = Predicate::lower(&self.model, &filter, false)?;
        let mut records = self
            .engine
            .backend()
            .find(&self.model, &Selection::matching(predicate))
            .await?;
        records.sort_by_key(|record| {
            record_id(record).and_then(|id| ids.iter().position(|candidate| *candidate == id))
        });
        Ok(records
            .into_iter()
            .map(|record| present(&self.model, record))
            .collect())
    }

    async fn existing_id(&self, mut filter: Filter) -> StorageResult<Option<String>> {
        if let Some(tenant) = self.tenant() {
            filter.and.push(Filter::equals(TENANT_FIELD, Value::String(tenant)));
        }
        let predicate = Predicate::lower(&self.model, &filter, self.engine.config().strict_coercion)?;
        let mut selection = Selection::matching(predicate);
        selection.limit = Some(1);
        let found = self.engine.backend().find(&self.model, &selection).await?;
        Ok(found.first().and_then(record_id))
    }

    async fn scalar(
        mut self,
        accumulator: Accumulator,
        field: &str,
        vetoed: Value,
    ) -> StorageResult<Value> {
        if !self.before_find(TriggerAction::Find).await? {
            return Ok(vetoed);
        }
        let predicate = self.predicate().await?;
        self.engine
            .backend()
            .aggregate(&self.model, &predicate, accumulator, field)
            .await
    }

    /// Collects the affected identifiers, applies the changes and re-reads.
    async fn apply_update(&mut self, changes: Value, first_only: bool) -> StorageResult<Option<Vec<Record>>> {
        let changes = expect_object(changes)?;
        let Some(changes) = self
            .before_input(TriggerAction::Update, Value::Object(changes))
            .await?
        else {
            return Ok(None);
        };
        let changes = update_input(&self.model, &expect_object(changes)?);

        let predicate = self.predicate().await?;
        let mut selection = Selection::matching(predicate);
        selection.order = self.spec.order().to_vec();
        if first_only {
            selection.limit = Some(1);
        }

        let backend = self.engine.backend();
        let ids: Vec<String> = backend
            .find(&self.model, &selection)
            .await?
            .iter()
            .filter_map(record_id)
            .collect();
        if ids.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let matched = backend.update_by_ids(&self.model, &ids, &changes).await?;
        debug!(matched, "updated records");
        let updated = self.reload(&ids).await?;
        self.engine.notify(ChangeAction::Update, &self.model);
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::local::LocalBackend;
    use crate::config::EngineConfig;
    use crate::error::StorageError;
    use crate::model::ModelRegistry;
    use crate::triggers::{TriggerEvent, TriggerOutcome};
    use serde_json::json;

    async fn engine() -> Engine {
        let registry = ModelRegistry::from_json(&json!({
            "orders": {
                "status": {"options": ["open", "paid"]},
                "total": {"type": "float"},
                "secret": {"protected": true}
            }
        }))
        .unwrap();
        let engine = Engine::new(registry, Arc::new(LocalBackend::in_memory()), EngineConfig::default());
        engine.ensure_collections().await.unwrap();
        engine
    }

    async fn seed(engine: &Engine) {
        let rows = [("open", 10.0), ("open", 5.0), ("paid", 20.0)];
        for (status, total) in rows {
            engine
                .query("orders")
                .unwrap()
                .create(json!({"status": status, "total": total, "secret": "s"}))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_create_stamps_identity() {
        let engine = engine().await;
        let created = engine
            .query("Order")
            .unwrap()
            .create(json!({"id": "o-1", "status": "open", "secret": "hidden"}))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(created["id"], json!("o-1"));
        assert_eq!(created["_id"], json!("o-1"));
        assert_eq!(created["_collection"], json!("orders"));
        assert_eq!(created["_model"], json!("Order"));
        assert!(!created.contains_key("secret"));
    }

    #[tokio::test]
    async fn test_find_and_count() {
        let engine = engine().await;
        seed(&engine).await;

        let open = engine
            .query("orders")
            .unwrap()
            .where_field("status", json!("open"))
            .unwrap()
            .order_by("total", "asc")
            .find()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0]["total"].as_f64(), Some(5.0));

        let count = engine.query("orders").unwrap().count().await.unwrap();
        assert_eq!(count, 3);

        let statuses = engine.query("orders").unwrap().distinct("status").count().await.unwrap();
        assert_eq!(statuses, 2);
    }

    #[tokio::test]
    async fn test_scalar_aggregates() {
        let engine = engine().await;
        seed(&engine).await;

        let sum = engine.query("orders").unwrap().sum("total").await.unwrap();
        assert_eq!(sum.as_f64(), Some(35.0));
        let max = engine.query("orders").unwrap().max("total").await.unwrap();
        assert_eq!(max.as_f64(), Some(20.0));

        let none = engine
            .query("orders")
            .unwrap()
            .where_field("status", json!("missing"))
            .unwrap()
            .min("total")
            .await
            .unwrap();
        assert_eq!(none, Value::Null);
    }

    #[tokio::test]
    async fn test_update_first_only() {
        let engine = engine().await;
        seed(&engine).await;

        let updated = engine
            .query("orders")
            .unwrap()
            .where_field("status", json!("open"))
            .unwrap()
            .order_by("total", "desc")
            .update(json!({"status": "paid"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["total"].as_f64(), Some(10.0));
        assert_eq!(updated["status"], json!("paid"));

        let paid = engine
            .query("orders")
            .unwrap()
            .where_field("status", json!("paid"))
            .unwrap()
            .count()
            .await
            .unwrap();
        assert_eq!(paid, 2);
    }

    #[tokio::test]
    async fn test_update_nothing_matches() {
        let engine = engine().await;
        let updated = engine
            .query("orders")
            .unwrap()
            .where_field("status", json!("open"))
            .unwrap()
            .update(json!({"status": "paid"}))
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_delete_requires_filter() {
        let engine = engine().await;
        seed(&engine).await;

        let err = engine.query("orders").unwrap().delete().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Policy(PolicyError::EmptyDeleteFilter { .. })
        ));

        let report = engine
            .query("orders")
            .unwrap()
            .where_field("status", json!("open"))
            .unwrap()
            .delete()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(engine.query("orders").unwrap().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_before_find_rewrites_filter() {
        let engine = engine().await;
        seed(&engine).await;
        engine
            .triggers()
            .register_all(Phase::Before, TriggerAction::Find, |_e: TriggerEvent| async {
                Ok(TriggerOutcome::Replace(json!({"status": "paid"})))
            })
            .unwrap();

        let found = engine.query("orders").unwrap().find().await.unwrap().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["status"], json!("paid"));
    }

    #[tokio::test]
    async fn test_paginate() {
        let engine = engine().await;
        seed(&engine).await;

        let page = engine
            .query("orders")
            .unwrap()
            .take(2)
            .page(2)
            .paginate()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.last_page, 2);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.data.len(), 1);
    }

    #[tokio::test]
    async fn test_import_upserts() {
        let engine = engine().await;
        engine
            .query("orders")
            .unwrap()
            .create(json!({"id": "a", "status": "open", "total": 1.0}))
            .await
            .unwrap();

        let report = engine
            .query("orders")
            .unwrap()
            .import(
                vec![
                    json!({"id": "a", "total": 9.0}),
                    json!({"id": "b", "status": "paid"}),
                    json!({"id": "", "status": "paid"}),
                    json!("not a row"),
                ],
                &[],
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.imported, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.ignored, 2);
        assert!(report.status);
        assert_eq!(report.message, "SUCCESS");

        let a = engine
            .query("orders")
            .unwrap()
            .where_field("id", json!("a"))
            .unwrap()
            .find_one()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a["total"].as_f64(), Some(9.0));
        assert_eq!(a["status"], json!("open"));
    }
}
