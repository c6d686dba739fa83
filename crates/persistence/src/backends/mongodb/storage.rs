//! StorageBackend implementation for MongoDB.

use async_trait::async_trait;
use mongodb::IndexModel;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, doc};
use serde_json::Value;
use tracing::debug;

use super::MongoBackend;
use super::filter::{
    aggregate_pipeline, bson_to_json, compile, distinct_count_pipeline, document_to_record,
    field_value, group_pipeline, identifier, record_to_document, sort,
};
use crate::backends::{
    Accumulator, BackendCapability, BackendKind, Record, StorageBackend, record_id,
    refuse_empty_delete,
};
use crate::error::StorageResult;
use crate::model::{FieldKind, Model, PRIMARY_KEY, TENANT_FIELD};
use crate::query::{Grouping, Predicate, Selection};

impl MongoBackend {
    async fn run_pipeline(&self, model: &Model, pipeline: Vec<Document>) -> StorageResult<Vec<Document>> {
        debug!(collection = %model.collection(), pipeline = ?pipeline, "aggregate");
        let mut cursor = self.collection(model.collection()).aggregate(pipeline).await?;
        let mut documents = Vec::new();
        while cursor.advance().await? {
            documents.push(cursor.deserialize_current()?);
        }
        Ok(documents)
    }
}

#[async_trait]
impl StorageBackend for MongoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDB
    }

    fn name(&self) -> &'static str {
        "mongodb"
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        vec![
            BackendCapability::Crud,
            BackendCapability::Sorting,
            BackendCapability::OffsetPagination,
            BackendCapability::RegexMatch,
            BackendCapability::DistinctCount,
            BackendCapability::Grouping,
            BackendCapability::NativeIdentifiers,
            BackendCapability::Durable,
        ]
    }

    async fn ensure_collection(&self, model: &Model) -> StorageResult<()> {
        let mut keys: Vec<&str> = model.parent_keys().iter().map(String::as_str).collect();
        if model.is_tenant_scoped() {
            keys.push(TENANT_FIELD);
        }
        let collection = self.collection(model.collection());
        for key in keys {
            debug!(collection = %model.collection(), key, "ensuring index");
            collection
                .create_index(IndexModel::builder().keys(doc! { key: 1 }).build())
                .await?;
        }
        Ok(())
    }

    async fn find(&self, model: &Model, selection: &Selection) -> StorageResult<Vec<Record>> {
        let filter = compile(model, &selection.predicate);
        debug!(collection = %model.collection(), filter = %filter, "find");

        let collection = self.collection(model.collection());
        let mut find = collection
            .find(filter)
            .sort(sort(selection))
            .skip(selection.offset);
        if let Some(limit) = selection.limit {
            find = find.limit(limit as i64);
        }

        let mut cursor = find.await?;
        let mut records = Vec::new();
        while cursor.advance().await? {
            records.push(document_to_record(cursor.deserialize_current()?));
        }
        Ok(records)
    }

    async fn count(&self, model: &Model, selection: &Selection) -> StorageResult<u64> {
        if !selection.distinct.is_empty() {
            let rows = self
                .run_pipeline(model, distinct_count_pipeline(model, selection))
                .await?;
            let count = rows
                .first()
                .and_then(|row| match row.get("n") {
                    Some(Bson::Int32(n)) => Some(i64::from(*n)),
                    Some(Bson::Int64(n)) => Some(*n),
                    _ => None,
                })
                .unwrap_or(0);
            return Ok(count.max(0) as u64);
        }

        let filter = compile(model, &selection.predicate);
        debug!(collection = %model.collection(), filter = %filter, "count");
        Ok(self
            .collection(model.collection())
            .count_documents(filter)
            .await?)
    }

    async fn aggregate(
        &self,
        model: &Model,
        predicate: &Predicate,
        accumulator: Accumulator,
        field: &str,
    ) -> StorageResult<Value> {
        let Some(descriptor) = model.field(field) else {
            return Ok(accumulator.empty_value());
        };
        let numeric = matches!(descriptor.kind, FieldKind::Number | FieldKind::Float);
        if accumulator.is_numeric() && !numeric {
            return Ok(accumulator.empty_value());
        }

        let rows = self
            .run_pipeline(model, aggregate_pipeline(model, predicate, accumulator, field))
            .await?;
        let value = rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("value"))
            .map(bson_to_json)
            .unwrap_or(Value::Null);

        Ok(if value.is_null() {
            accumulator.empty_value()
        } else {
            value
        })
    }

    async fn group(
        &self,
        model: &Model,
        selection: &Selection,
        grouping: &Grouping,
    ) -> StorageResult<Vec<Record>> {
        let rows = self
            .run_pipeline(model, group_pipeline(model, selection, grouping))
            .await?;
        Ok(rows.into_iter().map(document_to_record).collect())
    }

    async fn insert(&self, model: &Model, records: Vec<Record>) -> StorageResult<Vec<String>> {
        let mut ids = Vec::with_capacity(records.len());
        let mut documents = Vec::with_capacity(records.len());
        for record in &records {
            let mut document = record_to_document(model, record);
            let id = match record_id(record) {
                Some(id) => id,
                None => {
                    let oid = ObjectId::new();
                    document.insert(PRIMARY_KEY, oid);
                    oid.to_hex()
                }
            };
            ids.push(id);
            documents.push(document);
        }
        if documents.is_empty() {
            return Ok(ids);
        }

        debug!(collection = %model.collection(), rows = documents.len(), "insert");
        self.collection(model.collection())
            .insert_many(documents)
            .await?;
        Ok(ids)
    }

    async fn update_by_ids(
        &self,
        model: &Model,
        ids: &[String],
        changes: &Record,
    ) -> StorageResult<u64> {
        let mut set = Document::new();
        for (field, value) in changes {
            if model.stored_fields().any(|f| &f.name == field) {
                set.insert(field.clone(), field_value(model, field, value));
            }
        }
        if ids.is_empty() || set.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Bson> = ids
            .iter()
            .map(|id| identifier(&Value::String(id.clone())))
            .collect();
        let filter = doc! { PRIMARY_KEY: { "$in": ids } };
        debug!(collection = %model.collection(), filter = %filter, "update");

        let result = self
            .collection(model.collection())
            .update_many(filter, doc! { "$set": set })
            .await?;
        Ok(result.matched_count)
    }

    async fn delete(&self, model: &Model, predicate: &Predicate) -> StorageResult<u64> {
        refuse_empty_delete(model, predicate)?;
        let filter = compile(model, predicate);
        debug!(collection = %model.collection(), filter = %filter, "delete");

        let result = self
            .collection(model.collection())
            .delete_many(filter)
            .await?;
        Ok(result.deleted_count)
    }
}
