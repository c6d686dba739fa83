//! StorageBackend implementation for SQLite.

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{ToSql, params_from_iter};
use serde_json::Value;
use tracing::debug;

use crate::backends::sql::{self, SqlBuilder, SqlParam, SqliteDialect, decode_text};
use crate::backends::{
    Accumulator, BackendCapability, BackendKind, Record, StorageBackend, new_id, record_id,
    refuse_empty_delete,
};
use crate::coerce::float_value;
use crate::error::StorageResult;
use crate::model::{FieldKind, Model, PRIMARY_KEY};
use crate::query::{Predicate, Selection};

use super::SqliteBackend;
use super::schema::{self, TablePlan};

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Text(Some(s)) => ToSqlOutput::from(s.as_str()),
            SqlParam::Int(Some(i)) => ToSqlOutput::from(*i),
            SqlParam::Float(Some(f)) => ToSqlOutput::from(*f),
            SqlParam::Bool(Some(b)) => ToSqlOutput::from(*b),
            SqlParam::Json(Some(v)) => ToSqlOutput::from(v.to_string()),
            _ => ToSqlOutput::from(rusqlite::types::Null),
        })
    }
}

/// Decodes one cell by the kind of the field it belongs to.
fn decode(kind: FieldKind, cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if kind == FieldKind::Bool => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => float_value(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            decode_text(kind, String::from_utf8_lossy(t).into_owned())
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        let mut capabilities = vec![
            BackendCapability::Crud,
            BackendCapability::Sorting,
            BackendCapability::OffsetPagination,
            BackendCapability::RegexMatch,
            BackendCapability::DistinctCount,
        ];
        if !self.is_memory() {
            capabilities.push(BackendCapability::Durable);
        }
        capabilities
    }

    async fn ensure_collection(&self, model: &Model) -> StorageResult<()> {
        let plan = TablePlan::for_model(model);
        debug!(table = %plan.table, "ensuring table");
        self.with_connection(move |conn| schema::apply(conn, &plan)).await
    }

    async fn find(&self, model: &Model, selection: &Selection) -> StorageResult<Vec<Record>> {
        let stmt = SqlBuilder::new(&SqliteDialect, model).select(selection);
        let columns = sql::columns(model);
        debug!(collection = %model.collection(), sql = %stmt.sql, params = stmt.params.len(), "select");

        self.with_connection(move |conn| {
            let mut prepared = conn.prepare(&stmt.sql)?;
            let mut rows = prepared.query(params_from_iter(stmt.params.iter()))?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Record::new();
                for (i, (name, kind)) in columns.iter().enumerate() {
                    record.insert(name.clone(), decode(*kind, row.get_ref(i)?));
                }
                records.push(record);
            }
            Ok(records)
        })
        .await
    }

    async fn count(&self, model: &Model, selection: &Selection) -> StorageResult<u64> {
        let stmt = SqlBuilder::new(&SqliteDialect, model).count(selection);
        debug!(collection = %model.collection(), sql = %stmt.sql, "count");

        self.with_connection(move |conn| {
            let count: i64 = conn.query_row(&stmt.sql, params_from_iter(stmt.params.iter()), |row| {
                row.get(0)
            })?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn aggregate(
        &self,
        model: &Model,
        predicate: &Predicate,
        accumulator: Accumulator,
        field: &str,
    ) -> StorageResult<Value> {
        let Some((stmt, kind)) =
            SqlBuilder::new(&SqliteDialect, model).aggregate(predicate, accumulator, field)
        else {
            return Ok(accumulator.empty_value());
        };
        debug!(collection = %model.collection(), sql = %stmt.sql, "aggregate");

        let value = self
            .with_connection(move |conn| {
                Ok(conn.query_row(&stmt.sql, params_from_iter(stmt.params.iter()), |row| {
                    Ok(decode(kind, row.get_ref(0)?))
                })?)
            })
            .await?;

        Ok(if value.is_null() {
            accumulator.empty_value()
        } else {
            value
        })
    }

    async fn insert(&self, model: &Model, records: Vec<Record>) -> StorageResult<Vec<String>> {
        let mut ids = Vec::with_capacity(records.len());
        let mut statements = Vec::with_capacity(records.len());
        for mut record in records {
            let id = record_id(&record).unwrap_or_else(new_id);
            record.insert(PRIMARY_KEY.to_string(), Value::String(id.clone()));
            statements.push(SqlBuilder::new(&SqliteDialect, model).insert(&record));
            ids.push(id);
        }
        debug!(collection = %model.collection(), rows = statements.len(), "insert");

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            for stmt in &statements {
                tx.execute(&stmt.sql, params_from_iter(stmt.params.iter()))?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        Ok(ids)
    }

    async fn update_by_ids(
        &self,
        model: &Model,
        ids: &[String],
        changes: &Record,
    ) -> StorageResult<u64> {
        let Some(stmt) = SqlBuilder::new(&SqliteDialect, model).update(ids, changes) else {
            return Ok(0);
        };
        debug!(collection = %model.collection(), sql = %stmt.sql, "update");

        self.with_connection(move |conn| {
            let changed = conn.execute(&stmt.sql, params_from_iter(stmt.params.iter()))?;
            Ok(changed as u64)
        })
        .await
    }

    async fn delete(&self, model: &Model, predicate: &Predicate) -> StorageResult<u64> {
        refuse_empty_delete(model, predicate)?;
        let stmt = SqlBuilder::new(&SqliteDialect, model).delete(predicate);
        debug!(collection = %model.collection(), sql = %stmt.sql, "delete");

        self.with_connection(move |conn| {
            let deleted = conn.execute(&stmt.sql, params_from_iter(stmt.params.iter()))?;
            Ok(deleted as u64)
        })
        .await
    }
}
