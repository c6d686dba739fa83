//! StorageBackend implementation for PostgreSQL.

use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::backends::sql::{self, PostgresDialect, SqlBuilder, SqlParam, SqlStatement};
use crate::backends::{
    Accumulator, BackendCapability, BackendKind, Record, StorageBackend, new_id, record_id,
    refuse_empty_delete,
};
use crate::coerce::float_value;
use crate::error::StorageResult;
use crate::model::{FieldKind, Model, PRIMARY_KEY};
use crate::query::{Predicate, Selection};

use super::PostgresBackend;

fn boxed_params(params: &[SqlParam]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|param| -> Box<dyn ToSql + Sync + Send> {
            match param {
                SqlParam::Text(v) => Box::new(v.clone()),
                SqlParam::Int(v) => Box::new(*v),
                SqlParam::Float(v) => Box::new(*v),
                SqlParam::Bool(v) => Box::new(*v),
                SqlParam::Json(v) => Box::new(v.clone()),
            }
        })
        .collect()
}

/// Decodes one column by the kind of the field it belongs to.
fn decode(row: &Row, index: usize, kind: FieldKind) -> StorageResult<Value> {
    let value = match kind {
        FieldKind::Number => row.try_get::<_, Option<i64>>(index)?.map(Value::from),
        FieldKind::Float => row.try_get::<_, Option<f64>>(index)?.map(float_value),
        FieldKind::Bool => row.try_get::<_, Option<bool>>(index)?.map(Value::Bool),
        FieldKind::Object | FieldKind::Array => row.try_get::<_, Option<Value>>(index)?,
        FieldKind::Id | FieldKind::String | FieldKind::Date | FieldKind::File => {
            row.try_get::<_, Option<String>>(index)?.map(Value::String)
        }
    };
    Ok(value.unwrap_or_default())
}

impl PostgresBackend {
    async fn query(&self, stmt: &SqlStatement) -> StorageResult<Vec<Row>> {
        let client = self.get_client().await?;
        let params = boxed_params(&stmt.params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(client.query(&stmt.sql, &param_refs).await?)
    }

    async fn execute(&self, stmt: &SqlStatement) -> StorageResult<u64> {
        let client = self.get_client().await?;
        let params = boxed_params(&stmt.params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(client.execute(&stmt.sql, &param_refs).await?)
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        vec![
            BackendCapability::Crud,
            BackendCapability::Sorting,
            BackendCapability::OffsetPagination,
            BackendCapability::RegexMatch,
            BackendCapability::DistinctCount,
            BackendCapability::Durable,
        ]
    }

    async fn ensure_collection(&self, model: &Model) -> StorageResult<()> {
        let builder = SqlBuilder::new(&PostgresDialect, model);
        let mut statements = builder.create_table();
        let indexes = statements.split_off(1);
        statements.extend(
            model
                .stored_fields()
                .map(|f| builder.add_column(&f.name, f.kind)),
        );
        statements.extend(indexes);

        let client = self.get_client().await?;
        for statement in &statements {
            debug!(table = %model.collection(), sql = %statement, "schema");
            client.batch_execute(statement).await?;
        }
        Ok(())
    }

    async fn find(&self, model: &Model, selection: &Selection) -> StorageResult<Vec<Record>> {
        let stmt = SqlBuilder::new(&PostgresDialect, model).select(selection);
        debug!(collection = %model.collection(), sql = %stmt.sql, params = stmt.params.len(), "select");

        let columns = sql::columns(model);
        let rows = self.query(&stmt).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Record::new();
            for (i, (name, kind)) in columns.iter().enumerate() {
                record.insert(name.clone(), decode(row, i, *kind)?);
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn count(&self, model: &Model, selection: &Selection) -> StorageResult<u64> {
        let stmt = SqlBuilder::new(&PostgresDialect, model).count(selection);
        debug!(collection = %model.collection(), sql = %stmt.sql, "count");

        let rows = self.query(&stmt).await?;
        let count = match rows.first() {
            Some(row) => row.try_get::<_, i64>(0)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn aggregate(
        &self,
        model: &Model,
        predicate: &Predicate,
        accumulator: Accumulator,
        field: &str,
    ) -> StorageResult<Value> {
        let Some((stmt, kind)) =
            SqlBuilder::new(&PostgresDialect, model).aggregate(predicate, accumulator, field)
        else {
            return Ok(accumulator.empty_value());
        };
        debug!(collection = %model.collection(), sql = %stmt.sql, "aggregate");

        let rows = self.query(&stmt).await?;
        let value = match rows.first() {
            Some(row) => decode(row, 0, kind)?,
            None => Value::Null,
        };
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
            statements.push(SqlBuilder::new(&PostgresDialect, model).insert(&record));
            ids.push(id);
        }
        debug!(collection = %model.collection(), rows = statements.len(), "insert");

        let mut client = self.get_client().await?;
        let tx = client.transaction().await?;
        for stmt in &statements {
            let params = boxed_params(&stmt.params);
            let param_refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            tx.execute(&stmt.sql, &param_refs).await?;
        }
        tx.commit().await?;

        Ok(ids)
    }

    async fn update_by_ids(
        &self,
        model: &Model,
        ids: &[String],
        changes: &Record,
    ) -> StorageResult<u64> {
        let Some(stmt) = SqlBuilder::new(&PostgresDialect, model).update(ids, changes) else {
            return Ok(0);
        };
        debug!(collection = %model.collection(), sql = %stmt.sql, "update");
        self.execute(&stmt).await
    }

    async fn delete(&self, model: &Model, predicate: &Predicate) -> StorageResult<u64> {
        refuse_empty_delete(model, predicate)?;
        let stmt = SqlBuilder::new(&PostgresDialect, model).delete(predicate);
        debug!(collection = %model.collection(), sql = %stmt.sql, "delete");
        self.execute(&stmt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use crate::query::Filter;
    use serde_json::json;

    #[test]
    fn test_boxed_params_preserve_order() {
        let params = vec![
            SqlParam::Text(Some("paid".into())),
            SqlParam::Int(Some(3)),
            SqlParam::Json(None),
        ];
        assert_eq!(boxed_params(&params).len(), 3);
    }

    #[test]
    fn test_delete_statement_parameters_follow_emission_order() {
        let registry = ModelRegistry::from_json(&json!({
            "orders": {"status": {"type": "string"}, "total": {"type": "number"}}
        }))
        .unwrap();
        let model = registry.get("Order").unwrap();
        let filter = Filter::parse(json!({
            "status": {"in": ["a", "b"]},
            "total": {"lessThanOrEqualTo": "9"}
        }))
        .unwrap();
        let predicate = Predicate::lower(&model, &filter, false).unwrap();

        let stmt = SqlBuilder::new(&PostgresDialect, &model).delete(&predicate);
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"orders\" WHERE (\"status\" IN ($1::text, $2::text) AND \"total\" <= $3::bigint)"
        );
        assert_eq!(stmt.params[2], SqlParam::Int(Some(9)));
    }
}
