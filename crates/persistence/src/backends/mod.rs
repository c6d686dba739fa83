//! Storage backends.
//!
//! Every backend implements [`StorageBackend`], a small set of raw primitives
//! over lowered queries. The public operation contract (tenant scoping,
//! identity stamping, pagination, triggers) is implemented once on top of these
//! primitives by [`ModelQuery`](crate::engine::ModelQuery).
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Local | always on | In-process JSON collections, optionally persisted to a file |
//! | SQLite | `sqlite` | Embedded relational store, `?N` placeholders |
//! | PostgreSQL | `postgres` | Relational server, `$N` placeholders with typed casts |
//! | MongoDB | `mongodb` | Document store, native `$group` pipelines |
//!
//! # Example
//!
//! ```no_run
//! use tessera_persistence::backends::local::LocalBackend;
//! use tessera_persistence::backends::StorageBackend;
//!
//! let backend = LocalBackend::in_memory();
//! assert_eq!(backend.name(), "local");
//! ```

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{BackendError, PolicyError, StorageError, StorageResult};
use crate::model::Model;
use crate::query::{Grouping, Predicate, Selection};

pub mod local;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mongodb")]
pub mod mongodb;

/// A stored record: field name to value.
pub type Record = Map<String, Value>;

/// Identifies the type of storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process JSON store.
    Local,
    /// SQLite database (file-based or in-memory).
    Sqlite,
    /// PostgreSQL database.
    Postgres,
    /// MongoDB document store.
    MongoDB,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::MongoDB => write!(f, "mongodb"),
        }
    }
}

/// Capabilities that a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCapability {
    /// Basic create, read, update and delete.
    Crud,
    /// Sorting results.
    Sorting,
    /// Offset-based pagination.
    OffsetPagination,
    /// Regular expression matching.
    RegexMatch,
    /// Counting distinct value combinations.
    DistinctCount,
    /// `$group` style grouping with accumulators.
    Grouping,
    /// Native identifier type distinct from strings.
    NativeIdentifiers,
    /// Data survives a process restart.
    Durable,
}

impl std::fmt::Display for BackendCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendCapability::Crud => "crud",
            BackendCapability::Sorting => "sorting",
            BackendCapability::OffsetPagination => "offset-pagination",
            BackendCapability::RegexMatch => "regex-match",
            BackendCapability::DistinctCount => "distinct-count",
            BackendCapability::Grouping => "grouping",
            BackendCapability::NativeIdentifiers => "native-identifiers",
            BackendCapability::Durable => "durable",
        };
        write!(f, "{}", name)
    }
}

/// Scalar aggregates over one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulator {
    /// Sum, `0` when nothing matches.
    Sum,
    /// Maximum, `null` when nothing matches.
    Max,
    /// Minimum, `null` when nothing matches.
    Min,
    /// Arithmetic mean, `null` when nothing matches.
    Avg,
}

impl Accumulator {
    /// Value reported when no record contributes.
    pub fn empty_value(self) -> Value {
        match self {
            Accumulator::Sum => Value::from(0),
            _ => Value::Null,
        }
    }

    /// Returns true for accumulators that only make sense on numbers.
    pub fn is_numeric(self) -> bool {
        matches!(self, Accumulator::Sum | Accumulator::Avg)
    }
}

/// Raw storage primitives every backend provides.
///
/// Records cross this boundary with the primary key under `_id` as a string
/// and dates as RFC 3339 strings. Predicates and selections are already
/// lowered: relationship aliases are resolved and tenant scope is applied.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Returns a human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Returns all capabilities supported by this backend.
    fn capabilities(&self) -> Vec<BackendCapability>;

    /// Checks if this backend supports the given capability.
    fn supports(&self, capability: BackendCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Creates the table or collection for a model if it does not exist.
    async fn ensure_collection(&self, model: &Model) -> StorageResult<()>;

    /// Returns the records matching a selection, ordered and paged.
    async fn find(&self, model: &Model, selection: &Selection) -> StorageResult<Vec<Record>>;

    /// Counts matching records, or distinct combinations when the selection has distinct fields.
    async fn count(&self, model: &Model, selection: &Selection) -> StorageResult<u64>;

    /// Computes a scalar aggregate of `field` over matching records.
    async fn aggregate(
        &self,
        model: &Model,
        predicate: &Predicate,
        accumulator: Accumulator,
        field: &str,
    ) -> StorageResult<Value>;

    /// Runs a grouped query.
    async fn group(
        &self,
        _model: &Model,
        _selection: &Selection,
        _grouping: &Grouping,
    ) -> StorageResult<Vec<Record>> {
        Err(unsupported(self.name(), BackendCapability::Grouping))
    }

    /// Inserts records, assigning identifiers where missing; returns the identifiers.
    async fn insert(&self, model: &Model, records: Vec<Record>) -> StorageResult<Vec<String>>;

    /// Applies the same changes to every record whose identifier is listed.
    async fn update_by_ids(
        &self,
        model: &Model,
        ids: &[String],
        changes: &Record,
    ) -> StorageResult<u64>;

    /// Deletes matching records. An empty predicate is refused.
    async fn delete(&self, model: &Model, predicate: &Predicate) -> StorageResult<u64>;
}

/// Builds the error reported for a capability the backend lacks.
pub fn unsupported(backend_name: &str, capability: BackendCapability) -> StorageError {
    StorageError::Backend(BackendError::UnsupportedCapability {
        backend_name: backend_name.to_string(),
        capability: capability.to_string(),
    })
}

/// Refuses a delete whose predicate would match every record.
pub fn refuse_empty_delete(model: &Model, predicate: &Predicate) -> StorageResult<()> {
    if predicate.is_empty() {
        return Err(PolicyError::EmptyDeleteFilter {
            collection: model.collection().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Returns the string form of a record's `_id`.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get("_id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Generates an identifier for backends without a native one.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use serde_json::json;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Sqlite.to_string(), "sqlite");
        assert_eq!(BackendKind::Postgres.to_string(), "postgres");
        assert_eq!(BackendKind::MongoDB.to_string(), "mongodb");
        assert_eq!(BackendKind::Local.to_string(), "local");
    }

    #[test]
    fn test_backend_capability_display() {
        assert_eq!(BackendCapability::Crud.to_string(), "crud");
        assert_eq!(BackendCapability::Grouping.to_string(), "grouping");
        assert_eq!(
            BackendCapability::OffsetPagination.to_string(),
            "offset-pagination"
        );
    }

    #[test]
    fn test_refuse_empty_delete() {
        let registry = ModelRegistry::from_json(&json!({"orders": {"status": {}}})).unwrap();
        let model = registry.get("Order").unwrap();

        let err = refuse_empty_delete(&model, &Predicate::always()).unwrap_err();
        assert!(err.is_policy());

        let predicate = Predicate::Eq("status".into(), json!("void"));
        assert!(refuse_empty_delete(&model, &predicate).is_ok());
    }

    #[test]
    fn test_record_id() {
        let record = json!({"_id": "a1"}).as_object().cloned().unwrap();
        assert_eq!(record_id(&record).as_deref(), Some("a1"));
        assert_eq!(record_id(&Record::new()), None);
    }

    #[test]
    fn test_accumulator_empty_values() {
        assert_eq!(Accumulator::Sum.empty_value(), json!(0));
        assert_eq!(Accumulator::Max.empty_value(), Value::Null);
        assert!(Accumulator::Avg.is_numeric());
        assert!(!Accumulator::Min.is_numeric());
    }
}
