//! Embedded local store.
//!
//! Collections live in process behind one `parking_lot::RwLock`, each a list
//! of records in insertion order. Predicates are evaluated in process and
//! `$group` stages are interpreted for the same expression subset the chart
//! primitive produces, so this is the one non-document backend that supports
//! grouping.
//!
//! With a `path` configured the whole store is written to a JSON file after
//! every mutation (write to a temporary file, then rename) and loaded again
//! on open. File writes run on the blocking thread pool.
//!
//! # Example
//!
//! ```no_run
//! use tessera_persistence::backends::local::{LocalBackend, LocalBackendConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scratch = LocalBackend::in_memory();
//! let durable = LocalBackend::new(LocalBackendConfig {
//!     path: Some("data/store.json".into()),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```

mod eval;
mod group;

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::backends::{
    Accumulator, BackendCapability, BackendKind, Record, StorageBackend, new_id, record_id,
    refuse_empty_delete,
};
use crate::coerce::float_value;
use crate::error::{BackendError, StorageError, StorageResult};
use crate::model::{FieldKind, Model, PRIMARY_KEY};
use crate::query::{Grouping, Predicate, Selection};

use eval::{Matcher, compare_values, lookup, sort_records};

type Collections = BTreeMap<String, Vec<Record>>;

/// Configuration for the local store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// JSON file the store persists to; memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Pretty-print the persisted file.
    #[serde(default)]
    pub pretty: bool,
}

impl LocalBackendConfig {
    /// Reads `TESSERA_LOCAL_PATH`.
    pub fn from_env() -> Self {
        Self {
            path: std::env::var("TESSERA_LOCAL_PATH").ok().map(PathBuf::from),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct Store {
    collections: RwLock<Collections>,
    config: LocalBackendConfig,
}

impl Store {
    /// Applies `work` and persists the result while still holding the write lock,
    /// so the file always reflects the latest state.
    fn mutate<T>(&self, work: impl FnOnce(&mut Collections) -> T) -> StorageResult<T> {
        let mut collections = self.collections.write();
        let result = work(&mut collections);
        if let Some(path) = &self.config.path {
            persist(path, &collections, self.config.pretty)?;
        }
        Ok(result)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "local".to_string(),
        message: format!("{}: {}", path.display(), err),
        source: Some(Box::new(err)),
    })
}

fn duplicate_key(collection: &str, id: &str) -> StorageError {
    StorageError::Backend(BackendError::DuplicateKey {
        backend_name: "local".to_string(),
        message: format!("{} already holds a record with _id {}", collection, id),
    })
}

fn persist(path: &Path, collections: &Collections, pretty: bool) -> StorageResult<()> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(collections)?
    } else {
        serde_json::to_vec(collections)?
    };
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

fn load(path: &Path) -> StorageResult<Collections> {
    if !path.exists() {
        return Ok(Collections::new());
    }
    let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Collections::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// In-process backend, optionally persisted to a JSON file.
pub struct LocalBackend {
    store: Arc<Store>,
}

impl Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("config", &self.store.config)
            .finish_non_exhaustive()
    }
}

impl LocalBackend {
    /// Creates an empty store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(Store {
                collections: RwLock::new(Collections::new()),
                config: LocalBackendConfig::default(),
            }),
        }
    }

    /// Opens or creates a store persisted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::new(LocalBackendConfig {
            path: Some(path.as_ref().to_path_buf()),
            ..Default::default()
        })
    }

    /// Creates a store with custom configuration, loading the file when one exists.
    pub fn new(config: LocalBackendConfig) -> StorageResult<Self> {
        let collections = match &config.path {
            Some(path) => load(path)?,
            None => Collections::new(),
        };
        info!(
            path = ?config.path,
            collections = collections.len(),
            "local backend ready"
        );
        Ok(Self {
            store: Arc::new(Store {
                collections: RwLock::new(collections),
                config,
            }),
        })
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &LocalBackendConfig {
        &self.store.config
    }

    /// Returns true when the store is written to a file.
    pub fn is_durable(&self) -> bool {
        self.store.config.path.is_some()
    }

    /// Runs a mutation, on the blocking pool when it ends in a file write.
    async fn mutate<T, F>(&self, work: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Collections) -> T + Send + 'static,
    {
        if !self.is_durable() {
            return self.store.mutate(work);
        }
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.mutate(work))
            .await
            .map_err(|e| {
                StorageError::Backend(BackendError::Internal {
                    backend_name: "local".to_string(),
                    message: format!("blocking task failed: {}", e),
                    source: None,
                })
            })?
    }

    /// Clones the matching records of a collection in insertion order.
    fn matching(&self, model: &Model, matcher: &Matcher) -> Vec<Record> {
        let collections = self.store.collections.read();
        collections
            .get(model.collection())
            .map(|records| {
                records
                    .iter()
                    .filter(|r| matcher.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn name(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self) -> Vec<BackendCapability> {
        let mut capabilities = vec![
            BackendCapability::Crud,
            BackendCapability::Sorting,
            BackendCapability::OffsetPagination,
            BackendCapability::RegexMatch,
            BackendCapability::DistinctCount,
            BackendCapability::Grouping,
        ];
        if self.is_durable() {
            capabilities.push(BackendCapability::Durable);
        }
        capabilities
    }

    async fn ensure_collection(&self, model: &Model) -> StorageResult<()> {
        if self.store.collections.read().contains_key(model.collection()) {
            return Ok(());
        }
        let collection = model.collection().to_string();
        debug!(collection = %collection, "creating collection");
        self.mutate(move |collections| {
            collections.entry(collection).or_default();
        })
        .await
    }

    async fn find(&self, model: &Model, selection: &Selection) -> StorageResult<Vec<Record>> {
        let matcher = Matcher::compile(model, &selection.predicate)?;
        let mut records = self.matching(model, &matcher);
        debug!(collection = %model.collection(), matched = records.len(), "find");

        sort_records(&mut records, &selection.order);
        let limit = selection.limit.map_or(usize::MAX, |l| l as usize);
        Ok(records
            .into_iter()
            .skip(selection.offset as usize)
            .take(limit)
            .collect())
    }

    async fn count(&self, model: &Model, selection: &Selection) -> StorageResult<u64> {
        let matcher = Matcher::compile(model, &selection.predicate)?;
        let records = self.matching(model, &matcher);
        if selection.distinct.is_empty() {
            return Ok(records.len() as u64);
        }

        let combinations: HashSet<String> = records
            .iter()
            .map(|record| {
                let values: Vec<&Value> = selection
                    .distinct
                    .iter()
                    .map(|field| lookup(record, field))
                    .collect();
                serde_json::to_string(&values).unwrap_or_default()
            })
            .collect();
        Ok(combinations.len() as u64)
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

        let matcher = Matcher::compile(model, predicate)?;
        let field = if field == "id" { PRIMARY_KEY } else { field };
        let records = self.matching(model, &matcher);
        let values: Vec<&Value> = records
            .iter()
            .map(|r| lookup(r, field))
            .filter(|v| !v.is_null())
            .collect();

        let value = match accumulator {
            Accumulator::Sum | Accumulator::Avg => {
                let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
                match (accumulator, numbers.len()) {
                    (_, 0) => Value::Null,
                    (Accumulator::Avg, n) => float_value(numbers.iter().sum::<f64>() / n as f64),
                    _ => float_value(numbers.iter().sum()),
                }
            }
            Accumulator::Max => values
                .into_iter()
                .max_by(|a, b| compare_values(a, b))
                .cloned()
                .unwrap_or(Value::Null),
            Accumulator::Min => values
                .into_iter()
                .min_by(|a, b| compare_values(a, b))
                .cloned()
                .unwrap_or(Value::Null),
        };

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
        let matcher = Matcher::compile(model, &selection.predicate)?;
        let records = self.matching(model, &matcher);
        let mut rows = group::group(&records, grouping)?;
        sort_records(&mut rows, &selection.order);
        debug!(collection = %model.collection(), groups = rows.len(), "group");

        let limit = selection.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows
            .into_iter()
            .skip(selection.offset as usize)
            .take(limit)
            .collect())
    }

    async fn insert(&self, model: &Model, records: Vec<Record>) -> StorageResult<Vec<String>> {
        let mut ids = Vec::with_capacity(records.len());
        let mut stored = Vec::with_capacity(records.len());
        for mut record in records {
            let id = record_id(&record).unwrap_or_else(new_id);
            record.remove("id");
            record.insert(PRIMARY_KEY.to_string(), Value::String(id.clone()));
            ids.push(id);
            stored.push(record);
        }
        debug!(collection = %model.collection(), rows = stored.len(), "insert");

        let collection = model.collection().to_string();
        self.mutate(move |collections| {
            let records = collections.entry(collection.clone()).or_default();
            let mut seen: HashSet<String> = records.iter().filter_map(record_id).collect();
            if let Some(id) = stored.iter().filter_map(record_id).find(|id| !seen.insert(id.clone())) {
                return Err(duplicate_key(&collection, &id));
            }
            records.extend(stored);
            Ok(())
        })
        .await??;
        Ok(ids)
    }

    async fn update_by_ids(
        &self,
        model: &Model,
        ids: &[String],
        changes: &Record,
    ) -> StorageResult<u64> {
        let changes: Record = changes
            .iter()
            .filter(|(field, _)| model.stored_fields().any(|f| &f.name == *field))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if ids.is_empty() || changes.is_empty() {
            return Ok(0);
        }
        debug!(collection = %model.collection(), ids = ids.len(), "update");

        let ids: HashSet<String> = ids.iter().cloned().collect();
        let collection = model.collection().to_string();
        self.mutate(move |collections| {
            let mut matched = 0;
            for record in collections.entry(collection).or_default().iter_mut() {
                if record_id(record).is_some_and(|id| ids.contains(&id)) {
                    for (field, value) in &changes {
                        record.insert(field.clone(), value.clone());
                    }
                    matched += 1;
                }
            }
            matched
        })
        .await
    }

    async fn delete(&self, model: &Model, predicate: &Predicate) -> StorageResult<u64> {
        refuse_empty_delete(model, predicate)?;
        let matcher = Matcher::compile(model, predicate)?;
        debug!(collection = %model.collection(), "delete");

        let collection = model.collection().to_string();
        self.mutate(move |collections| {
            let records = collections.entry(collection).or_default();
            let before = records.len();
            records.retain(|r| !matcher.matches(r));
            (before - records.len()) as u64
        })
        .await
    }
}
