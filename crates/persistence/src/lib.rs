//! Tessera Persistence Layer
//!
//! This crate provides a backend-agnostic query and persistence engine for
//! models declared as data. One registry of models, one filter language and one
//! set of operations run unchanged against MongoDB, PostgreSQL, SQLite or an
//! in-process JSON store.
//!
//! # Features
//!
//! - **Declarative Models**: fields, options, defaults, foreign keys and
//!   relationship aliases derived from a JSON structure document
//! - **One Filter Language**: equality, membership, ordering, patterns, `$and`,
//!   `$or`, `$nor` and relationship filters, compiled per backend
//! - **Triggers**: before and after hooks that veto or rewrite an operation
//! - **Aggregation**: counts, sums, extrema, grouping and chart buckets
//! - **Multitenancy**: tenant-scoped models are filtered and stamped
//!   automatically
//!
//! # Backend Features
//!
//! ```toml
//! [dependencies]
//! tessera-persistence = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//! - `postgres` - PostgreSQL with JSONB array columns
//! - `mongodb` - MongoDB document storage
//!
//! The local JSON store needs no feature.
//!
//! # Architecture
//!
//! - [`model`] - Model registry built from the structure document
//! - [`query`] - Filters, lowered predicates and the per-operation [`QuerySpec`]
//! - [`backends`] - The [`StorageBackend`] primitives and their implementations
//! - [`engine`] - The [`Engine`] context and the [`ModelQuery`] operations
//! - [`triggers`] - Hook and function registry
//! - [`aggregate`] - Chart aggregation parameters
//! - [`config`] - Engine and database configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use tessera_persistence::backends::local::LocalBackend;
//! use tessera_persistence::{Engine, EngineConfig, ModelRegistry, RequestContext};
//!
//! # async fn example() -> tessera_persistence::StorageResult<()> {
//! let registry = ModelRegistry::from_json(&json!({
//!     "authors": {"name": {"required": true}},
//!     "books": {
//!         "title": {},
//!         "authorId": {"type": "id", "foreignKey": "authors.id"},
//!         "tenantId": {"type": "id"}
//!     }
//! }))?;
//! let engine = Engine::new(registry, Arc::new(LocalBackend::in_memory()), EngineConfig::default());
//! engine.ensure_collections().await?;
//!
//! let request = RequestContext::default().with_fallback_tenant("acme");
//! let books = engine
//!     .query("books")?
//!     .with_request(request)
//!     .where_field("author", json!({"name": "Le Guin"}))?
//!     .order_by("title", "asc")
//!     .paginate()
//!     .await?;
//! # let _ = books;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod aggregate;
pub mod backends;
pub mod coerce;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod model;
pub mod naming;
pub mod query;
pub mod triggers;

pub use backends::{BackendKind, Record, StorageBackend};
pub use config::{DatabaseConfig, EngineConfig};
pub use context::{QueryContext, RequestContext};
pub use engine::{ChangeAction, ChangeEvent, Engine, ModelQuery, Paginated, Summary};
pub use error::{StorageError, StorageResult};
pub use model::{Model, ModelRegistry};
pub use query::{Filter, QuerySpec};
pub use triggers::{Phase, TriggerAction, TriggerOutcome, TriggerRegistry};
