//! SQLite backend implementation.
//!
//! Supports both in-memory databases (great for testing) and file-based
//! databases (for development and small deployments). Statements are compiled
//! by the shared [`sql`](crate::backends::sql) layer with `?N` placeholders and
//! executed on the blocking thread pool.
//!
//! # Example
//!
//! ```no_run
//! use tessera_persistence::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory database
//! let backend = SqliteBackend::in_memory()?;
//! assert!(backend.is_memory());
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! One table per model, created on demand:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS orders (
//!     _id TEXT PRIMARY KEY,
//!     status TEXT,
//!     total INTEGER,   -- number and bool kinds
//!     price REAL,      -- float kind
//!     tags TEXT,       -- object and array kinds, serialized JSON
//!     tenantId TEXT
//! );
//! ```
//!
//! Fields added to a model later are appended with `ALTER TABLE`. Rows keep
//! their implicit `rowid`, which orders results after the requested sort keys.

mod backend;
mod schema;
mod storage;

pub use backend::{SqliteBackend, SqliteBackendConfig};
