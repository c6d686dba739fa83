//! PostgreSQL backend implementation.
//!
//! Uses `deadpool-postgres` for connection pooling and `tokio-postgres` for
//! the wire protocol. Statements come from the shared
//! [`sql`](crate::backends::sql) layer: conditions bind `$N::type`
//! placeholders so the server never has to guess a parameter type, and
//! written values bind untyped `$N` placeholders inferred from the column.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS orders (
//!     _seq BIGSERIAL,           -- insertion order, final sort key
//!     _id TEXT PRIMARY KEY,
//!     status TEXT,
//!     total BIGINT,
//!     price DOUBLE PRECISION,
//!     paid BOOLEAN,
//!     tags JSONB,
//!     "tenantId" TEXT
//! );
//! ```

mod backend;
mod storage;

pub use backend::{PostgresBackend, PostgresConfig};
