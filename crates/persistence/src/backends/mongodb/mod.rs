//! MongoDB backend implementation.
//!
//! Each model maps to one collection. Identifiers that look like object ids
//! (24 hex characters) are stored as `ObjectId`, both for `_id` and for
//! foreign keys, and date fields are stored as BSON dates. Records are
//! converted back to the engine's JSON conventions on the way out.
//!
//! Grouping runs natively as an aggregation pipeline.

mod backend;
pub mod filter;
mod storage;

pub use backend::{MongoBackend, MongoConfig};
