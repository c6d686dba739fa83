//! Backend-agnostic query building.
//!
//! - [`filter`]: the filter AST and its wire format
//! - [`predicate`]: filters lowered against a model, ready for a backend compiler
//! - [`relation`]: relationship alias resolution through subqueries
//! - [`spec`]: the per-operation [`QuerySpec`]

pub mod filter;
pub mod predicate;
pub mod relation;
pub mod spec;

pub use filter::{Condition, Filter, Operator};
pub use predicate::{Comparison, Direction, Grouping, Predicate, Selection, SortKey};
pub use relation::KeyLookup;
pub use spec::QuerySpec;
