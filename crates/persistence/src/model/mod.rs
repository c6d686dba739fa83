//! Model descriptors and the registry that builds them.

mod descriptor;
mod field;
mod registry;

pub use descriptor::{Model, PRIMARY_KEY, Relationship, TENANT_FIELD};
pub use field::{FieldDescriptor, FieldKind, FieldOption, FieldSpec, ForeignKey};
pub use registry::{ModelRegistry, StructureSpec};
