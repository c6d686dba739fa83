//! The immutable model descriptor.

use std::collections::BTreeMap;

use serde::Serialize;

use super::field::{FieldDescriptor, FieldKind, ForeignKey};
use crate::naming;

/// Name of the field every tenant-scoped model declares.
pub const TENANT_FIELD: &str = "tenantId";

/// Name of the stored primary key.
pub const PRIMARY_KEY: &str = "_id";

const PRIMARY_NAME_CANDIDATES: [&str; 3] = ["name", "title", "label"];

/// A relationship alias resolved on a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship<'a> {
    /// The alias names the model the local foreign key points at.
    Parent(&'a ForeignKey),
    /// The alias names a model whose foreign key points at this one.
    Child(&'a ForeignKey),
}

/// Declarative description of one storage collection.
///
/// Built once by [`ModelRegistry`](super::ModelRegistry) and shared read-only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    name: String,
    collection: String,
    primary_key: String,
    primary_name: String,
    #[serde(skip)]
    fields: BTreeMap<String, FieldDescriptor>,
    valid_fields: Vec<String>,
    required_fields: Vec<String>,
    protected_fields: Vec<String>,
    date_fields: Vec<String>,
    option_fields: Vec<String>,
    file_fields: Vec<String>,
    bool_fields: Vec<String>,
    number_fields: Vec<String>,
    float_fields: Vec<String>,
    parent_keys: Vec<String>,
    parent_fields: BTreeMap<String, ForeignKey>,
    children_fields: BTreeMap<String, ForeignKey>,
    tenant_scoped: bool,
}

impl Model {
    /// Builds a model from its collection key and parsed field descriptors.
    ///
    /// Relationship maps start empty; the registry wires them once every model exists.
    pub(crate) fn new(collection: &str, mut fields: BTreeMap<String, FieldDescriptor>) -> Self {
        fields
            .entry("id".to_string())
            .or_insert_with(|| FieldDescriptor::new("id", FieldKind::Id));

        let valid_fields = fields.keys().cloned().collect();
        let required_fields = names_where(&fields, |f| f.required);
        let protected_fields = names_where(&fields, |f| f.protected);
        let date_fields = names_where(&fields, |f| f.kind == FieldKind::Date);
        let option_fields = names_where(&fields, |f| !f.options.is_empty());
        let file_fields = names_where(&fields, |f| f.kind == FieldKind::File);
        let bool_fields = names_where(&fields, |f| f.kind == FieldKind::Bool);
        let number_fields = names_where(&fields, |f| f.kind == FieldKind::Number);
        let float_fields = names_where(&fields, |f| f.kind == FieldKind::Float);
        let parent_keys = names_where(&fields, |f| f.foreign_key.is_some());

        let primary_name = PRIMARY_NAME_CANDIDATES
            .iter()
            .find(|candidate| fields.contains_key(**candidate))
            .map(|candidate| candidate.to_string())
            .or_else(|| {
                fields
                    .keys()
                    .find(|name| !is_identifier_name(name))
                    .cloned()
            })
            .unwrap_or_else(|| PRIMARY_KEY.to_string());

        let tenant_scoped = fields.contains_key(TENANT_FIELD);

        Self {
            name: naming::model_name(collection),
            collection: naming::collection_name(collection),
            primary_key: PRIMARY_KEY.to_string(),
            primary_name,
            fields,
            valid_fields,
            required_fields,
            protected_fields,
            date_fields,
            option_fields,
            file_fields,
            bool_fields,
            number_fields,
            float_fields,
            parent_keys,
            parent_fields: BTreeMap::new(),
            children_fields: BTreeMap::new(),
            tenant_scoped,
        }
    }

    /// Registers a parent alias. Returns false when the alias is already taken.
    pub(crate) fn add_parent(&mut self, alias: String, key: ForeignKey) -> bool {
        if self.is_taken(&alias) {
            return false;
        }
        self.parent_fields.insert(alias, key);
        true
    }

    /// Registers a child alias. Returns false when the alias is already taken.
    pub(crate) fn add_child(&mut self, alias: String, key: ForeignKey) -> bool {
        if self.is_taken(&alias) {
            return false;
        }
        self.children_fields.insert(alias, key);
        true
    }

    fn is_taken(&self, alias: &str) -> bool {
        self.fields.contains_key(alias)
            || self.parent_fields.contains_key(alias)
            || self.children_fields.contains_key(alias)
    }

    /// Model name (singular, `UpperCamelCase`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage collection or table name (plural, `snake_case`).
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Stored primary key, always `_id`.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Human-readable field used for labels and pickers.
    pub fn primary_name(&self) -> &str {
        &self.primary_name
    }

    /// All field descriptors by name.
    pub fn fields(&self) -> &BTreeMap<String, FieldDescriptor> {
        &self.fields
    }

    /// Looks up a field; `id` and `_id` both resolve to the identifier field.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        match name {
            "_id" | "id" => self.fields.get(PRIMARY_KEY).or_else(|| self.fields.get("id")),
            other => self.fields.get(other),
        }
    }

    /// Fields persisted as columns or document keys, excluding the primary key.
    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().filter(|f| !is_identifier_name(&f.name))
    }

    /// Returns true when `name` is the primary key or a foreign key.
    pub fn is_identifier_field(&self, name: &str) -> bool {
        is_identifier_name(name) || self.parent_keys.iter().any(|k| k == name)
    }

    /// Every declared field name, plus `id`.
    pub fn valid_fields(&self) -> &[String] {
        &self.valid_fields
    }

    /// Fields that must be supplied.
    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// Fields redacted from every result.
    pub fn protected_fields(&self) -> &[String] {
        &self.protected_fields
    }

    /// Fields of kind date.
    pub fn date_fields(&self) -> &[String] {
        &self.date_fields
    }

    /// Fields with enumerated options.
    pub fn option_fields(&self) -> &[String] {
        &self.option_fields
    }

    /// Fields of kind file.
    pub fn file_fields(&self) -> &[String] {
        &self.file_fields
    }

    /// Fields of kind bool.
    pub fn bool_fields(&self) -> &[String] {
        &self.bool_fields
    }

    /// Fields of kind number.
    pub fn number_fields(&self) -> &[String] {
        &self.number_fields
    }

    /// Fields of kind float.
    pub fn float_fields(&self) -> &[String] {
        &self.float_fields
    }

    /// Fields carrying a foreign key.
    pub fn parent_keys(&self) -> &[String] {
        &self.parent_keys
    }

    /// Parent relationships by alias.
    pub fn parent_fields(&self) -> &BTreeMap<String, ForeignKey> {
        &self.parent_fields
    }

    /// Child relationships by alias.
    pub fn children_fields(&self) -> &BTreeMap<String, ForeignKey> {
        &self.children_fields
    }

    /// Resolves a relationship alias.
    pub fn relationship(&self, alias: &str) -> Option<Relationship<'_>> {
        self.parent_fields
            .get(alias)
            .map(Relationship::Parent)
            .or_else(|| self.children_fields.get(alias).map(Relationship::Child))
    }

    /// Whether reads and writes are restricted to the caller's tenant.
    pub fn is_tenant_scoped(&self) -> bool {
        self.tenant_scoped
    }
}

fn names_where(
    fields: &BTreeMap<String, FieldDescriptor>,
    pred: impl Fn(&FieldDescriptor) -> bool,
) -> Vec<String> {
    fields
        .values()
        .filter(|f| pred(f))
        .map(|f| f.name.clone())
        .collect()
}

fn is_identifier_name(name: &str) -> bool {
    name == "_id" || name == "id"
}
