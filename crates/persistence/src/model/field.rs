//! Field descriptors and the structure format they are parsed from.

use std::fmt;

use heck::ToTitleCase;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigurationError;
use crate::naming;

/// Storage kind of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Identifier (primary key or reference).
    Id,
    /// Free text.
    String,
    /// Integer number.
    Number,
    /// Floating point number.
    Float,
    /// Point in time.
    Date,
    /// Boolean flag.
    Bool,
    /// Arbitrary nested document.
    Object,
    /// List of values.
    Array,
    /// File or URL reference.
    File,
}

impl FieldKind {
    /// Parses the `type` attribute of a field specification.
    ///
    /// Matching is case-insensitive; unknown spellings fall back to
    /// [`FieldKind::String`].
    pub fn parse(type_name: &str) -> Self {
        match type_name.to_lowercase().as_str() {
            "id" => FieldKind::Id,
            "date" | "time" | "datetime" | "timestamp" => FieldKind::Date,
            "bool" | "boolean" => FieldKind::Bool,
            "float" => FieldKind::Float,
            "int" | "number" => FieldKind::Number,
            "any" | "object" => FieldKind::Object,
            "array" => FieldKind::Array,
            "url" | "file" => FieldKind::File,
            _ => FieldKind::String,
        }
    }

    /// The default value a field of this kind receives on create.
    pub fn default_value(self) -> Value {
        match self {
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Number | FieldKind::Float => Value::from(0),
            FieldKind::Array => Value::Array(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Returns true for kinds stored as nested JSON.
    pub fn is_structured(self) -> bool {
        matches!(self, FieldKind::Object | FieldKind::Array)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Id => "id",
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Float => "float",
            FieldKind::Date => "date",
            FieldKind::Bool => "bool",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::File => "file",
        };
        write!(f, "{}", name)
    }
}

/// A directed edge from a local field to a key of another model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Name of the model on the other end of the edge.
    pub model_name: String,
    /// Key on the parent model the edge points at (usually `_id`).
    pub primary_key: String,
    /// Field on the child model that stores the reference.
    pub foreign_key: String,
}

impl ForeignKey {
    /// Parses a `"collection.key"` reference declared on `field`.
    ///
    /// A missing key, or the key `id`, refers to the parent's `_id`.
    pub fn parse(field: &str, reference: &str) -> Option<Self> {
        let mut parts = reference.split('.');
        let collection = parts.next().map(str::trim).filter(|c| !c.is_empty())?;
        let key = match parts.next().map(str::trim) {
            None | Some("") | Some("id") => "_id",
            Some(key) => key,
        };

        Some(Self {
            model_name: naming::model_name(collection),
            primary_key: key.to_string(),
            foreign_key: field.to_string(),
        })
    }
}

/// One allowed value of an enumerated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    /// Stored value.
    pub value: String,
    /// Human-readable label.
    pub label: String,
}

/// Immutable description of one model field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name as stored.
    pub name: String,
    /// Storage kind.
    pub kind: FieldKind,
    /// Whether the field must be supplied.
    pub required: bool,
    /// Whether the field is redacted from every result.
    pub protected: bool,
    /// Whether the field was declared as a primary key.
    pub primary_key: bool,
    /// Value used on create when the input omits the field.
    pub default_value: Value,
    /// Reference to a parent model, when the field is a foreign key.
    pub foreign_key: Option<ForeignKey>,
    /// Enumerated values, empty when unrestricted.
    pub options: Vec<FieldOption>,
}

impl FieldDescriptor {
    /// Creates a plain field of the given kind with the kind's default value.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            protected: false,
            primary_key: false,
            default_value: kind.default_value(),
            foreign_key: None,
            options: Vec::new(),
        }
    }

    /// Builds a descriptor from its structure specification.
    pub fn from_spec(
        collection: &str,
        name: &str,
        spec: &FieldSpec,
    ) -> Result<Self, ConfigurationError> {
        let kind = spec
            .kind
            .as_deref()
            .map(FieldKind::parse)
            .unwrap_or(FieldKind::String);

        let options = match &spec.options {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    FieldOption {
                        label: value.to_title_case(),
                        value,
                    }
                })
                .collect(),
            Some(Value::Object(pairs)) => pairs
                .iter()
                .map(|(value, label)| FieldOption {
                    value: value.clone(),
                    label: label.as_str().map(str::to_string).unwrap_or_else(|| label.to_string()),
                })
                .collect(),
            Some(other) => {
                return Err(ConfigurationError::MalformedField {
                    collection: collection.to_string(),
                    field: name.to_string(),
                    message: format!("options must be a list or a map, got {}", other),
                });
            }
        };

        let foreign_key = spec
            .foreign_key
            .as_deref()
            .and_then(|reference| ForeignKey::parse(name, reference));

        Ok(Self {
            name: name.to_string(),
            kind,
            required: spec.required,
            protected: spec.protected,
            primary_key: spec.primary_key,
            default_value: spec
                .default_value
                .clone()
                .unwrap_or_else(|| kind.default_value()),
            foreign_key,
            options,
        })
    }
}

/// Declarative specification of a field, as found in a structure document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    /// Type name (`id`, `string`, `number`, `float`, `date`, `bool`, `object`,
    /// `array`, `file`, `url` and their aliases).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Whether the field must be supplied.
    #[serde(default)]
    pub required: bool,
    /// Whether the field is redacted from results.
    #[serde(default)]
    pub protected: bool,
    /// Whether the field is a declared primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Default value on create.
    #[serde(default, alias = "default")]
    pub default_value: Option<Value>,
    /// Parent reference, `"collection.key"`.
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// Enumerated values, as a list or a value to label map.
    #[serde(default)]
    pub options: Option<Value>,
}
