//! Error types for the persistence engine.
//!
//! This module defines all error types used throughout the engine, following a
//! hierarchy that separates configuration errors, validation errors, policy
//! refusals and backend failures.
//!
//! Best-effort value coercion is deliberately absent from this hierarchy: it
//! never fails (see [`crate::coerce`]).

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Model structure and registry errors
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Filter, operand and parameter validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Deliberate refusals
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Returns true when the error is a deliberate policy refusal.
    pub fn is_policy(&self) -> bool {
        matches!(self, StorageError::Policy(_))
    }

    /// Returns true when a write collided with an existing primary key.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StorageError::Backend(BackendError::DuplicateKey { .. }))
    }
}

/// Errors raised while building or consulting the model registry.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The structure document could not be interpreted.
    #[error("malformed structure for {collection}.{field}: {message}")]
    MalformedField {
        collection: String,
        field: String,
        message: String,
    },

    /// The structure document itself is not a collection map.
    #[error("malformed structure: {message}")]
    MalformedStructure { message: String },

    /// The requested model is not registered.
    #[error("unknown model: {name}")]
    UnknownModel { name: String },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Errors related to filters, operands and request parameters.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A filter document does not follow the wire format.
    #[error("invalid filter on '{field}': {message}")]
    InvalidFilter { field: String, message: String },

    /// The operator name is not part of the vocabulary.
    #[error("unknown filter operator '{operator}' on '{field}'")]
    UnknownOperator { field: String, operator: String },

    /// A regular expression operand failed to compile.
    #[error("invalid regular expression '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    /// A calculated operand could not be interpreted in strict mode.
    #[error("operand for '{field}' is neither numeric nor a timestamp: {value}")]
    UncoercibleOperand { field: String, value: String },

    /// Chart or grouping parameters are inconsistent with the model.
    #[error("invalid chart parameters: {message}")]
    InvalidChart { message: String },

    /// Input data for a mutation is not a record.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

/// Deliberate refusals. These are never retried.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Delete was requested without any filter.
    #[error("filter is empty, not allowed to delete all documents of {collection} at once")]
    EmptyDeleteFilter { collection: String },

    /// A trigger is already registered for the key.
    #[error("trigger already registered: {key}")]
    DuplicateTrigger { key: String },

    /// A named function is already registered.
    #[error("function already registered: {name}")]
    DuplicateFunction { name: String },

    /// A named function was invoked but never registered.
    #[error("function not registered: {name}")]
    UnknownFunction { name: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// The requested capability is not supported by this backend.
    #[error("capability '{capability}' not supported by {backend_name}")]
    UnsupportedCapability {
        backend_name: String,
        capability: String,
    },

    /// A record with the same primary key already exists.
    #[error("duplicate key in {backend_name}: {message}")]
    DuplicateKey {
        backend_name: String,
        message: String,
    },

    /// Schema creation failed.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

// Implement conversions from common error types

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "local".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                return StorageError::Backend(BackendError::DuplicateKey {
                    backend_name: "sqlite".to_string(),
                    message: err.to_string(),
                });
            }
        }
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION) {
            return StorageError::Backend(BackendError::DuplicateKey {
                backend_name: "postgres".to_string(),
                message: err.to_string(),
            });
        }
        StorageError::Backend(BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "mongodb".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}
