//! Engine and database configuration.
//!
//! Both halves can be built programmatically, deserialized with serde, or read
//! from the environment.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TESSERA_BACKEND` | `sqlite` (`local` without the feature) | Storage backend |
//! | `TESSERA_TENANCY_ENABLED` | true | Scope tenant models to the caller's tenant |
//! | `TESSERA_TENANT_KEY` | tenantId | Token payload key holding the tenant |
//! | `TESSERA_STRICT_COERCION` | false | Reject operands that are neither numbers nor timestamps |
//! | `TESSERA_DEFAULT_PER_PAGE` | 10 | Page size when none is requested |
//!
//! Each backend reads its own variables; see [`LocalBackendConfig::from_env`]
//! and the configuration types of the feature-gated backends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backends::local::{LocalBackend, LocalBackendConfig};
use crate::backends::{BackendKind, StorageBackend};
use crate::error::{ConfigurationError, StorageResult};

#[cfg(feature = "sqlite")]
use crate::backends::sqlite::{SqliteBackend, SqliteBackendConfig};

#[cfg(feature = "postgres")]
use crate::backends::postgres::{PostgresBackend, PostgresConfig};

#[cfg(feature = "mongodb")]
use crate::backends::mongodb::{MongoBackend, MongoConfig};

/// Behaviour of the engine itself, independent of the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scope tenant models to the caller's tenant.
    #[serde(default = "default_true")]
    pub tenancy_enabled: bool,

    /// Token payload key that names the caller's tenant.
    #[serde(default = "default_tenant_key")]
    pub tenant_key: String,

    /// Reject ordering operands that are neither numbers nor timestamps
    /// instead of comparing against the current time.
    #[serde(default)]
    pub strict_coercion: bool,

    /// Page size used by pagination when no limit is set.
    #[serde(default = "default_per_page")]
    pub default_per_page: u64,

    /// Buffered change notifications per subscriber.
    #[serde(default = "default_change_capacity")]
    pub change_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_tenant_key() -> String {
    "tenantId".to_string()
}

fn default_per_page() -> u64 {
    10
}

fn default_change_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tenancy_enabled: true,
            tenant_key: default_tenant_key(),
            strict_coercion: false,
            default_per_page: default_per_page(),
            change_capacity: default_change_capacity(),
        }
    }
}

impl EngineConfig {
    /// Reads the `TESSERA_*` engine variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tenancy_enabled: env_parse("TESSERA_TENANCY_ENABLED").unwrap_or(defaults.tenancy_enabled),
            tenant_key: std::env::var("TESSERA_TENANT_KEY").unwrap_or(defaults.tenant_key),
            strict_coercion: env_parse("TESSERA_STRICT_COERCION").unwrap_or(defaults.strict_coercion),
            default_per_page: env_parse("TESSERA_DEFAULT_PER_PAGE")
                .unwrap_or(defaults.default_per_page),
            change_capacity: defaults.change_capacity,
        }
    }

    /// Validates the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.tenant_key.trim().is_empty() {
            errors.push("Tenant key cannot be empty".to_string());
        }
        if self.default_per_page == 0 {
            errors.push("Default page size cannot be 0".to_string());
        }
        if self.change_capacity == 0 {
            errors.push("Change notification capacity cannot be 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Which backend to connect to, with its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// In-process store, optionally file backed.
    Local(LocalBackendConfig),
    /// SQLite file or in-memory database.
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteBackendConfig),
    /// PostgreSQL server.
    #[cfg(feature = "postgres")]
    Postgres(PostgresConfig),
    /// MongoDB server.
    #[cfg(feature = "mongodb")]
    Mongodb(MongoConfig),
}

impl Default for DatabaseConfig {
    #[cfg(feature = "sqlite")]
    fn default() -> Self {
        DatabaseConfig::Sqlite(SqliteBackendConfig::default())
    }

    #[cfg(not(feature = "sqlite"))]
    fn default() -> Self {
        DatabaseConfig::Local(LocalBackendConfig::default())
    }
}

impl DatabaseConfig {
    /// Reads `TESSERA_BACKEND` and the chosen backend's own variables.
    pub fn from_env() -> StorageResult<Self> {
        match std::env::var("TESSERA_BACKEND") {
            Ok(name) => Self::for_backend(&name, None),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Builds the configuration for a backend named on the command line.
    ///
    /// `location` is the database file (local, sqlite) or connection string
    /// (postgres, mongodb). Without it the backend's environment variables apply.
    pub fn for_backend(name: &str, location: Option<&str>) -> StorageResult<Self> {
        let config = match name.trim().to_lowercase().as_str() {
            "local" | "json" => {
                let mut config = LocalBackendConfig::from_env();
                if let Some(path) = location {
                    config.path = Some(path.into());
                }
                DatabaseConfig::Local(config)
            }
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let mut config = SqliteBackendConfig::from_env();
                if let Some(path) = location {
                    config.path = path.to_string();
                }
                DatabaseConfig::Sqlite(config)
            }
            #[cfg(feature = "postgres")]
            "postgres" | "postgresql" => DatabaseConfig::Postgres(match location {
                Some(url) => PostgresConfig::from_url(url),
                None => PostgresConfig::from_env(),
            }),
            #[cfg(feature = "mongodb")]
            "mongodb" | "mongo" => {
                let mut config = MongoConfig::from_env();
                if let Some(uri) = location {
                    config.uri = uri.to_string();
                }
                DatabaseConfig::Mongodb(config)
            }
            other => {
                return Err(ConfigurationError::InvalidConfig {
                    message: format!(
                        "backend '{}' is unknown or was not compiled in (available: {})",
                        other,
                        Self::available().join(", ")
                    ),
                }
                .into());
            }
        };
        Ok(config)
    }

    /// Names of the backends compiled into this build.
    pub fn available() -> Vec<&'static str> {
        let mut names = vec!["local"];
        if cfg!(feature = "sqlite") {
            names.push("sqlite");
        }
        if cfg!(feature = "postgres") {
            names.push("postgres");
        }
        if cfg!(feature = "mongodb") {
            names.push("mongodb");
        }
        names
    }

    /// The kind of backend this configuration connects to.
    pub fn kind(&self) -> BackendKind {
        match self {
            DatabaseConfig::Local(_) => BackendKind::Local,
            #[cfg(feature = "sqlite")]
            DatabaseConfig::Sqlite(_) => BackendKind::Sqlite,
            #[cfg(feature = "postgres")]
            DatabaseConfig::Postgres(_) => BackendKind::Postgres,
            #[cfg(feature = "mongodb")]
            DatabaseConfig::Mongodb(_) => BackendKind::MongoDB,
        }
    }

    /// Opens the backend.
    pub async fn connect(&self) -> StorageResult<Arc<dyn StorageBackend>> {
        info!(backend = %self.kind(), "connecting storage backend");
        let backend: Arc<dyn StorageBackend> = match self {
            DatabaseConfig::Local(config) => Arc::new(LocalBackend::new(config.clone())?),
            #[cfg(feature = "sqlite")]
            DatabaseConfig::Sqlite(config) => Arc::new(SqliteBackend::new(config.clone())?),
            #[cfg(feature = "postgres")]
            DatabaseConfig::Postgres(config) => Arc::new(PostgresBackend::new(config.clone()).await?),
            #[cfg(feature = "mongodb")]
            DatabaseConfig::Mongodb(config) => Arc::new(MongoBackend::new(config.clone()).await?),
        };
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_defaults() {
        let config: EngineConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.tenancy_enabled);
        assert_eq!(config.tenant_key, "tenantId");
        assert_eq!(config.default_per_page, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_validate_collects_errors() {
        let config = EngineConfig {
            tenant_key: " ".to_string(),
            default_per_page: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_database_config_tagged() {
        let config: DatabaseConfig =
            serde_json::from_value(json!({"backend": "local", "path": "/tmp/data.json"})).unwrap();
        assert_eq!(config.kind(), BackendKind::Local);
        match config {
            DatabaseConfig::Local(local) => {
                assert_eq!(local.path.as_deref(), Some(std::path::Path::new("/tmp/data.json")))
            }
            #[allow(unreachable_patterns)]
            _ => panic!("expected the local backend"),
        }
    }

    #[test]
    fn test_for_backend() {
        let config = DatabaseConfig::for_backend("LOCAL", None).unwrap();
        assert_eq!(config.kind(), BackendKind::Local);

        let err = DatabaseConfig::for_backend("cassandra", None).unwrap_err();
        assert!(err.to_string().contains("cassandra"));
        assert!(DatabaseConfig::available().contains(&"local"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_location() {
        let config = DatabaseConfig::for_backend("sqlite", Some("app.db")).unwrap();
        match config {
            DatabaseConfig::Sqlite(sqlite) => assert_eq!(sqlite.path, "app.db"),
            _ => panic!("expected the sqlite backend"),
        }
    }

    #[tokio::test]
    async fn test_connect_local() {
        let backend = DatabaseConfig::Local(LocalBackendConfig::default())
            .connect()
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::Local);
    }
}
