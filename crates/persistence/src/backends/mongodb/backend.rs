//! MongoDB backend implementation.

use std::fmt::Debug;

use mongodb::bson::{Document, doc};
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StorageResult;

/// MongoDB backend for model storage.
pub struct MongoBackend {
    database: Database,
    config: MongoConfig,
}

impl Debug for MongoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoBackend")
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

/// Configuration for the MongoDB backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Connection string.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database name.
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "tessera".to_string()
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
        }
    }
}

impl MongoConfig {
    /// Reads `TESSERA_MONGO_URI` and `TESSERA_MONGO_DATABASE`.
    pub fn from_env() -> Self {
        Self {
            uri: std::env::var("TESSERA_MONGO_URI").unwrap_or_else(|_| default_uri()),
            database: std::env::var("TESSERA_MONGO_DATABASE")
                .unwrap_or_else(|_| default_database()),
        }
    }
}

impl MongoBackend {
    /// Connects and verifies the server responds to `ping`.
    pub async fn new(config: MongoConfig) -> StorageResult<Self> {
        let client = Client::with_uri_str(&config.uri).await?;
        let database = client.database(&config.database);
        database.run_command(doc! {"ping": 1}).await?;

        info!(database = %config.database, "mongodb backend ready");
        Ok(Self { database, config })
    }

    /// Creates a backend from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(MongoConfig::from_env()).await
    }

    pub(crate) fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: MongoConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.uri, "mongodb://localhost:27017");
        assert_eq!(config.database, "tessera");
    }
}
