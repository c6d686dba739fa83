//! Command line configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TESSERA_STRUCTURE` | models.json | Model structure document |
//! | `TESSERA_BACKEND` | sqlite | Storage backend |
//! | `TESSERA_DATABASE_URL` | | Database file or connection string |
//! | `TESSERA_TENANT` | | Tenant the command runs as |
//! | `TESSERA_LOG_LEVEL` | warn | Log level |
//!
//! Engine settings (`TESSERA_TENANCY_ENABLED` and friends) are read by
//! [`EngineConfig::from_env`](tessera_persistence::EngineConfig::from_env).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tessera_persistence::DatabaseConfig;

/// Runs one engine operation against a database.
#[derive(Debug, Clone, Parser)]
#[command(name = "tessera")]
#[command(about = "Query models declared in a structure document")]
pub struct CliConfig {
    /// JSON structure document declaring the models.
    #[arg(long, env = "TESSERA_STRUCTURE", default_value = "models.json")]
    pub structure: PathBuf,

    /// Storage backend (local, sqlite, postgres, mongodb).
    #[arg(long, env = "TESSERA_BACKEND", default_value = "sqlite")]
    pub backend: String,

    /// Database file (local, sqlite) or connection string (postgres, mongodb).
    #[arg(long, env = "TESSERA_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Tenant the command runs as.
    #[arg(long, env = "TESSERA_TENANT")]
    pub tenant: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "TESSERA_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// The operations the command line exposes.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the model registry.
    Models,

    /// Print one page of matching records.
    Find {
        /// Model or collection name.
        model: String,

        /// Filter document as JSON.
        #[arg(long = "where")]
        filter: Option<String>,

        /// 1-based page number.
        #[arg(long, default_value = "1")]
        page: u64,

        /// Records per page.
        #[arg(long, default_value = "10")]
        limit: u64,
    },

    /// Print the number of matching records.
    Count {
        /// Model or collection name.
        model: String,

        /// Filter document as JSON.
        #[arg(long = "where")]
        filter: Option<String>,
    },
}

impl Command {
    /// The filter argument, parsed.
    pub fn filter(&self) -> Result<Value, String> {
        let raw = match self {
            Command::Models => None,
            Command::Find { filter, .. } | Command::Count { filter, .. } => filter.as_deref(),
        };
        match raw {
            Some(raw) => serde_json::from_str(raw).map_err(|e| format!("Invalid --where JSON: {}", e)),
            None => Ok(Value::Null),
        }
    }
}

impl CliConfig {
    /// Validates the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.structure.is_file() {
            errors.push(format!(
                "Structure file not found: {}",
                self.structure.display()
            ));
        }

        let backend = self.backend.trim().to_lowercase();
        let known = DatabaseConfig::available()
            .iter()
            .any(|name| *name == backend || matches_alias(name, &backend));
        if !known {
            errors.push(format!(
                "Unknown backend '{}' (available: {})",
                self.backend,
                DatabaseConfig::available().join(", ")
            ));
        }

        if let Command::Find { page, limit, .. } = &self.command {
            if *page == 0 {
                errors.push("Page cannot be 0".to_string());
            }
            if *limit == 0 {
                errors.push("Limit cannot be 0".to_string());
            }
        }

        if let Err(error) = self.command.filter() {
            errors.push(error);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn matches_alias(name: &str, requested: &str) -> bool {
    matches!(
        (name, requested),
        ("local", "json") | ("postgres", "postgresql") | ("mongodb", "mongo")
    )
}
