//! Admin configuration.
//!
//! Mirrors `sqlgate.yaml`: a `database:` section handed to the data layer
//! and a `logging:` section for the subscriber. Every field has a default,
//! so a missing file still yields a usable embedded-file setup.

use std::path::Path;

use serde::Deserialize;
use sqlgate_db::DatabaseConfig;

use crate::error::AdminError;

/// Top-level admin configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdminConfig {
    /// Data layer settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Log level and format.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

fn default_level() -> String {
    "info".to_owned()
}

impl AdminConfig {
    /// Parse configuration from a YAML string. No overrides are applied.
    pub fn parse(yaml: &str) -> Result<Self, AdminError> {
        // An empty file deserializes as unit, not as an empty mapping.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Load configuration from `path`.
    pub fn from_file(path: &Path) -> Result<Self, AdminError> {
        let contents = std::fs::read_to_string(path).map_err(|source| AdminError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Load `path` if it exists (defaults otherwise), apply environment
    /// overrides and validate the selected dialect.
    pub fn load(path: &Path) -> Result<Self, AdminError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.database.apply_env_overrides()?;
        config.database.validate()?;
        Ok(config)
    }
}
