//! Server configuration.
//!
//! Settings come from environment variables, CLI arguments, or a YAML file,
//! all validated the same way before the server starts.

use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host address
    #[validate(length(min = 1, message = "HTTP host cannot be empty"))]
    pub http_host: String,

    /// HTTP server port (1-65535)
    #[validate(range(
        min = 1,
        max = 65535,
        message = "HTTP port must be between 1 and 65535"
    ))]
    pub http_port: u16,

    /// PostgreSQL connection URL
    #[validate(length(min = 1, message = "database URL cannot be empty"))]
    pub database_url: String,

    /// Per-session statement timeout in milliseconds; 0 disables it
    pub statement_timeout_ms: u64,

    /// Whether to create tables, indexes and triggers on startup
    pub setup_on_start: bool,

    /// Whether to run the server in daemon mode
    pub daemon: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            database_url: "postgres://postgres@localhost/autumndb".to_string(),
            statement_timeout_ms: 30_000,
            setup_on_start: true,
            daemon: false,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("AUTUMNDB_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| ServerConfig::default().database_url);

        let config = Self {
            http_host: env::var("AUTUMNDB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parse_env_var("AUTUMNDB_PORT", "8080")?,
            database_url,
            statement_timeout_ms: parse_env_var("AUTUMNDB_STATEMENT_TIMEOUT_MS", "30000")?,
            setup_on_start: parse_env_var("AUTUMNDB_SETUP_ON_START", "true")?,
            daemon: false,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from CLI arguments with validation
    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        let config = Self {
            http_host: cli.http_host,
            http_port: cli.http_port,
            database_url: cli.database_url,
            statement_timeout_ms: cli.statement_timeout_ms,
            setup_on_start: cli.setup_on_start,
            daemon: cli.daemon,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }
}

/// CLI configuration (parsed from command line arguments)
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub http_host: String,
    pub http_port: u16,
    pub database_url: String,
    pub statement_timeout_ms: u64,
    pub setup_on_start: bool,
    pub daemon: bool,
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
