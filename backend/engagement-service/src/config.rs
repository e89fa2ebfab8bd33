/// Configuration management for Engagement Service
///
/// Loads configuration from environment variables. Unset variables fall back
/// to defaults; set but unparseable ones are rejected.
use anyhow::{Context, Result};
use resilience::{RetryConfig, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ServiceError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Aggregate store settings
    pub store: StoreConfig,
    /// Engagement write policy
    pub engagement: EngagementConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port
    pub http_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => f.write_str("memory"),
            StoreBackend::Postgres => f.write_str("postgres"),
        }
    }
}

/// Aggregate store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Only present for the postgres backend
    pub database: Option<DatabaseConfig>,
    /// Deadline for a single store call
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementConfig {
    /// Retries after a lost version race on a conditional write
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

// Default values
fn default_http_port() -> u16 {
    8010
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    20
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parse_env("PORT", default_http_port)?,
        };

        let backend = parse_env("STORE_BACKEND", || StoreBackend::Memory)?;
        let database = match backend {
            StoreBackend::Postgres => Some(DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .context("DATABASE_URL must be set when STORE_BACKEND=postgres")?,
                max_connections: parse_env("DB_MAX_CONNECTIONS", default_max_connections)?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", default_min_connections)?,
            }),
            StoreBackend::Memory => None,
        };

        if let Some(db) = &database {
            if db.min_connections > db.max_connections {
                return Err(ServiceError::Config(format!(
                    "DB_MIN_CONNECTIONS ({}) exceeds DB_MAX_CONNECTIONS ({})",
                    db.min_connections, db.max_connections
                ))
                .into());
            }
        }

        let store = StoreConfig {
            backend,
            database,
            timeout_ms: parse_env("STORE_TIMEOUT_MS", default_store_timeout_ms)?,
        };
        if store.timeout_ms == 0 {
            return Err(ServiceError::Config("STORE_TIMEOUT_MS must be positive".into()).into());
        }

        let engagement = EngagementConfig {
            max_retries: parse_env("LIKE_TOGGLE_MAX_RETRIES", default_max_retries)?,
            initial_backoff_ms: parse_env("RETRY_INITIAL_BACKOFF_MS", default_initial_backoff_ms)?,
        };

        Ok(Config {
            app,
            store,
            engagement,
        })
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> TimeoutConfig {
        TimeoutConfig {
            duration: Duration::from_millis(self.timeout_ms),
        }
    }
}

impl EngagementConfig {
    /// Retry policy for version conflicts of conditional writes
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..RetryConfig::default()
        }
    }
}

fn parse_env<T, D>(name: &str, default: D) -> std::result::Result<T, ServiceError>
where
    T: FromStr,
    T::Err: fmt::Display,
    D: FnOnce() -> T,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ServiceError::Config(format!("invalid {}='{}': {}", name, raw, e))),
        Err(_) => Ok(default()),
    }
}
