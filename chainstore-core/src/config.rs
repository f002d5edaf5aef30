//! Configuration types

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which durable backend the store writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendMode {
    /// Cache only, nothing is persisted.
    #[default]
    None,
    /// Embedded LMDB key-value store.
    EmbeddedKv,
    /// PostgreSQL.
    Relational,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::None => "none",
            BackendMode::EmbeddedKv => "embedded-kv",
            BackendMode::Relational => "relational",
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(BackendMode::None),
            "embedded-kv" | "lmdb" | "badger" => Ok(BackendMode::EmbeddedKv),
            "relational" | "postgres" | "mysql" => Ok(BackendMode::Relational),
            other => Err(ConfigError::InvalidValue {
                field: "backend".to_string(),
                value: other.to_string(),
                reason: "expected one of none, embedded-kv, relational".to_string(),
            }),
        }
    }
}

/// LMDB environment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedConfig {
    /// Directory holding the environment files.
    pub path: PathBuf,
    /// Map size in megabytes.
    pub max_size_mb: usize,
    /// Maximum number of named tables.
    pub max_tables: u32,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LMDB_PATH),
            max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
            max_tables: DEFAULT_LMDB_MAX_TABLES,
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create timeout for pooled connections
    pub timeout: Duration,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

/// Token bucket guarding relational writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub per_second: u32,
    pub burst: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            per_second: DEFAULT_WRITE_RATE_PER_SEC,
            burst: DEFAULT_WRITE_BURST,
        }
    }
}

/// Background write pool sizing, applied to each backend lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WRITE_WORKERS,
            queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
        }
    }
}

/// Master configuration for a store instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendMode,
    pub embedded: EmbeddedConfig,
    pub relational: RelationalConfig,
    pub governor: GovernorConfig,
    pub writer: WriterConfig,
}

impl StoreConfig {
    /// Build configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CHAINSTORE_BACKEND`: `none`, `embedded-kv` or `relational` (default: none)
    /// - `CHAINSTORE_LMDB_PATH`, `CHAINSTORE_LMDB_MAX_SIZE_MB`, `CHAINSTORE_LMDB_MAX_TABLES`
    /// - `CHAINSTORE_DB_HOST`, `CHAINSTORE_DB_PORT`, `CHAINSTORE_DB_NAME`,
    ///   `CHAINSTORE_DB_USER`, `CHAINSTORE_DB_PASSWORD`, `CHAINSTORE_DB_POOL_SIZE`,
    ///   `CHAINSTORE_DB_TIMEOUT`
    /// - `CHAINSTORE_WRITE_RATE`, `CHAINSTORE_WRITE_BURST` (default: 2/sec, burst 4)
    /// - `CHAINSTORE_WRITE_WORKERS`, `CHAINSTORE_WRITE_QUEUE` (default: 8, 1024)
    ///
    /// Unparseable numbers fall back to their defaults; an unknown backend
    /// mode is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("CHAINSTORE_BACKEND") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "CHAINSTORE_BACKEND".to_string(),
                value: raw.clone(),
                reason: "expected one of none, embedded-kv, relational".to_string(),
            })?,
            None => BackendMode::None,
        };

        let embedded = EmbeddedConfig {
            path: lookup("CHAINSTORE_LMDB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LMDB_PATH)),
            max_size_mb: parse_var(&lookup, "CHAINSTORE_LMDB_MAX_SIZE_MB")
                .unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB),
            max_tables: parse_var(&lookup, "CHAINSTORE_LMDB_MAX_TABLES")
                .unwrap_or(DEFAULT_LMDB_MAX_TABLES),
        };

        let relational = RelationalConfig {
            host: lookup("CHAINSTORE_DB_HOST").unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
            port: parse_var(&lookup, "CHAINSTORE_DB_PORT").unwrap_or(DEFAULT_DB_PORT),
            dbname: lookup("CHAINSTORE_DB_NAME").unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
            user: lookup("CHAINSTORE_DB_USER").unwrap_or_else(|| DEFAULT_DB_USER.to_string()),
            password: lookup("CHAINSTORE_DB_PASSWORD").unwrap_or_default(),
            max_size: parse_var(&lookup, "CHAINSTORE_DB_POOL_SIZE").unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                parse_var(&lookup, "CHAINSTORE_DB_TIMEOUT").unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        };

        let governor = GovernorConfig {
            per_second: parse_var(&lookup, "CHAINSTORE_WRITE_RATE")
                .unwrap_or(DEFAULT_WRITE_RATE_PER_SEC),
            burst: parse_var(&lookup, "CHAINSTORE_WRITE_BURST").unwrap_or(DEFAULT_WRITE_BURST),
        };

        let writer = WriterConfig {
            workers: parse_var(&lookup, "CHAINSTORE_WRITE_WORKERS")
                .unwrap_or(DEFAULT_WRITE_WORKERS),
            queue_depth: parse_var(&lookup, "CHAINSTORE_WRITE_QUEUE")
                .unwrap_or(DEFAULT_WRITE_QUEUE_DEPTH),
        };

        Ok(Self {
            backend,
            embedded,
            relational,
            governor,
            writer,
        })
    }

    /// Cache-only configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Embedded store at `path`, other settings default.
    pub fn embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendMode::EmbeddedKv,
            embedded: EmbeddedConfig {
                path: path.into(),
                ..EmbeddedConfig::default()
            },
            ..Self::default()
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|raw| raw.trim().parse().ok())
}
