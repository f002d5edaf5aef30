//! Error types for chainstore operations

use crate::config::BackendMode;
use crate::entities::EntityKind;
use thiserror::Error;

/// Durable write errors. These never reach the caller of a `store_*`
/// operation directly; they are logged by the worker and delivered through
/// the write's receipt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Serialization failed for {kind}: {reason}")]
    Serialization { kind: EntityKind, reason: String },

    #[error("Value for {field} out of range for the {backend} backend: {value}")]
    OutOfRange {
        backend: BackendMode,
        field: String,
        value: String,
    },

    #[error("Connection to {backend} backend failed: {reason}")]
    Connection { backend: BackendMode, reason: String },

    #[error("Transaction failed on {table}: {reason}")]
    TransactionFailed { table: String, reason: String },

    #[error("{kind} is not persisted by the {backend} backend")]
    Unsupported {
        kind: EntityKind,
        backend: BackendMode,
    },

    #[error("Write abandoned before completion")]
    Abandoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for chainstore.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for chainstore operations.
pub type StoreResult<T> = Result<T, StoreError>;
