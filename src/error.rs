//! Error types for tabrecon operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconError>;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("{0}")]
    Diff(#[from] DiffError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Monitor rule not found: {name}")]
    RuleNotFound { name: String },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Schema error: {message}")]
    Schema { message: String },

    #[error("Walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl ReconError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace(msg.into())
    }

    pub fn rule_not_found(name: impl Into<String>) -> Self {
        Self::RuleNotFound { name: name.into() }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            message: msg.into(),
        }
    }
}

/// Classification of a failed comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffErrorKind {
    /// Source unreachable. Callers may retry with backoff.
    ConnectionFailure,
    /// Malformed fetch; fatal to the current comparison.
    QueryFailure,
    /// Declared key/compare columns are missing from the actual source.
    SchemaMismatch,
    /// Deadline exceeded; in-flight work was cancelled.
    Timeout,
    /// The comparison itself is misconfigured.
    ConfigError,
}

impl fmt::Display for DiffErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ConnectionFailure => "connection failure",
            Self::QueryFailure => "query failure",
            Self::SchemaMismatch => "schema mismatch",
            Self::Timeout => "timeout",
            Self::ConfigError => "configuration error",
        };
        f.write_str(label)
    }
}

/// A comparison that could not complete. Partial results are never attached.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {cause}")]
pub struct DiffError {
    pub kind: DiffErrorKind,
    pub cause: String,
}

impl DiffError {
    pub fn new(kind: DiffErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn connection(cause: impl Into<String>) -> Self {
        Self::new(DiffErrorKind::ConnectionFailure, cause)
    }

    pub fn query(cause: impl Into<String>) -> Self {
        Self::new(DiffErrorKind::QueryFailure, cause)
    }

    pub fn schema_mismatch(cause: impl Into<String>) -> Self {
        Self::new(DiffErrorKind::SchemaMismatch, cause)
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::new(DiffErrorKind::Timeout, cause)
    }

    pub fn config(cause: impl Into<String>) -> Self {
        Self::new(DiffErrorKind::ConfigError, cause)
    }

    /// Whether retrying later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            DiffErrorKind::ConnectionFailure | DiffErrorKind::Timeout
        )
    }
}
