//! Error types for drivestate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, cleaning, or clustering session logs
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Column '{column}' is missing from session '{session}'")]
    Schema { column: String, session: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Insufficient or invalid data: {0}")]
    Data(String),

    #[error("Cannot access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed log '{}' (line {line}): {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error taxonomy buckets surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Config,
    Data,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Schema => "SCHEMA_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Data => "DATA_ERROR",
            ErrorKind::Io => "IO_ERROR",
        }
    }
}

impl AnalysisError {
    /// Which taxonomy bucket this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Schema { .. } => ErrorKind::Schema,
            AnalysisError::Config(_) => ErrorKind::Config,
            AnalysisError::Data(_) => ErrorKind::Data,
            AnalysisError::Io { .. }
            | AnalysisError::Malformed { .. }
            | AnalysisError::Csv(_)
            | AnalysisError::Json(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalysisError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn schema(column: impl Into<String>, session: impl Into<String>) -> Self {
        AnalysisError::Schema {
            column: column.into(),
            session: session.into(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AnalysisError>;
