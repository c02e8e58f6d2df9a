//! Error hierarchy for refeedrs
//!
//! The scoring functions are total and never fail. Errors only arise at the
//! edges: reading histories, persisting scores and loading configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all refeedrs I/O operations
#[derive(Debug, Error)]
pub enum RefeedError {
    /// Input data failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Import/Export error: {0}")]
    ImportExport(#[from] ImportExportError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Score store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database file could not be opened
    #[error("Database connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Transaction error: {reason}")]
    TransactionError { reason: String },

    /// A stored value could not be converted back
    #[error("Corrupt value in {table}.{column}: {value}")]
    CorruptValue {
        table: String,
        column: String,
        value: String,
    },
}

/// Import and export errors
#[derive(Debug, Error)]
pub enum ImportExportError {
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Malformed record
    #[error("Parse error in {format} line {line}: {reason}")]
    ParseError {
        format: String,
        line: u64,
        reason: String,
    },

    /// Required column or field missing
    #[error("Missing required data: {field}")]
    MissingData { field: String },

    #[error("Export failed to {path}: {reason}")]
    ExportFailed { path: PathBuf, reason: String },
}

/// Result type alias for refeedrs operations
pub type Result<T> = std::result::Result<T, RefeedError>;

impl RefeedError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RefeedError::Database(DatabaseError::ConnectionFailed { .. })
                | RefeedError::Database(DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error {
                        code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                        ..
                    },
                    _,
                )))
                | RefeedError::Io(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RefeedError::ImportExport(ImportExportError::FileNotFound { .. }) => ErrorSeverity::Warning,
            RefeedError::Validation(_) => ErrorSeverity::Warning,
            RefeedError::Csv(_) => ErrorSeverity::Warning,
            RefeedError::Database(_) => ErrorSeverity::Error,
            RefeedError::Configuration(_) => ErrorSeverity::Error,
            RefeedError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RefeedError::ImportExport(ImportExportError::FileNotFound { path }) => {
                format!("Could not find input file: {}", path.display())
            }
            RefeedError::ImportExport(ImportExportError::ParseError { format, line, reason }) => {
                format!("Line {} of the {} input is malformed: {}", line, format, reason)
            }
            RefeedError::Database(DatabaseError::ConnectionFailed { .. }) => {
                "Unable to open the score database. Please check the configured path.".to_string()
            }
            RefeedError::Configuration(reason) => {
                format!("Invalid configuration: {}", reason)
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    Error,
    Warning,
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
