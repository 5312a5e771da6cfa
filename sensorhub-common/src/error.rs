//! Common error types for sensorhub

use thiserror::Error;

/// Common result type for sensorhub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every store and the ingestion pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Caller has neither a tenant association nor unrestricted access
    #[error("Tenant required: caller has no tenant and no unrestricted role")]
    TenantRequired,

    /// Unknown sensor type or measurement type
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// Reading rejected; carries every violation found
    #[error("Validation failed: {}", violations.join("; "))]
    ValidationFailed { violations: Vec<String> },

    /// An active threshold already exists for the same (scope, field, severity)
    #[error("Duplicate threshold: {0}")]
    DuplicateThreshold(String),

    /// Threshold has no bound, or min >= max
    #[error("Invalid threshold range: {0}")]
    InvalidThresholdRange(String),

    /// Concurrent or incompatible change to the reading table detected
    #[error("Migration conflict: {0}")]
    MigrationConflict(String),

    /// Tenant-scoped lookup miss. Intentionally does not say which.
    #[error("Not found or access denied: {0}")]
    NotFoundOrAccessDenied(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid definition or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller-supplied deadline elapsed before the operation finished
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying storage error is a SQLite uniqueness violation
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }

    /// True for SQLite busy/locked errors that may succeed on retry
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                let msg = db_err.message();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}
