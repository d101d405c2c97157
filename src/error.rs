//! Crate-wide error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LocomotionError>;

#[derive(Debug, Error)]
pub enum LocomotionError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("filter underfed: need at least {needed} samples, have {have}")]
    FilterUnderfed { needed: usize, have: usize },

    #[error("store constraint violation: {0}")]
    StoreConstraintViolation(String),

    #[error("migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("classifier missing model for geo key {0}")]
    ClassifierMissingModel(String),

    #[error("training insufficient data: need at least {needed} rows, have {have}")]
    TrainingInsufficientData { needed: usize, have: usize },

    #[error("export cancelled")]
    ExportCancelled,

    #[error("import schema mismatch: expected {expected}, found {found}")]
    ImportSchemaMismatch { expected: String, found: String },

    #[error("import integrity error: {0}")]
    ImportIntegrityError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid geohash: {0}")]
    InvalidGeohash(String),

    #[error("database closed")]
    DatabaseClosed,

    #[error("lock poisoned: {0}")]
    LockError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("serialization error ({context}): {source}")]
    SerializationErrorWithContext {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("other: {0}")]
    Other(String),
}

impl<T> From<std::sync::PoisonError<T>> for LocomotionError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        LocomotionError::LockError(e.to_string())
    }
}
