//! Metadata Error Types
//!
//! ## Error Categories
//!
//! ### Lookup Errors
//! - `TopicNotFound`, `ConnectionNotFound`, `MessageNotFound`, `PolicyNotFound`, `JobNotFound`
//!
//! ### Database Errors
//! - `DatabaseError`: SQLite operation failed (connection, query, constraint)
//! - `MigrationError`: Schema migration failed at startup
//!
//! ### Data Errors
//! - `InvalidValue`: A stored enum column held an unknown value
//! - `SerializationError`: Failed to serialize/deserialize JSON columns
//! - `ConflictError`: Uniqueness rule violated (e.g. a second global policy)
//!
//! All metadata store operations return `Result<T>`, aliased to
//! `Result<T, MetadataError>`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Topic not found: {0}")]
    TopicNotFound(i64),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(i64),

    #[error("Message not found: {0}")]
    MessageNotFound(i64),

    #[error("Retention policy not found: {0}")]
    PolicyNotFound(i64),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl From<sqlx::migrate::MigrateError> for MetadataError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MetadataError::MigrationError(e.to_string())
    }
}
