//! Error types for the database layer.

use miette::Diagnostic;
use tether_core::SourceError;
use thiserror::Error;

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Database error types.
#[derive(Debug, Error, Diagnostic)]
pub enum DbError {
    /// SQLite/sqlx error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    #[diagnostic(help("The database may have been written by a newer version"))]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error while preparing the database file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },
}

impl DbError {
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }
}

impl From<DbError> for SourceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Serialization(e) => SourceError::serialization("stored resource", e),
            DbError::Io(e) => SourceError::io("open resource database", e),
            other => SourceError::storage("sqlite", other.to_string()),
        }
    }
}
