//! Error types for the persistence layer.

use thiserror::Error;

/// Persistence operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Persistence errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique-key violation on the participation ledger
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Key components failed validation (empty guild/user/event id)
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::DuplicateKey(db.message().to_string())
            }
            _ => Self::Sqlx(err),
        }
    }
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True when the error is a unique-key violation on the ledger.
    ///
    /// Callers treat this as "another writer already created the record",
    /// not as a failure.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}
