//! Storage errors
//!
//! `sqlx` errors are classified so callers can tell a retryable write
//! conflict from a broken database without string matching on their side.

use thiserror::Error;

/// Storage backend errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Database failed to open or migrate
    #[error("Database open failed: {0}")]
    OpenFailed(String),

    /// A UNIQUE or PRIMARY KEY constraint rejected the write
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A CHECK constraint rejected the write
    #[error("Check constraint violated: {0}")]
    CheckViolation(String),

    /// A foreign key did not resolve
    #[error("Foreign key violated: {0}")]
    ForeignKeyViolation(String),

    /// The database was busy or locked by another writer
    #[error("Database busy: {0}")]
    Busy(String),

    /// A stored value could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(String),
}

impl StorageError {
    /// Whether this is a unique violation on the given `table.column`
    /// (SQLite reports e.g. `UNIQUE constraint failed: payments.month_number`).
    pub fn is_unique_on(&self, table_column: &str) -> bool {
        matches!(self, StorageError::UniqueViolation(msg) if msg.contains(table_column))
    }

    /// Whether retrying the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Busy(_) | StorageError::UniqueViolation(_))
    }
}

/// SQLite primary result codes for contention
const SQLITE_BUSY: i64 = 5;
const SQLITE_LOCKED: i64 = 6;

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                if db.is_unique_violation() {
                    return StorageError::UniqueViolation(message);
                }
                if db.is_check_violation() {
                    return StorageError::CheckViolation(message);
                }
                if db.is_foreign_key_violation() {
                    return StorageError::ForeignKeyViolation(message);
                }
                // extended result codes keep the primary code in the low byte
                let primary = db
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| code & 0xff);
                match primary {
                    Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => StorageError::Busy(message),
                    _ => StorageError::Database(message),
                }
            }
            sqlx::Error::PoolTimedOut => StorageError::Busy(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => StorageError::Corrupt(err.to_string()),
            _ => StorageError::Database(err.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_matching() {
        let err = StorageError::UniqueViolation(
            "UNIQUE constraint failed: commission_sources.source_payment_id".to_string(),
        );
        assert!(err.is_unique_on("commission_sources.source_payment_id"));
        assert!(!err.is_unique_on("payments.payment_id"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_busy() {
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StorageError::Busy(_)));
    }
}
