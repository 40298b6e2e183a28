//! Error types for tally-store.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use tally_core::GatewayError;

/// Result type for tally-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A series with this title already exists.
    #[error("Series already exists: {0}")]
    DuplicateTitle(String),

    /// Series not found in database.
    #[error("Series not found: {0}")]
    SeriesNotFound(i64),

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// A transaction operation was called in the wrong state.
    #[error("Transaction error: {0}")]
    Transaction(&'static str),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a UNIQUE or PRIMARY KEY constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::DuplicateTitle(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == ErrorCode::ConstraintViolation
                    && matches!(
                        e.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    )
            }
            _ => false,
        }
    }

    /// Convert into the gateway error reported for `operation`.
    pub fn into_gateway(self, operation: &'static str) -> GatewayError {
        match self {
            Self::DuplicateTitle(title) => GatewayError::Conflict { title },
            other => GatewayError::failed(operation, other),
        }
    }
}

impl From<Error> for GatewayError {
    fn from(err: Error) -> Self {
        err.into_gateway("store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_title_becomes_conflict() {
        let err = Error::DuplicateTitle("cpu".to_string()).into_gateway("create_series");
        assert!(matches!(err, GatewayError::Conflict { title } if title == "cpu"));
    }

    #[test]
    fn test_other_errors_keep_operation() {
        let err = Error::Transaction("no transaction open").into_gateway("commit");
        assert_eq!(err.operation(), Some("commit"));
        assert!(err.to_string().contains("no transaction open"));
    }

    #[test]
    fn test_unique_violation_detected() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: Error = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_unique_violation());

        let other: Error = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err().into();
        assert!(!other.is_unique_violation());
    }
}
