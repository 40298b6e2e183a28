//! Error types for tally-core.
//!
//! # Failure handling during synchronization
//!
//! | Error | Where | Effect |
//! |-------|-------|--------|
//! | [`GatewayError::Failed`] | flush phase | rolled back, series stay dirty, retried next cycle |
//! | [`GatewayError::Failed`] | reload phase | registry left as is, retried next cycle |
//! | [`GatewayError::Conflict`] | series creation | existing store row is adopted instead |
//! | [`Error::SyncInProgress`] | manual sync | caller retries later, nothing changed |
//! | [`Error::NonFinite`] | ingestion | event rejected, buffers unchanged |
//!
//! None of these terminate the process. A store outage degrades the sync
//! cycle; buffered data stays in memory until the store comes back.

use std::error::Error as StdError;

/// Result type for tally-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by [`crate::PersistenceGateway`] implementations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur in tally-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The persistent store rejected or failed an operation.
    #[error("Store error: {0}")]
    Store(#[from] GatewayError),

    /// The series has no store-assigned id and cannot be persisted.
    #[error("Series '{0}' has no store id")]
    Unassigned(String),

    /// A synchronize cycle is already running.
    #[error("A sync cycle is already in progress")]
    SyncInProgress,

    /// A value, or the sum it would aggregate into, is NaN or infinite.
    #[error("Value {value} for series '{title}' is not finite")]
    NonFinite { title: String, value: f64 },
}

/// Failure reported by a persistence gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A series with this title already exists in the store.
    #[error("Series '{title}' already exists in the store")]
    Conflict { title: String },

    /// Any other store failure (connection, timeout, query).
    #[error("{operation} failed: {source}")]
    Failed {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl GatewayError {
    /// Wrap a store failure for the named operation.
    pub fn failed(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Failed {
            operation,
            source: source.into(),
        }
    }

    /// The operation that failed, if known.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Conflict { .. } => Some("create_series"),
            Self::Failed { operation, .. } => Some(operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_display_includes_operation() {
        let err = GatewayError::failed("insert_rows", "disk I/O error");
        assert_eq!(err.to_string(), "insert_rows failed: disk I/O error");
        assert_eq!(err.operation(), Some("insert_rows"));
    }

    #[test]
    fn test_conflict_converts_into_store_error() {
        let err: Error = GatewayError::Conflict {
            title: "cpu".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Store(GatewayError::Conflict { .. })));
        assert!(err.to_string().contains("cpu"));
    }

    #[test]
    fn test_non_finite_display() {
        let err = Error::NonFinite {
            title: "cpu".to_string(),
            value: f64::INFINITY,
        };
        assert_eq!(err.to_string(), "Value inf for series 'cpu' is not finite");
    }

    #[test]
    fn test_failed_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = GatewayError::failed("commit", io);
        assert!(StdError::source(&err).is_some());
    }
}
