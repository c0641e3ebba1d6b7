//! Error types for warden
//!
//! Centralized error handling using thiserror. Expected control-flow
//! outcomes (circuit open, approval timeout) are modeled as states and
//! decisions, not as variants here.

use thiserror::Error;

/// All error types that can occur in warden
#[derive(Debug, Error)]
pub enum WardenError {
    /// Malformed or unsupported operation
    #[error("Validation error: {0}")]
    Validation(String),

    /// begin() was called without a reliable savepoint base
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// A savepoint restore failed; the tree may be in an unknown state
    #[error("Rollback failure: {0}")]
    RollbackFailure(String),

    /// Transaction not found or in the wrong state
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Git command error
    #[error("Git error: {0}")]
    Git(String),

    /// Background task error
    #[error("Task error: {0}")]
    Task(String),

    /// Action provider (LLM boundary) error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Approval queue error
    #[error("Approval error: {0}")]
    Approval(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = WardenError::Validation("empty target path".to_string());
        assert_eq!(err.to_string(), "Validation error: empty target path");
    }

    #[test]
    fn test_transaction_conflict_error() {
        let err = WardenError::TransactionConflict("working tree is dirty".to_string());
        assert_eq!(err.to_string(), "Transaction conflict: working tree is dirty");
    }

    #[test]
    fn test_rollback_failure_error() {
        let err = WardenError::RollbackFailure("git reset failed".to_string());
        assert_eq!(err.to_string(), "Rollback failure: git reset failed");
    }

    #[test]
    fn test_storage_error() {
        let err = WardenError::Storage("file locked".to_string());
        assert_eq!(err.to_string(), "Storage error: file locked");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WardenError = io_err.into();
        assert!(matches!(err, WardenError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: WardenError = json_err.into();
        assert!(matches!(err, WardenError::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(WardenError::Task("worker died".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
