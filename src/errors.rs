//! Error types for WashTrack core operations.
//!
//! Each error class has a stable string code for programmatic handling in
//! the dashboard. Only `Transient` is safe to retry automatically; the rest
//! require user correction or an administrative override.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for all core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invariant violation, e.g. opening a shift while one is active.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation requires a state not currently held, e.g. pairing on a
    /// closed shift or editing a locked Paid order.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Referenced shift/order/staff does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input: unknown status label, non-positive quantity, etc.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store I/O failure. Safe for the caller to retry.
    #[error("transient store failure: {0}")]
    Transient(String),
}

impl CoreError {
    /// Stable code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::Precondition(_) => "PRECONDITION",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Validation(_) => "VALIDATION",
            CoreError::Transient(_) => "TRANSIENT",
        }
    }

    /// Whether a caller may retry the operation without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(CoreError::Precondition("x".into()).code(), "PRECONDITION");
        assert_eq!(CoreError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(CoreError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(CoreError::Transient("x".into()).code(), "TRANSIENT");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(CoreError::Transient("io".into()).is_retryable());
        assert!(!CoreError::Conflict("x".into()).is_retryable());
        assert!(!CoreError::Precondition("x".into()).is_retryable());
        assert!(!CoreError::NotFound("x".into()).is_retryable());
        assert!(!CoreError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_sqlite_errors_convert_to_transient() {
        let err: CoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.code(), "TRANSIENT");
    }
}
