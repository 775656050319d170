//! Error taxonomy shared by every table access operation.
//!
//! Only malformed input and infrastructure failure are errors. A lookup,
//! update or delete that matches nothing is a normal empty outcome.

/// Result type alias for table access operations.
pub type TableResult<T> = Result<T, TableError>;

/// Errors surfaced by the table access layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    /// Malformed identifier, non-positive limit, or empty required input.
    ///
    /// Always caller-fixable; never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The target table or schema does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or other constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transport or engine failure. Callers may retry with backoff.
    #[error("connection error: {0}")]
    Connection(String),

    /// The active engine or repository lacks the requested capability.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The field cipher failed to transform a value.
    #[error("cipher error: {0}")]
    Cipher(String),

    /// The unit of work was cancelled before the engine reported back.
    #[error("operation cancelled")]
    Cancelled,
}

impl TableError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Short, stable label used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Connection(_) => "connection",
            Self::UnsupportedOperation(_) => "unsupported",
            Self::Cipher(_) => "cipher",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<tokio::task::JoinError> for TableError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Connection(format!("database task panicked: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TableError::InvalidArgument("limit must be positive".to_string());
        assert_eq!(err.to_string(), "invalid argument: limit must be positive");

        let err = TableError::NotFound("table usuarios".to_string());
        assert_eq!(err.to_string(), "not found: table usuarios");

        assert_eq!(TableError::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn test_only_connection_errors_are_transient() {
        assert!(TableError::Connection("reset".into()).is_transient());
        assert!(!TableError::Conflict("dup".into()).is_transient());
        assert!(!TableError::UnsupportedOperation("diag".into()).is_transient());
    }
}
