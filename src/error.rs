//! Error types for colexec operators.

use thiserror::Error;

/// Result type alias using [`ExecError`].
pub type Result<T> = std::result::Result<T, ExecError>;

/// Error types for batch execution.
#[derive(Debug, Error)]
pub enum ExecError {
    // ==================== Memory Errors ====================
    /// The arena could not satisfy an allocation within its limit.
    #[error("Memory limit exceeded: {used} bytes used, limit is {limit} bytes")]
    MemoryLimitExceeded { used: usize, limit: usize },

    // ==================== Stream Errors ====================
    /// Error signalled by an upstream producer, carried verbatim.
    #[error("{0}")]
    Upstream(String),

    /// Input stream closed without an end-of-stream marker.
    #[error("Channel error: {0}")]
    Channel(String),

    // ==================== Data Errors ====================
    /// Type mismatch errors.
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// Build and probe inputs disagree on shape.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Vectors of one batch disagree on length, or an index is out of range.
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Arrow conversion failure.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    // ==================== Engine Errors ====================
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unsupported operation in the current context.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// General execution errors.
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_limit_display() {
        let err = ExecError::MemoryLimitExceeded {
            used: 100,
            limit: 64,
        };
        assert!(err.to_string().contains("100 bytes used"));
        assert!(err.to_string().contains("limit is 64"));
    }

    #[test]
    fn test_upstream_is_verbatim() {
        let err = ExecError::Upstream("disk read failed".into());
        assert_eq!(err.to_string(), "disk read failed");
    }
}
