//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared table model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommonError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Row width mismatch: expected {expected} cells, got {actual}")]
    RowWidth { expected: usize, actual: usize },

    #[error("Column length mismatch: expected {expected} values, got {actual}")]
    ColumnLength { expected: usize, actual: usize },
}
