//! Error types for TagIndex

use thiserror::Error;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// TagIndex error types
#[derive(Error, Debug)]
pub enum IndexError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment data is corrupt
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Predicate uses an unsupported operator or operand
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// Series key could not be decoded
    #[error("Invalid series key: {0}")]
    SeriesKey(String),

    /// Sketches built with different parameters cannot be merged
    #[error("Sketch mismatch: expected precision {expected}, got {actual}")]
    SketchMismatch { expected: u8, actual: u8 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Write or structural change after the index was closed
    #[error("Index is closed")]
    Closed,
}

impl IndexError {
    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, IndexError::Corruption(_) | IndexError::SeriesKey(_))
    }

    /// Check if error was caused by the caller's predicate
    pub fn is_invalid_predicate(&self) -> bool {
        matches!(self, IndexError::InvalidPredicate(_))
    }
}
