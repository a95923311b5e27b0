//! Error types for the neardup library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`NeardupError`] enum. Configuration and dimension errors are raised before
//! any index work starts; persistence errors are reported but never abort a
//! matching run.
//!
//! # Examples
//!
//! ```
//! use neardup::error::{NeardupError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(NeardupError::invalid_config("batch size must be positive"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for neardup operations.
#[derive(Error, Debug)]
pub enum NeardupError {
    /// Invalid engine or index configuration (batch size, k, threshold, ...).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Two vector sets (or a vector and an index) disagree on dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Unknown index topology or distance metric.
    #[error("Unsupported index configuration: {0}")]
    UnsupportedIndexConfiguration(String),

    /// Training set cannot calibrate the chosen topology.
    #[error("Degenerate training data: {0}")]
    DegenerateTrainingData(String),

    /// Writing or reading a persisted index failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation cancelled (deadline exceeded)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type alias for operations that may fail with NeardupError.
pub type Result<T> = std::result::Result<T, NeardupError>;

impl NeardupError {
    /// Create a new invalid configuration error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        NeardupError::InvalidConfiguration(msg.into())
    }

    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        NeardupError::DimensionMismatch { expected, actual }
    }

    /// Create a new unsupported index configuration error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        NeardupError::UnsupportedIndexConfiguration(msg.into())
    }

    /// Create a new degenerate training data error.
    pub fn degenerate<S: Into<String>>(msg: S) -> Self {
        NeardupError::DegenerateTrainingData(msg.into())
    }

    /// Create a new persistence error.
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        NeardupError::PersistenceFailure(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        NeardupError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        NeardupError::Storage(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        NeardupError::Cancelled(msg.into())
    }

    /// Whether this error is a training failure the engine may recover from
    /// by switching to an exhaustive index.
    pub fn is_degenerate_training(&self) -> bool {
        matches!(self, NeardupError::DegenerateTrainingData(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = NeardupError::index("Test index error");
        assert_eq!(error.to_string(), "Index error: Test index error");

        let error = NeardupError::invalid_config("batch size must be positive");
        assert_eq!(
            error.to_string(),
            "Invalid configuration: batch size must be positive"
        );

        let error = NeardupError::dimension_mismatch(64, 32);
        assert_eq!(error.to_string(), "Dimension mismatch: expected 64, got 32");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = NeardupError::from(io_error);

        match error {
            NeardupError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_degenerate_classification() {
        assert!(NeardupError::degenerate("too few vectors").is_degenerate_training());
        assert!(!NeardupError::persistence("disk full").is_degenerate_training());
    }
}
