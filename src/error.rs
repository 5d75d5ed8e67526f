//! Error types for the platequant library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum AssayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid well coordinate '{0}'")]
    InvalidWell(String),

    #[error("Plate format mismatch: expected {expected} wells, got {actual}")]
    PlateFormatMismatch { expected: usize, actual: usize },

    #[error("Ruleset invalid: {0}")]
    RulesetInvalid(String),

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Fit failed: {0}")]
    FitFailed(String),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, AssayError>;
