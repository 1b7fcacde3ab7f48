//! Structured error types for the divtime workspace.

use thiserror::Error;

/// Unified error type for all divtime operations.
///
/// Parse errors and internal invariant violations are unrecoverable by
/// contract: the original analysis terminates on them, and embedding
/// callers are expected to do the same rather than retry.
#[derive(Debug, Error)]
pub enum DivtimeError {
    /// I/O error (calibration or tip-date file not readable, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed calibration or tip-date input)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Violated internal invariant (a defect, not a user error)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the divtime workspace.
pub type Result<T> = std::result::Result<T, DivtimeError>;
