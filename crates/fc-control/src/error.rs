//! Error types for the control plane

use thiserror::Error;

/// Control error type
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Envelope of {0} bytes exceeds the frame limit")]
    EnvelopeTooLarge(usize),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias
pub type ControlResult<T> = Result<T, ControlError>;
