//! Error types for the FlowCast core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Queue full")]
    QueueFull,

    #[error("Queue empty")]
    QueueEmpty,

    #[error("Media type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: &'static str, got: &'static str },

    #[error("Invalid geometry: {0}")]
    BadGeometry(String),

    #[error("Unknown reader {0}")]
    UnknownReader(u32),

    #[error("Endpoint not connected")]
    NotConnected,
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
