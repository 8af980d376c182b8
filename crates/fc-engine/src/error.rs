//! Error types for the FlowCast engine

use thiserror::Error;

/// Engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Filter id {0} must be zero or positive")]
    InvalidFilterId(i32),

    #[error("Filter id {0} already exists")]
    DuplicateFilterId(i32),

    #[error("Path id {0} already exists")]
    DuplicatePathId(i32),

    #[error("Unknown filter {0}")]
    UnknownFilter(i32),

    #[error("Unknown path {0}")]
    UnknownPath(i32),

    #[error("Filter {filter} is used by path {path}")]
    FilterInPath { filter: i32, path: i32 },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unknown filter kind: {0}")]
    UnknownKind(String),

    #[error("Filter {0} is not a master")]
    NotAMaster(i32),

    #[error("Filter {0} cannot run as a slave")]
    NotASlave(i32),

    #[error("Engine stopped")]
    Stopped,

    #[error(transparent)]
    Core(#[from] fc_core::CoreError),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;
