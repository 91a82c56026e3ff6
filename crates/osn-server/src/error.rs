//! Error types for the binding layer.

use std::path::PathBuf;

use thiserror::Error;

use osn_engine::EngineError;
use osn_handles::HandleError;
use osn_ipc::ErrorCode;

/// Errors returned by registry and binding operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    /// No free handle was left.
    #[error("Failed to allocate unique id")]
    OutOfIndexes,

    /// The handle is not mapped, or its engine object is gone.
    #[error("Invalid reference: {0}")]
    InvalidReference(u64),

    /// The handle is mapped to a different kind of object.
    #[error("Handle {handle} refers to a {found}, expected a {expected}")]
    TypeMismatch {
        handle: u64,
        expected: String,
        found: String,
    },

    /// A named engine object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An argument is outside its accepted range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine refused the operation.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl BindingError {
    /// Status code reported over IPC.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfIndexes => ErrorCode::OutOfIndexes,
            Self::InvalidReference(_) | Self::TypeMismatch { .. } => ErrorCode::InvalidReference,
            Self::NotFound(_) | Self::Engine(EngineError::NotFound(_)) => ErrorCode::NotFound,
            Self::InvalidArgument(_) | Self::Engine(_) => ErrorCode::Error,
        }
    }
}

impl From<HandleError> for BindingError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::Exhausted => Self::OutOfIndexes,
            HandleError::NotAllocated(handle) | HandleError::InvalidReference(handle) => {
                Self::InvalidReference(handle)
            }
            HandleError::TypeMismatch {
                handle,
                expected,
                found,
            } => Self::TypeMismatch {
                handle,
                expected,
                found,
            },
        }
    }
}

/// Errors raised while loading [`crate::BindingsConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
