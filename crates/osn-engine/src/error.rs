//! Error types for engine operations.

use thiserror::Error;

/// Errors reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// An object with this name already exists.
    #[error("Name already in use: {0}")]
    DuplicateName(String),

    /// No object with this name exists.
    #[error("Not found: {0}")]
    NotFound(String),
}
