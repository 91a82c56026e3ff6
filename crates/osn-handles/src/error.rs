//! Error types for handle allocation and lookup.

use thiserror::Error;

/// Errors that can occur while allocating or resolving handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// No free handle is left.
    #[error("Handle space exhausted")]
    Exhausted,

    /// The handle is not currently allocated.
    #[error("Handle {0} is not allocated")]
    NotAllocated(u64),

    /// The handle does not refer to a live object.
    #[error("Invalid reference: handle {0}")]
    InvalidReference(u64),

    /// The handle refers to an object of another kind.
    #[error("Handle {handle} refers to a {found}, expected a {expected}")]
    TypeMismatch {
        handle: u64,
        expected: String,
        found: String,
    },
}
