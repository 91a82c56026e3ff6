//! Status codes and dispatch errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Type, Value};

/// Status code that leads every IPC response.
///
/// The numeric values are part of the wire format. Add new items at the end,
/// not in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum ErrorCode {
    /// Everything is okay.
    Ok = 0,

    /// A generic error happened.
    Error = 1,

    /// A critical generic error happened.
    CriticalError = 2,

    /// The reference specified in the arguments is not valid.
    InvalidReference = 3,

    /// Something could not be found.
    NotFound = 4,

    /// Attempted to access something out of bounds.
    OutOfBounds = 5,

    /// No free handle was left to identify a new object.
    OutOfIndexes = 6,
}

impl ErrorCode {
    /// Decodes a wire status code.
    pub fn from_u64(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::CriticalError),
            3 => Some(Self::InvalidReference),
            4 => Some(Self::NotFound),
            5 => Some(Self::OutOfBounds),
            6 => Some(Self::OutOfIndexes),
            _ => None,
        }
    }

    /// Returns true for [`ErrorCode::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<ErrorCode> for Value {
    fn from(code: ErrorCode) -> Self {
        Value::UInt64(code as u64)
    }
}

/// Errors raised by the dispatcher before a handler runs.
#[derive(Debug, Error)]
pub enum IpcError {
    /// No collection registered under this name.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The collection has no function with this name.
    #[error("Unknown function: {collection}::{function}")]
    UnknownFunction { collection: String, function: String },

    /// Argument count differs from the registered signature.
    #[error("{function} expects {expected} arguments, got {actual}")]
    ArityMismatch {
        function: String,
        expected: usize,
        actual: usize,
    },

    /// Argument type differs from the registered signature.
    #[error("{function} argument {index}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        function: String,
        index: usize,
        expected: Type,
        actual: Type,
    },

    /// A collection with this name is already registered.
    #[error("Collection already registered: {0}")]
    DuplicateCollection(String),

    /// The server side of a request channel has gone away.
    #[error("Request channel disconnected")]
    ChannelDisconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_values_are_stable() {
        assert_eq!(ErrorCode::Ok as u64, 0);
        assert_eq!(ErrorCode::InvalidReference as u64, 3);
        assert_eq!(ErrorCode::OutOfIndexes as u64, 6);
        assert_eq!(ErrorCode::from_u64(4), Some(ErrorCode::NotFound));
        assert_eq!(ErrorCode::from_u64(99), None);
    }

    #[test]
    fn test_error_code_into_value() {
        let value: Value = ErrorCode::CriticalError.into();
        assert_eq!(value, Value::UInt64(2));
    }
}
