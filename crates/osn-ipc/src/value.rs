//! Typed values carried across the IPC boundary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Wire type of a single IPC argument or response value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Null,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    Binary,
}

impl Type {
    /// Returns the display name for this type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
            Self::Binary => "Binary",
        }
    }
}

/// A single IPC value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Bytes),
}

impl Value {
    /// Returns the wire type of this value.
    pub fn value_type(&self) -> Type {
        match self {
            Self::Null => Type::Null,
            Self::Int32(_) => Type::Int32,
            Self::Int64(_) => Type::Int64,
            Self::UInt32(_) => Type::UInt32,
            Self::UInt64(_) => Type::UInt64,
            Self::Float(_) => Type::Float,
            Self::Double(_) => Type::Double,
            Self::String(_) => Type::String,
            Self::Binary(_) => Type::Binary,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `f64` for either floating point type.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}
