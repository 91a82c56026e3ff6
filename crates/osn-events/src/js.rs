//! Values and function references handed to the JS side.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A value passed as a JS callback argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsValue {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Object(BTreeMap<String, JsValue>),
}

impl JsValue {
    /// Build a plain object from `(key, value)` pairs.
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, JsValue)>,
        K: Into<String>,
    {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Property `key` of an object value.
    pub fn get(&self, key: &str) -> Option<&JsValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for JsValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for JsValue {
    fn from(v: f32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<f64> for JsValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for JsValue {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for JsValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for JsValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A reference to a JS function.
///
/// Only ever invoked on the event loop thread.
#[derive(Clone)]
pub struct JsCallback(Arc<dyn Fn(&[JsValue]) + Send + Sync>);

impl JsCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[JsValue]) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the function with positional `args`.
    pub fn call(&self, args: &[JsValue]) {
        (self.0)(args)
    }

    /// Returns true if both refer to the same function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for JsCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsCallback")
    }
}
