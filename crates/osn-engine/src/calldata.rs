//! Untyped parameter bag passed to signal callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use crate::source::Source;

/// A single calldata parameter.
#[derive(Debug, Clone)]
pub enum CalldataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Source(Arc<Source>),
}

/// Parameters of one signal emission, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Calldata {
    params: HashMap<String, CalldataValue>,
}

impl Calldata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Calldata::set`].
    pub fn with(mut self, key: &str, value: CalldataValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: CalldataValue) {
        self.params.insert(key.to_string(), value);
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.params.get(key)? {
            CalldataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            CalldataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.params.get(key)? {
            CalldataValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.params.get(key)? {
            CalldataValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn source(&self, key: &str) -> Option<&Arc<Source>> {
        match self.params.get(key)? {
            CalldataValue::Source(v) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let data = Calldata::new()
            .with("muted", CalldataValue::Bool(true))
            .with("code", CalldataValue::Int(-3))
            .with("name", CalldataValue::String("mic".into()));

        assert_eq!(data.bool("muted"), Some(true));
        assert_eq!(data.int("code"), Some(-3));
        assert_eq!(data.string("name"), Some("mic"));
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_wrong_kind_reads_as_none() {
        let data = Calldata::new().with("muted", CalldataValue::Bool(true));
        assert_eq!(data.int("muted"), None);
        assert_eq!(data.string("missing"), None);
        assert!(data.source("muted").is_none());
    }
}
