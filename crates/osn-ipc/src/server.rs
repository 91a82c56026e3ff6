//! Function registration and call dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, trace};

use crate::error::{ErrorCode, IpcError};
use crate::value::{Type, Value};
use crate::IpcResult;

/// Handler invoked with already type-checked arguments.
pub type Handler = Arc<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>;

/// A callable function with a declared argument signature.
#[derive(Clone)]
pub struct Function {
    name: String,
    params: Vec<Type>,
    handler: Handler,
}

impl Function {
    /// Create a new function.
    pub fn new<F>(name: impl Into<String>, params: Vec<Type>, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    /// Check `args` against the declared signature.
    fn check(&self, args: &[Value]) -> IpcResult<()> {
        if args.len() != self.params.len() {
            return Err(IpcError::ArityMismatch {
                function: self.name.clone(),
                expected: self.params.len(),
                actual: args.len(),
            });
        }

        for (index, (arg, expected)) in args.iter().zip(&self.params).enumerate() {
            let actual = arg.value_type();
            if actual != *expected {
                return Err(IpcError::TypeMismatch {
                    function: self.name.clone(),
                    index,
                    expected: *expected,
                    actual,
                });
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// A named group of functions.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    functions: HashMap<String, Function>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a function, replacing any previous function of the same name.
    pub fn register_function(&mut self, function: Function) {
        self.functions.insert(function.name.clone(), function);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Dispatches calls to registered collections.
#[derive(Debug, Default)]
pub struct Server {
    collections: HashMap<String, Collection>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection. Collection names are unique.
    pub fn register_collection(&mut self, collection: Collection) -> IpcResult<()> {
        if self.collections.contains_key(collection.name()) {
            return Err(IpcError::DuplicateCollection(collection.name.clone()));
        }
        self.collections.insert(collection.name.clone(), collection);
        Ok(())
    }

    /// Call `collection::function` with `args`.
    ///
    /// The arguments must match the registered signature exactly; on
    /// mismatch the handler is not run.
    pub fn call(&self, collection: &str, function: &str, args: &[Value]) -> IpcResult<Vec<Value>> {
        let cls = self
            .collections
            .get(collection)
            .ok_or_else(|| IpcError::UnknownCollection(collection.to_string()))?;

        let func = cls
            .function(function)
            .ok_or_else(|| IpcError::UnknownFunction {
                collection: collection.to_string(),
                function: function.to_string(),
            })?;

        func.check(args)?;

        trace!(collection, function, "Dispatching IPC call");
        Ok((func.handler)(args))
    }
}

/// Build a successful response: `Ok` followed by `values`.
pub fn reply_ok(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut rval = vec![Value::from(ErrorCode::Ok)];
    rval.extend(values);
    rval
}

/// Build an error response and log it.
pub fn reply_error(code: ErrorCode, context: &str, message: impl Into<String>) -> Vec<Value> {
    let message = message.into();
    error!("{} {}", context, message);
    vec![Value::from(code), Value::String(message)]
}

/// Split a response into its status code and payload.
pub fn split_reply(rval: &[Value]) -> Option<(ErrorCode, &[Value])> {
    let (code, rest) = rval.split_first()?;
    let code = ErrorCode::from_u64(code.as_u64()?)?;
    Some((code, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_server() -> Server {
        let mut cls = Collection::new("Echo");
        cls.register_function(Function::new(
            "Double",
            vec![Type::UInt32],
            |args: &[Value]| {
                let v = args[0].as_u32().unwrap_or_default();
                reply_ok([Value::UInt32(v * 2)])
            },
        ));

        let mut server = Server::new();
        server.register_collection(cls).unwrap();
        server
    }

    #[test]
    fn test_call_dispatches_to_handler() {
        let server = echo_server();
        let rval = server.call("Echo", "Double", &[Value::UInt32(21)]).unwrap();

        let (code, payload) = split_reply(&rval).unwrap();
        assert_eq!(code, ErrorCode::Ok);
        assert_eq!(payload, &[Value::UInt32(42)]);
    }

    #[test]
    fn test_call_rejects_wrong_arity() {
        let server = echo_server();
        let err = server.call("Echo", "Double", &[]).unwrap_err();
        assert!(matches!(
            err,
            IpcError::ArityMismatch {
                expected: 1,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_call_rejects_wrong_type() {
        let server = echo_server();
        let err = server
            .call("Echo", "Double", &[Value::UInt64(21)])
            .unwrap_err();
        assert!(matches!(
            err,
            IpcError::TypeMismatch {
                index: 0,
                expected: Type::UInt32,
                actual: Type::UInt64,
                ..
            }
        ));
    }

    #[test]
    fn test_call_unknown_targets() {
        let server = echo_server();
        assert!(matches!(
            server.call("Nope", "Double", &[]),
            Err(IpcError::UnknownCollection(_))
        ));
        assert!(matches!(
            server.call("Echo", "Triple", &[]),
            Err(IpcError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_duplicate_collection_rejected() {
        let mut server = echo_server();
        let err = server.register_collection(Collection::new("Echo")).unwrap_err();
        assert!(matches!(err, IpcError::DuplicateCollection(_)));
    }

    #[test]
    fn test_reply_error_layout() {
        let rval = reply_error(ErrorCode::InvalidReference, "Fader::Destroy", "Invalid Fader Reference.");
        let (code, payload) = split_reply(&rval).unwrap();
        assert_eq!(code, ErrorCode::InvalidReference);
        assert_eq!(payload[0].as_str(), Some("Invalid Fader Reference."));
    }
}
