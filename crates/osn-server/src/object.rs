//! What the registry stores under each handle.

use std::fmt;
use std::sync::{Arc, Weak};

use osn_engine::{Fader, Volmeter};
use osn_events::CallbackInfo;
use osn_handles::{Identity, Tagged};

/// Handle value handed across the IPC boundary.
pub type Handle = u32;

/// Kind of a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Callback,
    Fader,
    Volmeter,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback => write!(f, "callback"),
            Self::Fader => write!(f, "fader"),
            Self::Volmeter => write!(f, "volmeter"),
        }
    }
}

/// Non-owning reference to an engine object.
///
/// The engine decides when the object dies. Resolving goes through the
/// registry, which reports a dead object as an invalid reference.
pub struct EngineRef<T>(Weak<T>);

impl<T> EngineRef<T> {
    pub fn new(object: &Arc<T>) -> Self {
        Self(Arc::downgrade(object))
    }

    pub(crate) fn resolve(&self) -> Option<Arc<T>> {
        self.0.upgrade()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl<T> Clone for EngineRef<T> {
    fn clone(&self) -> Self {
        Self(Weak::clone(&self.0))
    }
}

impl<T> fmt::Debug for EngineRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EngineRef")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

/// A registry entry.
#[derive(Debug, Clone)]
pub enum ObjectRef {
    /// Registered JS callback. The registry holds one reference; queued
    /// events and workers hold their own.
    Callback(Arc<CallbackInfo>),
    Fader(EngineRef<Fader>),
    Volmeter(EngineRef<Volmeter>),
}

impl ObjectRef {
    pub fn fader(fader: &Arc<Fader>) -> Self {
        Self::Fader(EngineRef::new(fader))
    }

    pub fn volmeter(meter: &Arc<Volmeter>) -> Self {
        Self::Volmeter(EngineRef::new(meter))
    }
}

impl Tagged for ObjectRef {
    type Tag = ObjectKind;

    fn tag(&self) -> ObjectKind {
        match self {
            Self::Callback(_) => ObjectKind::Callback,
            Self::Fader(_) => ObjectKind::Fader,
            Self::Volmeter(_) => ObjectKind::Volmeter,
        }
    }
}

impl Identity for ObjectRef {
    fn same_object(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Callback(a), Self::Callback(b)) => Arc::ptr_eq(a, b),
            (Self::Fader(a), Self::Fader(b)) => a.ptr_eq(b),
            (Self::Volmeter(a), Self::Volmeter(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use osn_engine::FaderType;
    use osn_events::JsCallback;

    use super::*;

    #[test]
    fn test_tags() {
        let fader = Arc::new(Fader::new(FaderType::Cubic));
        let info = Arc::new(CallbackInfo::new(JsCallback::new(|_| {})));

        assert_eq!(ObjectRef::fader(&fader).tag(), ObjectKind::Fader);
        assert_eq!(ObjectRef::Callback(info).tag(), ObjectKind::Callback);
        assert_eq!(ObjectKind::Volmeter.to_string(), "volmeter");
    }

    #[test]
    fn test_identity_is_pointer_identity() {
        let a = Arc::new(Fader::new(FaderType::Cubic));
        let b = Arc::new(Fader::new(FaderType::Cubic));

        assert!(ObjectRef::fader(&a).same_object(&ObjectRef::fader(&a)));
        assert!(!ObjectRef::fader(&a).same_object(&ObjectRef::fader(&b)));
    }

    #[test]
    fn test_engine_ref_does_not_own() {
        let fader = Arc::new(Fader::new(FaderType::Log));
        let r = EngineRef::new(&fader);
        assert!(r.resolve().is_some());

        drop(fader);
        assert!(r.resolve().is_none());
    }
}
