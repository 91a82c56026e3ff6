//! The registry service shared by every binding.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use osn_engine::{Fader, Volmeter};
use osn_events::{CallbackInfo, JsCallback, LoopHandle};
use osn_handles::{ObjectRegistry, Tagged};

use crate::config::BindingsConfig;
use crate::error::BindingError;
use crate::object::{Handle, ObjectKind, ObjectRef};
use crate::BindingResult;

/// A binding that owns registry entries and must release them at shutdown.
pub trait Teardown: Send + Sync {
    /// Short name for log output.
    fn name(&self) -> &'static str;

    /// Release every engine hookup and registry entry this binding owns.
    /// Returns the number of entries released.
    fn teardown(&self) -> usize;
}

/// Result of [`Registry::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Entries released by the bindings.
    pub released: usize,

    /// Entries still mapped after every binding tore down.
    pub leaked: u64,
}

/// Handle-to-object table plus the loop that callbacks are delivered on.
///
/// Created once with [`Registry::init`] and passed to every binding that
/// needs it. Bindings attach themselves so [`Registry::shutdown`] can tear
/// them down.
pub struct Registry {
    objects: ObjectRegistry<Handle, ObjectRef>,
    loop_handle: LoopHandle,
    config: BindingsConfig,
    bindings: Mutex<Vec<Weak<dyn Teardown>>>,
}

impl Registry {
    #[instrument(name = "registry_init", skip(config, loop_handle))]
    pub fn init(config: &BindingsConfig, loop_handle: LoopHandle) -> Arc<Self> {
        info!(ceiling = config.index_ceiling, "Initializing object registry");
        Arc::new(Self {
            objects: ObjectRegistry::with_ceiling(config.index_ceiling),
            loop_handle,
            config: config.clone(),
            bindings: Mutex::new(Vec::new()),
        })
    }

    pub fn objects(&self) -> &ObjectRegistry<Handle, ObjectRef> {
        &self.objects
    }

    pub fn loop_handle(&self) -> &LoopHandle {
        &self.loop_handle
    }

    pub fn config(&self) -> &BindingsConfig {
        &self.config
    }

    /// Register a binding for teardown at shutdown.
    pub fn attach(&self, binding: Weak<dyn Teardown>) {
        self.bindings.lock().push(binding);
    }

    pub fn map(&self, object: ObjectRef) -> BindingResult<Handle> {
        Ok(self.objects.map(object)?)
    }

    pub fn unmap(&self, handle: Handle) -> BindingResult<ObjectRef> {
        Ok(self.objects.unmap(handle)?)
    }

    /// Reverse lookup.
    pub fn find(&self, object: &ObjectRef) -> Option<Handle> {
        self.objects.find(object)
    }

    pub fn fetch_fader(&self, handle: Handle) -> BindingResult<Arc<Fader>> {
        Ok(self.objects.fetch(handle, ObjectKind::Fader, |o| match o {
            ObjectRef::Fader(r) => r.resolve(),
            _ => None,
        })?)
    }

    pub fn fetch_volmeter(&self, handle: Handle) -> BindingResult<Arc<Volmeter>> {
        Ok(self.objects.fetch(handle, ObjectKind::Volmeter, |o| match o {
            ObjectRef::Volmeter(r) => r.resolve(),
            _ => None,
        })?)
    }

    pub fn fetch_callback(&self, handle: Handle) -> BindingResult<Arc<CallbackInfo>> {
        Ok(self.objects.fetch(handle, ObjectKind::Callback, |o| match o {
            ObjectRef::Callback(info) => Some(Arc::clone(info)),
            _ => None,
        })?)
    }

    /// Wrap `callback` in a [`CallbackInfo`] and map it.
    pub fn register_callback(
        &self,
        callback: JsCallback,
    ) -> BindingResult<(Handle, Arc<CallbackInfo>)> {
        let info = Arc::new(CallbackInfo::new(callback));
        let handle = self.map(ObjectRef::Callback(Arc::clone(&info)))?;
        debug!(handle, "Callback registered");
        Ok((handle, info))
    }

    /// Stop the callback under `handle` and unmap it.
    ///
    /// Events already queued for it are discarded when drained.
    pub fn unregister_callback(&self, handle: Handle) -> BindingResult<Arc<CallbackInfo>> {
        self.take_callback(handle, |_| true)
    }

    /// Like [`Registry::unregister_callback`], but only if `handle` still
    /// names `expected`. A handle that was released and mapped to another
    /// callback is left alone.
    pub fn release_callback(
        &self,
        handle: Handle,
        expected: &Arc<CallbackInfo>,
    ) -> BindingResult<Arc<CallbackInfo>> {
        self.take_callback(handle, |info| Arc::ptr_eq(info, expected))
    }

    fn take_callback<P>(&self, handle: Handle, pred: P) -> BindingResult<Arc<CallbackInfo>>
    where
        P: FnOnce(&Arc<CallbackInfo>) -> bool,
    {
        let object = self.objects.take_if(handle, ObjectKind::Callback, |o| match o {
            ObjectRef::Callback(info) => pred(info),
            _ => false,
        })?;
        let ObjectRef::Callback(info) = object else {
            return Err(BindingError::InvalidReference(u64::from(handle)));
        };
        info.stop();
        debug!(handle, "Callback unregistered");
        Ok(info)
    }

    /// Number of live handles.
    pub fn live_count(&self) -> u64 {
        self.objects.count(true)
    }

    /// Tear down every attached binding, then drop whatever is still
    /// mapped. Leftover entries are reported as leaks.
    #[instrument(name = "registry_shutdown", skip(self))]
    pub fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down object registry");

        let bindings: Vec<Weak<dyn Teardown>> = std::mem::take(&mut *self.bindings.lock());
        let mut report = ShutdownReport::default();
        for binding in bindings.iter().filter_map(Weak::upgrade) {
            let released = binding.teardown();
            debug!(binding = binding.name(), released, "Binding torn down");
            report.released += released;
        }

        report.leaked = self.live_count();
        if report.leaked > 0 {
            warn!(leaked = report.leaked, "Objects still registered at shutdown");
            for (handle, object) in self.objects.clear() {
                if let ObjectRef::Callback(info) = &object {
                    info.stop();
                }
                debug!(handle, kind = %object.tag(), "Dropped leaked entry");
            }
        } else {
            info!("No leaked objects");
        }

        report
    }
}
