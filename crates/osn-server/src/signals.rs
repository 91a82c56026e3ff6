//! Subscriptions from JS to named engine signals.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

use osn_engine::{Calldata, ConnectionId, Engine, Output, SignalHandler, Source};
use osn_events::{CallbackInfo, Execute, ForeignWorker, JsCallback, JsValue};

use crate::error::BindingError;
use crate::object::Handle;
use crate::registry::{Registry, Teardown};
use crate::BindingResult;

/// Whose signal handler a subscription attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Output(String),
    Source(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Output(name) => write!(f, "output:{name}"),
            Self::Source(name) => write!(f, "source:{name}"),
        }
    }
}

/// Arguments a signal is delivered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    /// `(source name)`
    SourceName,
    /// `(source name, muted)`
    SourceMute,
    /// `(code, error)`
    OutputStatus,
    /// `()`
    Empty,
}

impl Payload {
    fn for_signal(scope: &Scope, signal: &str) -> Self {
        match scope {
            Scope::Source(_) if signal == "mute" => Self::SourceMute,
            Scope::Source(_) => Self::SourceName,
            Scope::Global if signal.starts_with("source_") => Self::SourceName,
            Scope::Output(_) => Self::OutputStatus,
            Scope::Global => Self::Empty,
        }
    }

    /// `output` is read at firing time for its last error.
    fn extract(self, data: &Calldata, output: Option<&Output>) -> Vec<JsValue> {
        let source_name = || {
            data.source("source")
                .map_or(JsValue::Undefined, |s| JsValue::String(s.name()))
        };

        match self {
            Self::SourceName => vec![source_name()],
            Self::SourceMute => vec![
                source_name(),
                data.bool("muted").map_or(JsValue::Undefined, JsValue::Bool),
            ],
            Self::OutputStatus => vec![
                JsValue::from(data.int("code").unwrap_or(0)),
                JsValue::String(output.and_then(Output::last_error).unwrap_or_default()),
            ],
            Self::Empty => Vec::new(),
        }
    }
}

/// One signal firing on its way to the loop.
struct SignalEvent {
    args: Vec<JsValue>,
}

impl Execute for SignalEvent {
    fn execute(self, callback: &JsCallback) {
        callback.call(&self.args);
    }
}

/// The engine object a subscription was connected on.
///
/// Held weakly: a removed source or output takes its handler, and every
/// connection on it, with it.
enum Bound {
    Global,
    Output(Weak<Output>),
    Source(Weak<Source>),
}

impl Bound {
    fn resolve(engine: &Engine, scope: &Scope) -> BindingResult<Self> {
        match scope {
            Scope::Global => Ok(Self::Global),
            Scope::Source(name) => engine
                .source_by_name(name)
                .map(|source| Self::Source(Arc::downgrade(&source)))
                .ok_or_else(|| BindingError::NotFound(name.clone())),
            Scope::Output(name) => engine
                .output_by_name(name)
                .map(|output| Self::Output(Arc::downgrade(&output)))
                .ok_or_else(|| BindingError::NotFound(name.clone())),
        }
    }

    /// Run `f` on the bound handler, if its owner is still alive.
    fn with_handler<R>(&self, engine: &Engine, f: impl FnOnce(&SignalHandler) -> R) -> Option<R> {
        match self {
            Self::Global => Some(f(engine.signals())),
            Self::Output(output) => output.upgrade().map(|o| f(o.signals())),
            Self::Source(source) => source.upgrade().map(|s| f(s.signals())),
        }
    }
}

struct Connection {
    scope: Scope,
    bound: Bound,
    signal: String,
    id: ConnectionId,
    info: Arc<CallbackInfo>,
}

/// Connects JS callbacks to engine signals.
///
/// Every `connect` registers an independent subscription with its own
/// callback handle, so connecting the same signal twice delivers each
/// firing twice. Firings happen on engine threads and send a
/// [`ForeignWorker`] bound to the subscription's own [`CallbackInfo`] to
/// the loop. The handle is never resolved again after `connect`, so a
/// released and reused handle cannot receive another subscription's
/// firings.
pub struct SignalBindings {
    registry: Arc<Registry>,
    engine: Arc<Engine>,
    // Keyed by callback handle.
    connections: Mutex<HashMap<Handle, Connection>>,
}

impl SignalBindings {
    pub fn new(registry: Arc<Registry>, engine: Arc<Engine>) -> Arc<Self> {
        let bindings = Arc::new(Self {
            registry,
            engine,
            connections: Mutex::new(HashMap::new()),
        });

        let weak: Weak<dyn Teardown> = Arc::downgrade(&bindings) as Weak<dyn Teardown>;
        bindings.registry.attach(weak);
        bindings
    }

    /// Subscribe `callback` to `signal` on `scope`. Returns the callback
    /// handle used to disconnect.
    #[instrument(skip(self, callback))]
    pub fn connect(&self, scope: Scope, signal: &str, callback: JsCallback) -> BindingResult<Handle> {
        let bound = Bound::resolve(&self.engine, &scope)?;
        let (handle, info) = self.registry.register_callback(callback)?;

        let payload = Payload::for_signal(&scope, signal);
        let target = Arc::downgrade(&info);
        let output = match &bound {
            Bound::Output(output) => Some(Weak::clone(output)),
            _ => None,
        };
        let loop_handle = self.registry.loop_handle().clone();

        let connected = bound.with_handler(&self.engine, |handler| {
            handler.connect(signal, move |data| {
                let Some(info) = target.upgrade().filter(|info| !info.is_stopped()) else {
                    trace!(handle, "Signal fired for released callback");
                    return;
                };

                let output = output.as_ref().and_then(Weak::upgrade);
                let event = SignalEvent {
                    args: payload.extract(data, output.as_deref()),
                };
                ForeignWorker::new(&loop_handle, info, event).send();
            })
        });
        let Some(id) = connected else {
            // Removed between resolve and connect.
            self.registry.release_callback(handle, &info)?;
            return Err(BindingError::NotFound(scope.to_string()));
        };

        debug!(handle, %scope, signal, "Signal connected");
        self.connections.lock().insert(
            handle,
            Connection {
                scope,
                bound,
                signal: signal.to_string(),
                id,
                info,
            },
        );
        Ok(handle)
    }

    /// Remove a subscription. Firings already on their way to the loop are
    /// dropped there.
    #[instrument(skip(self))]
    pub fn disconnect(&self, handle: Handle) -> BindingResult<()> {
        let connection = self
            .connections
            .lock()
            .remove(&handle)
            .ok_or(BindingError::InvalidReference(u64::from(handle)))?;

        self.detach(&connection);
        self.registry.release_callback(handle, &connection.info)?;
        debug!(handle, "Signal disconnected");
        Ok(())
    }

    /// Number of live subscriptions.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn detach(&self, connection: &Connection) {
        let removed = connection
            .bound
            .with_handler(&self.engine, |handler| {
                handler.disconnect(&connection.signal, connection.id)
            });
        match removed {
            Some(true) => {}
            Some(false) => warn!(
                scope = %connection.scope,
                signal = %connection.signal,
                "Signal connection already gone"
            ),
            // The scope object is gone and took its handler with it.
            None => debug!(scope = %connection.scope, "Signal scope already removed"),
        }
    }
}

impl Teardown for SignalBindings {
    fn name(&self) -> &'static str {
        "signals"
    }

    fn teardown(&self) -> usize {
        let connections: Vec<(Handle, Connection)> = self.connections.lock().drain().collect();
        for (handle, connection) in &connections {
            self.detach(connection);
            if let Err(err) = self.registry.release_callback(*handle, &connection.info) {
                warn!(handle, "Failed to release signal callback: {err}");
            }
        }
        connections.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use osn_events::EventLoop;

    use super::*;
    use crate::config::BindingsConfig;

    struct Fixture {
        event_loop: EventLoop,
        registry: Arc<Registry>,
        engine: Arc<Engine>,
        signals: Arc<SignalBindings>,
    }

    fn fixture() -> Fixture {
        let event_loop = EventLoop::new();
        let registry = Registry::init(&BindingsConfig::default(), event_loop.handle());
        let engine = Arc::new(Engine::new());
        let signals = SignalBindings::new(Arc::clone(&registry), Arc::clone(&engine));
        Fixture {
            event_loop,
            registry,
            engine,
            signals,
        }
    }

    fn recorder() -> (JsCallback, Arc<Mutex<Vec<Vec<JsValue>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = JsCallback::new(move |args| sink.lock().push(args.to_vec()));
        (callback, seen)
    }

    #[test]
    fn test_scenario_c_double_mute_subscription() {
        let f = fixture();
        let source = f.engine.create_source("mic").unwrap();

        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        let scope = Scope::Source("mic".into());
        let a = f.signals.connect(scope.clone(), "mute", first).unwrap();
        let b = f.signals.connect(scope, "mute", second).unwrap();
        assert_ne!(a, b);

        thread::spawn(move || source.set_muted(true))
            .join()
            .unwrap();
        f.event_loop.run_until_idle();

        let expected = vec![vec![JsValue::from("mic"), JsValue::Bool(true)]];
        assert_eq!(*first_seen.lock(), expected);
        assert_eq!(*second_seen.lock(), expected);
    }

    #[test]
    fn test_global_source_signals_carry_name() {
        let f = fixture();
        let (callback, seen) = recorder();
        f.signals
            .connect(Scope::Global, "source_create", callback)
            .unwrap();

        f.engine.create_source("cam").unwrap();
        f.event_loop.run_until_idle();

        assert_eq!(*seen.lock(), vec![vec![JsValue::from("cam")]]);
    }

    #[test]
    fn test_output_signals_carry_code_and_last_error() {
        let f = fixture();
        let output = f.engine.create_output("stream").unwrap();
        let (on_stop, stops) = recorder();
        let (on_start, starts) = recorder();
        let scope = Scope::Output("stream".into());
        f.signals.connect(scope.clone(), "stop", on_stop).unwrap();
        f.signals.connect(scope, "start", on_start).unwrap();

        output.start();
        output.set_last_error(Some("Connection refused"));
        output.stop(-3);
        f.event_loop.run_until_idle();

        assert_eq!(
            *starts.lock(),
            vec![vec![JsValue::Number(0.0), JsValue::from("")]]
        );
        assert_eq!(
            *stops.lock(),
            vec![vec![JsValue::Number(-3.0), JsValue::from("Connection refused")]]
        );
    }

    #[test]
    fn test_unknown_scope_is_not_found() {
        let f = fixture();
        let (callback, _) = recorder();
        assert_eq!(
            f.signals
                .connect(Scope::Source("nope".into()), "mute", callback.clone())
                .unwrap_err(),
            BindingError::NotFound("nope".into())
        );
        assert_eq!(
            f.signals
                .connect(Scope::Output("nope".into()), "start", callback)
                .unwrap_err(),
            BindingError::NotFound("nope".into())
        );
        assert_eq!(f.registry.live_count(), 0);
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let f = fixture();
        let source = f.engine.create_source("mic").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback = JsCallback::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let h = f
            .signals
            .connect(Scope::Source("mic".into()), "show", callback)
            .unwrap();

        // Fired before the disconnect, drained after it.
        source.show();
        f.signals.disconnect(h).unwrap();
        f.event_loop.run_until_idle();

        source.hide();
        source.show();
        f.event_loop.run_until_idle();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.signals().connection_count("show"), 0);
        assert_eq!(f.signals.connection_count(), 0);
        assert_eq!(
            f.signals.disconnect(h).unwrap_err(),
            BindingError::InvalidReference(u64::from(h))
        );
    }

    #[test]
    fn test_disconnect_after_source_removed() {
        let f = fixture();
        f.engine.create_source("mic").unwrap();
        let (callback, _) = recorder();
        let h = f
            .signals
            .connect(Scope::Source("mic".into()), "remove", callback)
            .unwrap();

        f.engine.remove_source("mic").unwrap();
        f.signals.disconnect(h).unwrap();
        assert_eq!(f.registry.live_count(), 0);
    }

    #[test]
    fn test_disconnect_after_rename_detaches_and_reused_handle_stays_quiet() {
        let f = fixture();
        let source = f.engine.create_source("mic").unwrap();
        let (a_cb, a_seen) = recorder();
        let a = f
            .signals
            .connect(Scope::Source("mic".into()), "mute", a_cb)
            .unwrap();

        source.rename("mic2").unwrap();
        f.signals.disconnect(a).unwrap();
        assert_eq!(source.signals().connection_count("mute"), 0);

        let (b_cb, b_seen) = recorder();
        let b = f
            .signals
            .connect(Scope::Global, "source_create", b_cb)
            .unwrap();
        assert_eq!(b, a);

        source.set_muted(true);
        f.engine.create_source("cam").unwrap();
        f.event_loop.run_until_idle();

        assert!(a_seen.lock().is_empty());
        assert_eq!(*b_seen.lock(), vec![vec![JsValue::from("cam")]]);
    }

    #[test]
    fn test_disconnect_leaves_same_name_replacement_connected() {
        let f = fixture();
        f.engine.create_source("mic").unwrap();
        let (old_cb, _) = recorder();
        let old = f
            .signals
            .connect(Scope::Source("mic".into()), "mute", old_cb)
            .unwrap();
        f.engine.remove_source("mic").unwrap();

        let fresh = f.engine.create_source("mic").unwrap();
        let (x_cb, x_seen) = recorder();
        f.signals
            .connect(Scope::Source("mic".into()), "mute", x_cb)
            .unwrap();

        f.signals.disconnect(old).unwrap();
        assert_eq!(fresh.signals().connection_count("mute"), 1);

        fresh.set_muted(true);
        f.event_loop.run_until_idle();
        assert_eq!(
            *x_seen.lock(),
            vec![vec![JsValue::from("mic"), JsValue::Bool(true)]]
        );
    }

    #[test]
    fn test_in_flight_firing_skips_reused_handle() {
        let f = fixture();
        let source = f.engine.create_source("mic").unwrap();

        // Connected first, so it runs before A's trampoline within the same
        // emit: it releases A and hands the handle to B mid-firing.
        let pending = Arc::new(Mutex::new(None::<Handle>));
        let reused = Arc::new(Mutex::new(None::<Handle>));
        let (b_cb, b_seen) = recorder();
        {
            let signals = Arc::clone(&f.signals);
            let pending = Arc::clone(&pending);
            let reused = Arc::clone(&reused);
            source.signals().connect("mute", move |_| {
                if let Some(a) = pending.lock().take() {
                    signals.disconnect(a).unwrap();
                    let b = signals
                        .connect(Scope::Global, "source_create", b_cb.clone())
                        .unwrap();
                    *reused.lock() = Some(b);
                }
            });
        }

        let (a_cb, a_seen) = recorder();
        let a = f
            .signals
            .connect(Scope::Source("mic".into()), "mute", a_cb)
            .unwrap();
        *pending.lock() = Some(a);

        thread::spawn(move || source.set_muted(true))
            .join()
            .unwrap();
        f.event_loop.run_until_idle();

        assert_eq!(*reused.lock(), Some(a));
        assert!(a_seen.lock().is_empty());
        assert!(b_seen.lock().is_empty());
    }

    #[test]
    fn test_shutdown_disconnects_everything() {
        let f = fixture();
        let (a, _) = recorder();
        let (b, _) = recorder();
        f.signals.connect(Scope::Global, "source_create", a).unwrap();
        f.signals.connect(Scope::Global, "source_destroy", b).unwrap();

        let report = f.registry.shutdown();
        assert_eq!(report.released, 2);
        assert_eq!(report.leaked, 0);
        assert_eq!(f.engine.signals().total_connections(), 0);
    }
}
