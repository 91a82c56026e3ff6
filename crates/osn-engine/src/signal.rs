//! Named signals with any number of connected callbacks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::calldata::Calldata;

/// Callback invoked on the emitting thread.
pub type SignalCallback = Arc<dyn Fn(&Calldata) + Send + Sync>;

/// Identifies one connection on a [`SignalHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct Connection {
    id: ConnectionId,
    signal: String,
    callback: SignalCallback,
}

/// Signal dispatcher owned by the global context, a source or an output.
///
/// Connecting the same signal twice creates two independent connections.
pub struct SignalHandler {
    next_id: AtomicU64,
    connections: RwLock<Vec<Connection>>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(Vec::new()),
        }
    }

    /// Connect `callback` to `signal`.
    pub fn connect<F>(&self, signal: &str, callback: F) -> ConnectionId
    where
        F: Fn(&Calldata) + Send + Sync + 'static,
    {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.write().push(Connection {
            id,
            signal: signal.to_string(),
            callback: Arc::new(callback),
        });
        trace!(signal, id = id.0, "Signal connected");
        id
    }

    /// Remove a connection. Returns false if it did not exist.
    pub fn disconnect(&self, signal: &str, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|c| !(c.id == id && c.signal == signal));
        before != connections.len()
    }

    /// Invoke every callback connected to `signal`, in connection order.
    ///
    /// Callbacks run without the handler's lock held.
    pub fn emit(&self, signal: &str, data: &Calldata) {
        let targets: Vec<SignalCallback> = self
            .connections
            .read()
            .iter()
            .filter(|c| c.signal == signal)
            .map(|c| Arc::clone(&c.callback))
            .collect();

        trace!(signal, receivers = targets.len(), "Emitting signal");
        for callback in targets {
            callback(data);
        }
    }

    /// Number of connections to `signal`.
    pub fn connection_count(&self, signal: &str) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|c| c.signal == signal)
            .count()
    }

    /// Number of connections across all signals.
    pub fn total_connections(&self) -> usize {
        self.connections.read().len()
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHandler")
            .field("connections", &self.total_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::calldata::CalldataValue;

    #[test]
    fn test_emit_reaches_every_connection() {
        let handler = SignalHandler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            handler.connect("mute", move |data| {
                assert_eq!(data.bool("muted"), Some(true));
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        handler.connect("show", |_| panic!("wrong signal"));

        handler.emit("mute", &Calldata::new().with("muted", CalldataValue::Bool(true)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disconnect_only_removes_one() {
        let handler = SignalHandler::new();
        let a = handler.connect("start", |_| {});
        handler.connect("start", |_| {});

        assert!(handler.disconnect("start", a));
        assert!(!handler.disconnect("start", a));
        assert!(!handler.disconnect("stop", a));
        assert_eq!(handler.connection_count("start"), 1);
    }

    #[test]
    fn test_callback_may_disconnect_itself() {
        let handler = Arc::new(SignalHandler::new());
        let slot = Arc::new(parking_lot::Mutex::new(None));

        let inner_handler = Arc::clone(&handler);
        let inner_slot = Arc::clone(&slot);
        let id = handler.connect("stop", move |_| {
            if let Some(id) = inner_slot.lock().take() {
                inner_handler.disconnect("stop", id);
            }
        });
        *slot.lock() = Some(id);

        handler.emit("stop", &Calldata::new());
        assert_eq!(handler.total_connections(), 0);
    }
}
