//! Liveness record for a registered JS callback.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::js::JsCallback;

/// A registered JS callback plus its `stopped` flag.
///
/// Engine threads may still hold events for a callback after it has been
/// unregistered. Every delivery path checks [`CallbackInfo::is_stopped`]
/// right before invoking the function and drops the event if it is set.
/// Shared through `Arc`: the registry, queued events and workers each hold
/// a reference, and the record is freed once the last of them is done.
#[derive(Debug)]
pub struct CallbackInfo {
    callback: JsCallback,
    stopped: AtomicBool,
}

impl CallbackInfo {
    pub fn new(callback: JsCallback) -> Self {
        Self {
            callback,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn callback(&self) -> &JsCallback {
        &self.callback
    }

    /// Mark the callback as unregistered.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
