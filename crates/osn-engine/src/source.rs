//! Named sources and outputs, each with its own signal handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::calldata::{Calldata, CalldataValue};
use crate::error::EngineError;
use crate::signal::SignalHandler;
use crate::EngineResult;

/// Sources by current name.
pub(crate) type SourceIndex = RwLock<HashMap<String, Arc<Source>>>;

/// An audio/video source.
///
/// State changes emit the matching signal on the source's own handler, and
/// for most of them also the `source_*` signal on the global handler.
pub struct Source {
    name: RwLock<String>,
    signals: SignalHandler,
    global: Arc<SignalHandler>,
    index: Weak<SourceIndex>,
    muted: AtomicBool,
    showing: AtomicBool,
    active: AtomicBool,
    volume: RwLock<f32>,
}

impl Source {
    pub(crate) fn new(name: &str, global: Arc<SignalHandler>, index: Weak<SourceIndex>) -> Self {
        Self {
            name: RwLock::new(name.to_string()),
            signals: SignalHandler::new(),
            global,
            index,
            muted: AtomicBool::new(false),
            showing: AtomicBool::new(false),
            active: AtomicBool::new(false),
            volume: RwLock::new(1.0),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Set the mute state and emit `mute` with `{source, muted}`.
    pub fn set_muted(self: &Arc<Self>, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        let data = self.calldata().with("muted", CalldataValue::Bool(muted));
        self.signals.emit("mute", &data);
    }

    /// Linear volume multiplier.
    pub fn volume(&self) -> f32 {
        *self.volume.read()
    }

    pub fn set_volume(self: &Arc<Self>, volume: f32) {
        let volume = volume.max(0.0);
        *self.volume.write() = volume;
        let data = self
            .calldata()
            .with("volume", CalldataValue::Float(f64::from(volume)));
        self.signals.emit("volume", &data);
    }

    /// Set the volume without emitting, as done by an attached fader.
    pub(crate) fn store_volume(&self, volume: f32) {
        *self.volume.write() = volume.max(0.0);
    }

    pub fn is_showing(&self) -> bool {
        self.showing.load(Ordering::SeqCst)
    }

    pub fn show(self: &Arc<Self>) {
        if !self.showing.swap(true, Ordering::SeqCst) {
            self.emit_both("show", "source_show");
        }
    }

    pub fn hide(self: &Arc<Self>) {
        if self.showing.swap(false, Ordering::SeqCst) {
            self.emit_both("hide", "source_hidden");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn activate(self: &Arc<Self>) {
        if !self.active.swap(true, Ordering::SeqCst) {
            self.emit_both("activate", "source_activate");
        }
    }

    pub fn deactivate(self: &Arc<Self>) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.emit_both("deactivate", "source_deactivate");
        }
    }

    pub fn save(self: &Arc<Self>) {
        self.emit_both("save", "source_save");
    }

    pub fn load(self: &Arc<Self>) {
        self.emit_both("load", "source_load");
    }

    /// Rename and emit `rename` with `{source, new_name, prev_name}`.
    ///
    /// Fails if another source of the same engine already has `new_name`.
    pub fn rename(self: &Arc<Self>, new_name: &str) -> EngineResult<()> {
        let prev_name = match self.index.upgrade() {
            Some(index) => {
                let mut index = index.write();
                if index.get(new_name).is_some_and(|other| !Arc::ptr_eq(other, self)) {
                    return Err(EngineError::DuplicateName(new_name.to_string()));
                }
                let prev_name = std::mem::replace(&mut *self.name.write(), new_name.to_string());
                // Only re-key if the index still holds this source.
                if index.get(&prev_name).is_some_and(|s| Arc::ptr_eq(s, self)) {
                    index.remove(&prev_name);
                    index.insert(new_name.to_string(), Arc::clone(self));
                }
                prev_name
            }
            None => std::mem::replace(&mut *self.name.write(), new_name.to_string()),
        };

        let data = self
            .calldata()
            .with("new_name", CalldataValue::String(new_name.to_string()))
            .with("prev_name", CalldataValue::String(prev_name));
        self.signals.emit("rename", &data);
        self.global.emit("source_rename", &data);
        Ok(())
    }

    /// Run a transition on this source: start, video stop, stop.
    pub fn run_transition(self: &Arc<Self>) {
        let data = self.calldata();
        for signal in [
            "source_transition_start",
            "source_transition_video_stop",
            "source_transition_stop",
        ] {
            self.global.emit(signal, &data);
        }
    }

    pub(crate) fn emit_both(self: &Arc<Self>, local: &str, global: &str) {
        let data = self.calldata();
        self.signals.emit(local, &data);
        self.global.emit(global, &data);
    }

    pub(crate) fn emit_global(self: &Arc<Self>, global: &str) {
        self.global.emit(global, &self.calldata());
    }

    fn calldata(self: &Arc<Self>) -> Calldata {
        Calldata::new().with("source", CalldataValue::Source(Arc::clone(self)))
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &*self.name.read())
            .field("muted", &self.is_muted())
            .finish()
    }
}

/// A streaming or recording output.
pub struct Output {
    name: String,
    signals: SignalHandler,
    active: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl Output {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            signals: SignalHandler::new(),
            active: AtomicBool::new(false),
            last_error: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Message describing the most recent failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Record (or with `None`, clear) the failure message.
    pub fn set_last_error(&self, message: Option<&str>) {
        *self.last_error.write() = message.map(str::to_string);
    }

    /// Emit `starting`, `start` and `activate`. Returns false if already
    /// active.
    pub fn start(&self) -> bool {
        if self.active.swap(true, Ordering::SeqCst) {
            return false;
        }

        debug!(output = %self.name, "Output starting");
        let data = self.calldata();
        for signal in ["starting", "start", "activate"] {
            self.signals.emit(signal, &data);
        }
        true
    }

    /// Emit `stopping`, `stop` (with `code`) and `deactivate`. Returns
    /// false if not active.
    pub fn stop(&self, code: i64) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }

        debug!(output = %self.name, code, "Output stopping");
        let data = self.calldata();
        self.signals.emit("stopping", &data);
        self.signals
            .emit("stop", &data.clone().with("code", CalldataValue::Int(code)));
        self.signals.emit("deactivate", &data);
        true
    }

    pub fn reconnect(&self) {
        self.signals.emit("reconnect", &self.calldata());
    }

    pub fn reconnect_success(&self) {
        self.signals.emit("reconnect_success", &self.calldata());
    }

    fn calldata(&self) -> Calldata {
        Calldata::new().with("output", CalldataValue::String(self.name.clone()))
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}
