//! Audio level meters.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::fader::{AudioCallbackId, FaderType};
use crate::source::Source;

/// Default metering interval in milliseconds.
pub const DEFAULT_UPDATE_INTERVAL_MS: u32 = 50;

/// One metering sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeLevels {
    pub level: f32,
    pub magnitude: f32,
    pub peak: f32,
    pub muted: bool,
}

/// Callback fired from the metering thread.
pub type VolmeterCallback = Arc<dyn Fn(VolumeLevels) + Send + Sync>;

/// Reports levels of an attached source at a fixed interval.
pub struct Volmeter {
    kind: FaderType,
    update_interval_ms: AtomicU32,
    source: RwLock<Option<Weak<Source>>>,
    callbacks: RwLock<Vec<(AudioCallbackId, VolmeterCallback)>>,
    next_id: AtomicU64,
}

impl Volmeter {
    pub fn new(kind: FaderType) -> Self {
        Self {
            kind,
            update_interval_ms: AtomicU32::new(DEFAULT_UPDATE_INTERVAL_MS),
            source: RwLock::new(None),
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn kind(&self) -> FaderType {
        self.kind
    }

    pub fn update_interval_ms(&self) -> u32 {
        self.update_interval_ms.load(Ordering::Relaxed)
    }

    /// Zero is raised to one millisecond.
    pub fn set_update_interval_ms(&self, ms: u32) {
        self.update_interval_ms.store(ms.max(1), Ordering::Relaxed);
    }

    pub fn attach(&self, source: &Arc<Source>) {
        *self.source.write() = Some(Arc::downgrade(source));
    }

    pub fn detach(&self) {
        self.source.write().take();
    }

    pub fn attached_source(&self) -> Option<Arc<Source>> {
        self.source.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn add_callback<F>(&self, callback: F) -> AudioCallbackId
    where
        F: Fn(VolumeLevels) + Send + Sync + 'static,
    {
        let id = AudioCallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove_callback(&self, id: AudioCallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        before != callbacks.len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Deliver one sample to every callback on the calling thread.
    pub fn emit_levels(&self, level: f32, magnitude: f32, peak: f32, muted: bool) {
        let levels = VolumeLevels {
            level,
            magnitude,
            peak,
            muted,
        };

        let callbacks: Vec<VolmeterCallback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(levels);
        }
    }
}

impl fmt::Debug for Volmeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volmeter")
            .field("kind", &self.kind)
            .field("update_interval_ms", &self.update_interval_ms())
            .finish()
    }
}
