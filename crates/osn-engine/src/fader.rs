//! Volume faders and the dB/deflection curves they use.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::source::Source;

/// Identifies one callback registered on a fader or volmeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioCallbackId(pub(crate) u64);

/// Mapping between dB and fader deflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaderType {
    /// Cubic curve over the linear multiplier.
    Cubic,

    /// IEC 60-268-18 piecewise curve.
    Iec,

    /// Logarithmic curve over -96..0 dB.
    Log,
}

impl FaderType {
    /// Decode the wire value (0, 1, 2).
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Cubic),
            1 => Some(Self::Iec),
            2 => Some(Self::Log),
            _ => None,
        }
    }

    /// Lowest dB value the fader can hold.
    pub fn min_db(self) -> f32 {
        match self {
            Self::Cubic | Self::Iec => f32::NEG_INFINITY,
            Self::Log => -LOG_RANGE_DB,
        }
    }

    pub fn db_to_def(self, db: f32) -> f32 {
        match self {
            Self::Cubic => cubic_db_to_def(db),
            Self::Iec => iec_db_to_def(db),
            Self::Log => log_db_to_def(db),
        }
    }

    pub fn def_to_db(self, def: f32) -> f32 {
        match self {
            Self::Cubic => cubic_def_to_db(def),
            Self::Iec => iec_def_to_db(def),
            Self::Log => log_def_to_db(def),
        }
    }
}

const LOG_OFFSET_DB: f32 = 6.0;
const LOG_RANGE_DB: f32 = 96.0;

/// Convert dB to a linear multiplier.
pub fn db_to_mul(db: f32) -> f32 {
    if db == f32::NEG_INFINITY {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// Convert a linear multiplier to dB.
pub fn mul_to_db(mul: f32) -> f32 {
    if mul <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * mul.log10()
    }
}

fn cubic_db_to_def(db: f32) -> f32 {
    if db >= 0.0 {
        return 1.0;
    }
    db_to_mul(db).cbrt()
}

fn cubic_def_to_db(def: f32) -> f32 {
    if def >= 1.0 {
        return 0.0;
    }
    if def <= 0.0 {
        return f32::NEG_INFINITY;
    }
    mul_to_db(def * def * def)
}

// (dB floor, deflection at floor, dB span, deflection span) per IEC
// segment, top down.
const IEC_SEGMENTS: [(f32, f32, f32, f32); 6] = [
    (-9.0, 0.75, 9.0, 0.25),
    (-20.0, 0.6, 11.0, 0.15),
    (-30.0, 0.45, 10.0, 0.15),
    (-40.0, 0.3, 10.0, 0.15),
    (-50.0, 0.15, 10.0, 0.15),
    (-60.0, 0.0, 10.0, 0.15),
];

fn iec_db_to_def(db: f32) -> f32 {
    if db >= 0.0 {
        return 1.0;
    }
    for (floor, base, db_span, def_span) in IEC_SEGMENTS {
        if db >= floor {
            return (db - floor) / db_span * def_span + base;
        }
    }
    0.0
}

fn iec_def_to_db(def: f32) -> f32 {
    if def >= 1.0 {
        return 0.0;
    }
    if def <= 0.0 {
        return f32::NEG_INFINITY;
    }
    for (floor, base, db_span, def_span) in IEC_SEGMENTS {
        if def >= base {
            return (def - base) / def_span * db_span + floor;
        }
    }
    f32::NEG_INFINITY
}

fn log_db_to_def(db: f32) -> f32 {
    if db >= 0.0 {
        return 1.0;
    }
    if db <= -LOG_RANGE_DB {
        return 0.0;
    }
    let offset_val = -LOG_OFFSET_DB.log10();
    let range_val = -(LOG_RANGE_DB + LOG_OFFSET_DB).log10();
    (-(-db + LOG_OFFSET_DB).log10() - range_val) / (offset_val - range_val)
}

fn log_def_to_db(def: f32) -> f32 {
    if def >= 1.0 {
        return 0.0;
    }
    if def <= 0.0 {
        return -LOG_RANGE_DB;
    }
    let top = LOG_RANGE_DB + LOG_OFFSET_DB;
    -top * (top / LOG_OFFSET_DB).powf(-def) + LOG_OFFSET_DB
}

/// Callback fired with the new dB value on every change.
pub type FaderCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// A volume control that can drive a source's volume.
pub struct Fader {
    kind: FaderType,
    db: RwLock<f32>,
    source: RwLock<Option<Weak<Source>>>,
    callbacks: RwLock<Vec<(AudioCallbackId, FaderCallback)>>,
    next_id: AtomicU64,
}

impl Fader {
    pub fn new(kind: FaderType) -> Self {
        Self {
            kind,
            db: RwLock::new(0.0),
            source: RwLock::new(None),
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn kind(&self) -> FaderType {
        self.kind
    }

    pub fn db(&self) -> f32 {
        *self.db.read()
    }

    /// Set the level, clamped to the fader's range. Updates the attached
    /// source and fires every callback on the calling thread.
    pub fn set_db(&self, db: f32) {
        let db = if db.is_nan() {
            self.kind.min_db()
        } else {
            db.clamp(self.kind.min_db(), 0.0)
        };
        *self.db.write() = db;

        if let Some(source) = self.attached_source() {
            source.store_volume(db_to_mul(db));
        }

        let callbacks: Vec<FaderCallback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        trace!(db, callbacks = callbacks.len(), "Fader changed");
        for callback in callbacks {
            callback(db);
        }
    }

    pub fn deflection(&self) -> f32 {
        self.kind.db_to_def(self.db())
    }

    pub fn set_deflection(&self, def: f32) {
        self.set_db(self.kind.def_to_db(def));
    }

    pub fn mul(&self) -> f32 {
        db_to_mul(self.db())
    }

    pub fn set_mul(&self, mul: f32) {
        self.set_db(mul_to_db(mul));
    }

    /// Attach to `source`, replacing any previous attachment. The fader
    /// takes over the source's current volume.
    pub fn attach(&self, source: &Arc<Source>) {
        *self.source.write() = Some(Arc::downgrade(source));
        *self.db.write() = mul_to_db(source.volume()).max(self.kind.min_db());
    }

    pub fn detach(&self) {
        self.source.write().take();
    }

    pub fn attached_source(&self) -> Option<Arc<Source>> {
        self.source.read().as_ref().and_then(Weak::upgrade)
    }

    pub fn add_callback<F>(&self, callback: F) -> AudioCallbackId
    where
        F: Fn(f32) + Send + Sync + 'static,
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
}

impl fmt::Debug for Fader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fader")
            .field("kind", &self.kind)
            .field("db", &self.db())
            .finish()
    }
}
