//! Server-side state for callbacks the client polls instead of receiving.
//!
//! A polled subscription still owns a callback handle, but its engine
//! callback only records what it saw. The client collects the recording
//! with a query call.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Buf;
use parking_lot::Mutex;

use osn_engine::VolumeLevels;
use osn_events::QueuePolicy;

use crate::error::BindingError;
use crate::object::Handle;
use crate::BindingResult;

/// A sample older than this is reported as silence.
pub const IDLE_AFTER: Duration = Duration::from_millis(300);

/// Level reported for a meter with no recent sample.
pub const SILENCE_DB: f32 = -65535.0;

const SILENCE: VolumeLevels = VolumeLevels {
    level: SILENCE_DB,
    magnitude: SILENCE_DB,
    peak: SILENCE_DB,
    muted: false,
};

/// Latest sample of one volmeter.
#[derive(Default)]
pub(crate) struct MeterSlot {
    latest: Mutex<Option<(VolumeLevels, Instant)>>,
}

impl MeterSlot {
    pub(crate) fn store(&self, levels: VolumeLevels) {
        *self.latest.lock() = Some((levels, Instant::now()));
    }

    pub(crate) fn read(&self) -> VolumeLevels {
        self.read_at(Instant::now())
    }

    /// The latest sample as of `now`. An idle sample is discarded.
    fn read_at(&self, now: Instant) -> VolumeLevels {
        let mut latest = self.latest.lock();
        match *latest {
            Some((levels, at)) if now.saturating_duration_since(at) <= IDLE_AFTER => levels,
            Some(_) => {
                *latest = None;
                SILENCE
            }
            None => SILENCE,
        }
    }
}

/// Level changes of one fader, oldest first.
pub(crate) struct FaderLog {
    pending: Mutex<VecDeque<f32>>,
    policy: QueuePolicy,
}

impl FaderLog {
    pub(crate) fn new(policy: QueuePolicy) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            policy,
        }
    }

    pub(crate) fn push(&self, db: f32) {
        let mut pending = self.pending.lock();
        if let QueuePolicy::DropOldest(capacity) = self.policy {
            while pending.len() >= capacity.max(1) {
                pending.pop_front();
            }
        }
        pending.push_back(db);
    }

    pub(crate) fn drain(&self) -> Vec<f32> {
        self.pending.lock().drain(..).collect()
    }
}

/// Decode a list of little-endian `u32` handles.
pub(crate) fn decode_handles(mut raw: &[u8]) -> BindingResult<Vec<Handle>> {
    if raw.len() % 4 != 0 {
        return Err(BindingError::InvalidArgument(format!(
            "handle list of {} bytes",
            raw.len()
        )));
    }

    let mut handles = Vec::with_capacity(raw.len() / 4);
    while raw.has_remaining() {
        handles.push(raw.get_u32_le());
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(level: f32) -> VolumeLevels {
        VolumeLevels {
            level,
            magnitude: level - 3.0,
            peak: level + 3.0,
            muted: false,
        }
    }

    #[test]
    fn test_meter_slot_goes_silent_when_idle() {
        let slot = MeterSlot::default();
        assert_eq!(slot.read(), SILENCE);

        slot.store(levels(-20.0));
        assert_eq!(slot.read(), levels(-20.0));

        let later = Instant::now() + IDLE_AFTER + Duration::from_millis(50);
        assert_eq!(slot.read_at(later), SILENCE);
        // The idle sample is gone for good.
        assert_eq!(slot.read(), SILENCE);
    }

    #[test]
    fn test_fader_log_drains_in_order_and_drops_oldest() {
        let log = FaderLog::new(QueuePolicy::DropOldest(2));
        for db in [-1.0, -2.0, -3.0] {
            log.push(db);
        }
        assert_eq!(log.drain(), vec![-2.0, -3.0]);
        assert!(log.drain().is_empty());
    }

    #[test]
    fn test_decode_handles() {
        let raw = [1, 0, 0, 0, 7, 1, 0, 0];
        assert_eq!(decode_handles(&raw).unwrap(), vec![1, 263]);
        assert!(decode_handles(&[]).unwrap().is_empty());
        assert!(matches!(
            decode_handles(&raw[..3]),
            Err(BindingError::InvalidArgument(_))
        ));
    }
}
