//! FIFO hand-off of engine-thread payloads to the event loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::callback::CallbackInfo;
use crate::event_loop::{AsyncHandle, LoopHandle};

/// Default bound for [`QueuePolicy::DropOldest`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// A payload that is delivered to one registered callback.
pub trait QueueEntry: Send + 'static {
    /// The callback this entry is addressed to.
    fn callback_info(&self) -> &CallbackInfo;
}

/// What happens when producers outpace the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuePolicy {
    /// Grow without limit.
    Unbounded,

    /// Keep at most this many entries, discarding the oldest to make room.
    DropOldest(usize),
}

impl QueuePolicy {
    /// `None` means unbounded.
    pub fn from_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::DropOldest(capacity),
            None => Self::Unbounded,
        }
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::DropOldest(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Entries handed to the visitor.
    pub delivered: usize,

    /// Entries skipped because their callback was stopped.
    pub discarded: usize,
}

type Visitor<T> = Box<dyn FnMut(T) + Send>;

struct Shared<T> {
    entries: Mutex<VecDeque<T>>,
    visit: Mutex<Visitor<T>>,
    policy: QueuePolicy,
    dropped: AtomicU64,
}

impl<T: QueueEntry> Shared<T> {
    fn drain(&self) -> DrainStats {
        let mut stats = DrainStats::default();
        let mut visit = self.visit.lock();

        loop {
            // Pop under the entries lock, visit without it.
            let entry = self.entries.lock().pop_front();
            let Some(entry) = entry else {
                break;
            };

            if entry.callback_info().is_stopped() {
                trace!("Discarding entry for stopped callback");
                stats.discarded += 1;
                continue;
            }

            (*visit)(entry);
            stats.delivered += 1;
        }

        stats
    }
}

/// Moves payloads from any number of producer threads to the loop thread.
///
/// `push` appends under a short lock. `signal` wakes the loop, and any
/// number of signals before the loop runs collapse into one drain. A drain
/// pops entries one at a time in push order and releases the lock before
/// visiting each one, so producers are never blocked behind a visitor.
/// Entries whose [`CallbackInfo`] is stopped by the time they are popped
/// are dropped without being visited.
pub struct CallbackQueue<T> {
    shared: Arc<Shared<T>>,
    wakeup: AsyncHandle,
}

impl<T: QueueEntry> CallbackQueue<T> {
    /// Create a queue whose entries are handed to `visit` on the loop
    /// behind `handle`.
    pub fn new<F>(handle: &LoopHandle, policy: QueuePolicy, visit: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            entries: Mutex::new(VecDeque::new()),
            visit: Mutex::new(Box::new(visit) as Visitor<T>),
            policy,
            dropped: AtomicU64::new(0),
        });

        let drain_shared = Arc::clone(&shared);
        let wakeup = AsyncHandle::new(handle, move || {
            let stats = drain_shared.drain();
            trace!(
                delivered = stats.delivered,
                discarded = stats.discarded,
                "Drained callback queue"
            );
        });

        Self { shared, wakeup }
    }

    /// Append `entry` at the back.
    pub fn push(&self, entry: T) {
        let mut entries = self.shared.entries.lock();

        if let QueuePolicy::DropOldest(capacity) = self.shared.policy {
            while entries.len() >= capacity.max(1) {
                entries.pop_front();
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    debug!(dropped, capacity, "Callback queue full, dropping oldest");
                }
            }
        }

        entries.push_back(entry);
    }

    /// Wake the loop to drain. Returns false once the queue is closed.
    pub fn signal(&self) -> bool {
        self.wakeup.send()
    }

    /// Push and signal.
    pub fn send(&self, entry: T) -> bool {
        self.push(entry);
        self.signal()
    }

    /// Drain on the calling thread.
    ///
    /// Must be called from the loop thread and not from inside the visitor.
    pub fn drain(&self) -> DrainStats {
        self.shared.drain()
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.lock().is_empty()
    }

    /// Number of entries discarded by the capacity bound so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> QueuePolicy {
        self.shared.policy
    }

    /// Stop waking the loop and discard everything still queued. Returns
    /// the number of entries discarded.
    pub fn close(&self) -> usize {
        self.wakeup.close();
        let mut entries = self.shared.entries.lock();
        let pending = entries.len();
        entries.clear();
        pending
    }
}

impl<T> Clone for CallbackQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            wakeup: self.wakeup.clone(),
        }
    }
}
