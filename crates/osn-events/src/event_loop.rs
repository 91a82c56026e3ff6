//! Single-consumer event loop with coalescing async wakeups.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::EventError;
use crate::EventResult;

type AsyncCallback = Box<dyn FnMut() + Send>;
type Task = Box<dyn FnOnce() + Send>;

enum LoopMessage {
    Wake(Arc<AsyncInner>),
    Close(Arc<AsyncInner>),
    Task(Task),
    Stop,
}

struct AsyncInner {
    id: u64,
    pending: AtomicBool,
    closed: AtomicBool,
    one_shot: bool,
    callback: Mutex<Option<AsyncCallback>>,
}

/// Producer side of an [`EventLoop`]. Cheap to clone and usable from any
/// thread.
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<LoopMessage>,
    next_id: Arc<AtomicU64>,
}

impl LoopHandle {
    /// Run `task` once on the loop thread.
    pub fn post<F>(&self, task: F) -> EventResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(LoopMessage::Task(Box::new(task)))
            .map_err(|_| EventError::LoopClosed)
    }

    /// Ask [`EventLoop::run`] to return.
    pub fn stop(&self) -> EventResult<()> {
        self.tx
            .send(LoopMessage::Stop)
            .map_err(|_| EventError::LoopClosed)
    }

    fn register(&self, one_shot: bool, callback: AsyncCallback) -> AsyncHandle {
        let inner = Arc::new(AsyncInner {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            one_shot,
            callback: Mutex::new(Some(callback)),
        });

        AsyncHandle {
            inner,
            tx: self.tx.clone(),
        }
    }
}

/// A wakeup that runs its callback on the loop thread.
///
/// Any number of [`AsyncHandle::send`] calls made before the loop gets to
/// the handle collapse into one callback run. The pending flag is cleared
/// before the callback runs, so a send from inside the callback schedules
/// another run.
#[derive(Clone)]
pub struct AsyncHandle {
    inner: Arc<AsyncInner>,
    tx: Sender<LoopMessage>,
}

impl AsyncHandle {
    /// Bind `callback` to a new wakeup on the loop behind `handle`.
    pub fn new<F>(handle: &LoopHandle, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        handle.register(false, Box::new(callback))
    }

    /// Like [`AsyncHandle::new`], but the handle closes itself after the
    /// first callback run.
    pub fn one_shot<F>(handle: &LoopHandle, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callback = Some(callback);
        handle.register(
            true,
            Box::new(move || {
                if let Some(f) = callback.take() {
                    f();
                }
            }),
        )
    }

    /// Wake the loop. Returns false if the handle is closed.
    pub fn send(&self) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }

        if !self.inner.pending.swap(true, Ordering::AcqRel)
            && self
                .tx
                .send(LoopMessage::Wake(Arc::clone(&self.inner)))
                .is_err()
        {
            trace!(id = self.inner.id, "Wakeup after loop shutdown dropped");
            return false;
        }

        true
    }

    /// Close the handle. Later wakeups are ignored and the callback is
    /// dropped on the loop thread.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(err) = self.tx.send(LoopMessage::Close(Arc::clone(&self.inner))) {
            // No loop left to do it; drop here.
            if let LoopMessage::Close(inner) = err.into_inner() {
                inner.callback.lock().take();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// The consumer thread's event loop.
///
/// Everything registered on it (async callbacks, posted tasks) runs on the
/// thread that drives the loop.
pub struct EventLoop {
    rx: Receiver<LoopMessage>,
    handle: LoopHandle,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            rx,
            handle: LoopHandle {
                tx,
                next_id: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    /// A producer handle for this loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Process everything already queued. Returns the number of messages
    /// handled.
    pub fn run_until_idle(&self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.dispatch(message);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for one message and handle it.
    ///
    /// Returns `Ok(false)` if the message was a stop request.
    pub fn run_once(&self, timeout: Duration) -> EventResult<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(self.dispatch(message)),
            Err(RecvTimeoutError::Timeout) => Err(EventError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(EventError::LoopClosed),
        }
    }

    /// Run until [`LoopHandle::stop`] is called.
    pub fn run(&self) {
        debug!("Event loop running");
        while let Ok(message) = self.rx.recv() {
            if !self.dispatch(message) {
                break;
            }
        }
        debug!("Event loop stopped");
    }

    fn dispatch(&self, message: LoopMessage) -> bool {
        match message {
            LoopMessage::Wake(inner) => {
                if inner.closed.load(Ordering::Acquire) {
                    return true;
                }

                inner.pending.store(false, Ordering::Release);
                if let Some(callback) = inner.callback.lock().as_mut() {
                    callback();
                }

                if inner.one_shot {
                    inner.closed.store(true, Ordering::Release);
                    inner.callback.lock().take();
                    trace!(id = inner.id, "One-shot handle destroyed");
                }
            }
            LoopMessage::Close(inner) => {
                inner.callback.lock().take();
                trace!(id = inner.id, "Async handle closed");
            }
            LoopMessage::Task(task) => task(),
            LoopMessage::Stop => return false,
        }
        true
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_sends_coalesce_into_one_run() {
        let event_loop = EventLoop::new();
        let (count, cb) = counter();
        let handle = AsyncHandle::new(&event_loop.handle(), cb);

        for _ in 0..5 {
            assert!(handle.send());
        }
        event_loop.run_until_idle();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        handle.send();
        event_loop.run_until_idle();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_send_from_other_thread() {
        let event_loop = EventLoop::new();
        let (count, cb) = counter();
        let handle = AsyncHandle::new(&event_loop.handle(), cb);

        let remote = handle.clone();
        thread::spawn(move || {
            remote.send();
        })
        .join()
        .unwrap();

        event_loop.run_once(Duration::from_secs(1)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_inside_callback_rearms() {
        let event_loop = EventLoop::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<AsyncHandle>>> = Arc::new(Mutex::new(None));

        let cb_runs = Arc::clone(&runs);
        let cb_slot = Arc::clone(&slot);
        let handle = AsyncHandle::new(&event_loop.handle(), move || {
            if cb_runs.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(h) = cb_slot.lock().as_ref() {
                    h.send();
                }
            }
        });
        *slot.lock() = Some(handle.clone());

        handle.send();
        event_loop.run_until_idle();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        slot.lock().take();
    }

    #[test]
    fn test_closed_handle_ignores_wakeups() {
        let event_loop = EventLoop::new();
        let (count, cb) = counter();
        let handle = AsyncHandle::new(&event_loop.handle(), cb);

        handle.send();
        handle.close();
        assert!(!handle.send());
        event_loop.run_until_idle();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_one_shot_runs_once() {
        let event_loop = EventLoop::new();
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let handle = AsyncHandle::one_shot(&event_loop.handle(), move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        handle.send();
        event_loop.run_until_idle();
        assert!(!handle.send());
        event_loop.run_until_idle();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_post_and_stop() {
        let event_loop = EventLoop::new();
        let lh = event_loop.handle();
        let (count, mut cb) = counter();

        lh.post(move || cb()).unwrap();
        lh.stop().unwrap();
        event_loop.run();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            event_loop.run_once(Duration::from_millis(1)),
            Err(EventError::Timeout)
        );
    }
}
