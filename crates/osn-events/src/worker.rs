//! One-shot work delivered to a JS callback on the loop thread.

use std::sync::Arc;

use tracing::trace;

use crate::callback::CallbackInfo;
use crate::event_loop::{AsyncHandle, LoopHandle};
use crate::js::JsCallback;

/// Work that turns its payload into a JS call.
pub trait Execute: Send + 'static {
    /// Run on the loop thread with the bound callback.
    fn execute(self, callback: &JsCallback);
}

/// Carries one piece of work to the loop thread.
///
/// [`ForeignWorker::send`] consumes the worker, so each event needs a new
/// one. The work runs at most once and is dropped on the loop thread right
/// after, or without running if the callback was stopped in the meantime.
pub struct ForeignWorker<W> {
    handle: LoopHandle,
    info: Arc<CallbackInfo>,
    work: W,
}

impl<W: Execute> ForeignWorker<W> {
    pub fn new(handle: &LoopHandle, info: Arc<CallbackInfo>, work: W) -> Self {
        Self {
            handle: handle.clone(),
            info,
            work,
        }
    }

    /// Schedule the work. Returns false if the loop is gone.
    pub fn send(self) -> bool {
        let Self { handle, info, work } = self;

        let wakeup = AsyncHandle::one_shot(&handle, move || {
            if info.is_stopped() {
                trace!("Worker for stopped callback dropped");
                return;
            }
            work.execute(info.callback());
        });

        wakeup.send()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::event_loop::EventLoop;
    use crate::js::JsValue;

    struct Ping(f64);

    impl Execute for Ping {
        fn execute(self, callback: &JsCallback) {
            callback.call(&[JsValue::Number(self.0)]);
        }
    }

    fn counting_info() -> (Arc<CallbackInfo>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback = JsCallback::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (Arc::new(CallbackInfo::new(callback)), calls)
    }

    #[test]
    fn test_worker_executes_once_on_loop() {
        let event_loop = EventLoop::new();
        let (info, calls) = counting_info();

        let worker = ForeignWorker::new(&event_loop.handle(), Arc::clone(&info), Ping(1.0));
        thread::spawn(move || assert!(worker.send()))
            .join()
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        event_loop.run_until_idle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        event_loop.run_until_idle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_is_dropped_after_run() {
        let event_loop = EventLoop::new();
        let (info, _) = counting_info();

        ForeignWorker::new(&event_loop.handle(), Arc::clone(&info), Ping(1.0)).send();
        assert_eq!(Arc::strong_count(&info), 2);

        event_loop.run_until_idle();
        assert_eq!(Arc::strong_count(&info), 1);
    }

    #[test]
    fn test_stopped_callback_is_not_executed() {
        let event_loop = EventLoop::new();
        let (info, calls) = counting_info();

        ForeignWorker::new(&event_loop.handle(), Arc::clone(&info), Ping(1.0)).send();
        info.stop();
        event_loop.run_until_idle();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(Arc::strong_count(&info), 1);
    }

    #[test]
    fn test_send_without_loop_fails() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        drop(event_loop);

        let (info, calls) = counting_info();
        assert!(!ForeignWorker::new(&handle, Arc::clone(&info), Ping(1.0)).send());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(Arc::strong_count(&info), 1);
    }
}
