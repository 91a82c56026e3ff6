//! Event-loop side of the binding layer.
//!
//! Engine threads never call into JS directly. They either push a payload
//! into a [`CallbackQueue`] or hand a [`ForeignWorker`] to the loop, and
//! the loop thread delivers to the JS callback after checking that its
//! [`CallbackInfo`] has not been stopped.

mod callback;
mod error;
mod event_loop;
mod js;
mod queue;
mod worker;

pub use callback::CallbackInfo;
pub use error::EventError;
pub use event_loop::{AsyncHandle, EventLoop, LoopHandle};
pub use js::{JsCallback, JsValue};
pub use queue::{CallbackQueue, DrainStats, QueueEntry, QueuePolicy, DEFAULT_QUEUE_CAPACITY};
pub use worker::{Execute, ForeignWorker};

/// Result type for event loop operations.
pub type EventResult<T> = Result<T, EventError>;
