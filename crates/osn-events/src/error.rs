//! Error types for the event loop.

use thiserror::Error;

/// Errors that can occur while posting to an event loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The event loop has been dropped.
    #[error("Event loop closed")]
    LoopClosed,

    /// Waiting for a message timed out.
    #[error("Timed out waiting for the event loop")]
    Timeout,
}
