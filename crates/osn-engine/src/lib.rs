//! In-process media engine surface.
//!
//! Provides the parts of the engine the binding layer talks to: signal
//! handlers with untyped calldata, named sources and outputs, faders and
//! volmeters. Callbacks registered here run on whatever thread triggers
//! them, which is never assumed to be the event loop thread.

mod calldata;
mod engine;
mod error;
mod fader;
mod signal;
mod source;
mod volmeter;

pub use calldata::{Calldata, CalldataValue};
pub use engine::Engine;
pub use error::EngineError;
pub use fader::{db_to_mul, mul_to_db, AudioCallbackId, Fader, FaderCallback, FaderType};
pub use signal::{ConnectionId, SignalCallback, SignalHandler};
pub use source::{Output, Source};
pub use volmeter::{Volmeter, VolmeterCallback, VolumeLevels, DEFAULT_UPDATE_INTERVAL_MS};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
