//! Server side of the obs-studio-node binding layer.
//!
//! A single [`Registry`] maps small integer handles to callbacks, faders
//! and volmeters. [`AudioBindings`] and [`SignalBindings`] build on it and
//! deliver engine-thread events to JS callbacks through the event loop.

mod audio;
mod config;
mod error;
mod ipc;
mod object;
mod polled;
mod registry;
mod signals;

pub use audio::{AudioBindings, FaderData, VolmeterData};
pub use config::{BindingsConfig, QueueConfig};
pub use error::{BindingError, ConfigError};
pub use ipc::register;
pub use object::{EngineRef, Handle, ObjectKind, ObjectRef};
pub use polled::{IDLE_AFTER, SILENCE_DB};
pub use registry::{Registry, ShutdownReport, Teardown};
pub use signals::{Scope, SignalBindings};

/// Result type for binding operations.
pub type BindingResult<T> = Result<T, BindingError>;
