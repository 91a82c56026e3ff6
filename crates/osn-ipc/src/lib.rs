//! IPC boundary for the obs-studio-node server.
//!
//! This crate defines the typed values, status codes and the function
//! dispatcher that feature wrappers register against. Framing and transport
//! live elsewhere; here a request is just a value moved between threads.

mod error;
mod request;
mod server;
mod value;

pub use error::{ErrorCode, IpcError};
pub use request::Request;
pub use server::{reply_error, reply_ok, split_reply, Collection, Function, Handler, Server};
pub use value::{Type, Value};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for requests (client → server loop).
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;

/// Creates a bounded request channel.
pub fn request_channel() -> (Sender<Request>, Receiver<Request>) {
    crossbeam_channel::bounded(REQUEST_CHANNEL_CAPACITY)
}
