//! Requests sent from a client thread to the server loop.

use crossbeam_channel::{Receiver, Sender};

use crate::error::IpcError;
use crate::server::Server;
use crate::value::Value;
use crate::IpcResult;

/// A single call waiting to be dispatched on the server loop.
#[derive(Debug)]
pub struct Request {
    /// Target collection.
    pub collection: String,

    /// Target function within the collection.
    pub function: String,

    /// Call arguments.
    pub args: Vec<Value>,

    /// Where the response is delivered.
    pub reply: Sender<IpcResult<Vec<Value>>>,
}

impl Request {
    /// Create a request and the receiver its response will arrive on.
    pub fn new(
        collection: impl Into<String>,
        function: impl Into<String>,
        args: Vec<Value>,
    ) -> (Self, Receiver<IpcResult<Vec<Value>>>) {
        let (reply, rx) = crossbeam_channel::bounded(1);
        (
            Self {
                collection: collection.into(),
                function: function.into(),
                args,
                reply,
            },
            rx,
        )
    }

    /// Dispatch against `server` and deliver the response.
    pub fn dispatch(self, server: &Server) -> IpcResult<()> {
        let result = server.call(&self.collection, &self.function, &self.args);
        self.reply
            .send(result)
            .map_err(|_| IpcError::ChannelDisconnected)
    }
}
