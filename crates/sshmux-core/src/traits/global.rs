//! Global request handler trait

use bytes::Bytes;

/// Answer to a global request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalReply {
    /// Request accepted; the data is sent in REQUEST_SUCCESS
    Accepted(Bytes),
    /// Request refused
    Rejected,
}

/// Handles one connection-scoped request type
pub trait GlobalRequestHandler: Send {
    /// Handle the request payload
    fn handle(&mut self, data: Bytes) -> GlobalReply;
}

impl<F> GlobalRequestHandler for F
where
    F: FnMut(Bytes) -> GlobalReply + Send,
{
    fn handle(&mut self, data: Bytes) -> GlobalReply {
        self(data)
    }
}
