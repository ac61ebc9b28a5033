//! Completion handles for operations answered later by the peer

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{OpenError, RequestError};
use crate::handle::ChannelHandle;

/// Identifier of one outstanding request, unique within a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

/// Result delivered to a request's completion handle
pub type ReplyResult = Result<Bytes, RequestError>;

/// Sending half of a request completion
pub type ReplySender = oneshot::Sender<ReplyResult>;

/// Result delivered to an open's completion handle
pub type OpenResult = Result<ChannelHandle, OpenError>;

/// Sending half of an open completion
pub type OpenSender = oneshot::Sender<OpenResult>;

/// Completion handle for a request sent with `want_reply`
///
/// Resolves to the reply data on success (empty for channel requests),
/// [`RequestError::Rejected`] on a failure reply, or
/// [`RequestError::Cancelled`] if the channel or connection closed first.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<ReplyResult>,
}

impl PendingReply {
    /// Create a connected sender / handle pair
    pub fn channel() -> (ReplySender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for PendingReply {
    type Output = ReplyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RequestError::Cancelled)))
    }
}

/// Completion handle for a locally opened channel
///
/// Resolves to a ready [`ChannelHandle`] once the peer confirms, or to the
/// peer's reason code and text if it refuses.
#[derive(Debug)]
pub struct PendingOpen {
    rx: oneshot::Receiver<OpenResult>,
}

impl PendingOpen {
    /// Create a connected sender / handle pair
    pub fn channel() -> (OpenSender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for PendingOpen {
    type Output = OpenResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(OpenError::Cancelled)))
    }
}
