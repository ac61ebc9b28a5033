//! Outstanding request-with-reply tracking
//!
//! Connection-protocol replies carry no request identifier: the peer answers
//! requests on a channel (and global requests) in the order it received
//! them. Each key therefore holds a FIFO of pending entries, and every entry
//! gets a connection-unique [`RequestId`] so several requests may be in
//! flight on one channel without overwriting each other.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use sshmux_core::pending::{ReplyResult, ReplySender};
use sshmux_core::{PendingReply, RequestError, RequestId};
use sshmux_protocol::ChannelId;

/// Scope a pending request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// A request on one channel
    Channel(ChannelId),
    /// A connection-scoped request
    Global,
}

#[derive(Debug)]
struct PendingEntry {
    id: RequestId,
    reply: ReplySender,
}

/// Tracks completion handles for requests sent with `want_reply`
#[derive(Debug, Default)]
pub struct RequestRegistry {
    next_id: u64,
    pending: HashMap<PendingKey, VecDeque<PendingEntry>>,
}

impl RequestRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request under `key` and return its completion handle
    pub fn register(&mut self, key: PendingKey) -> (RequestId, PendingReply) {
        let (tx, pending) = PendingReply::channel();
        let id = self.register_sender(key, tx);
        (id, pending)
    }

    /// Register a request whose completion handle already exists
    pub fn register_sender(&mut self, key: PendingKey, reply: ReplySender) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;

        self.pending
            .entry(key)
            .or_default()
            .push_back(PendingEntry { id, reply });
        id
    }

    /// Resolve the oldest request under `key`
    ///
    /// Returns the resolved id, or `None` if nothing was pending (a late or
    /// duplicate reply), in which case nothing happens.
    pub fn resolve(&mut self, key: PendingKey, result: ReplyResult) -> Option<RequestId> {
        let queue = self.pending.get_mut(&key)?;
        let entry = queue.pop_front()?;
        if queue.is_empty() {
            self.pending.remove(&key);
        }

        if entry.reply.send(result).is_err() {
            tracing::debug!("{} resolved after its handle was dropped", entry.id);
        }
        Some(entry.id)
    }

    /// Resolve the oldest request under `key` as accepted
    pub fn succeed(&mut self, key: PendingKey, data: Bytes) -> Option<RequestId> {
        self.resolve(key, Ok(data))
    }

    /// Resolve the oldest request under `key` as rejected
    pub fn fail(&mut self, key: PendingKey) -> Option<RequestId> {
        self.resolve(key, Err(RequestError::Rejected))
    }

    /// Cancel every request under `key`, returning how many were pending
    pub fn cancel(&mut self, key: PendingKey) -> usize {
        let Some(queue) = self.pending.remove(&key) else {
            return 0;
        };

        let count = queue.len();
        for entry in queue {
            let _ = entry.reply.send(Err(RequestError::Cancelled));
        }
        count
    }

    /// Cancel everything
    pub fn cancel_all(&mut self) -> usize {
        let keys: Vec<_> = self.pending.keys().copied().collect();
        keys.into_iter().map(|key| self.cancel(key)).sum()
    }

    /// Number of requests pending under `key`
    pub fn outstanding(&self, key: PendingKey) -> usize {
        self.pending.get(&key).map_or(0, VecDeque::len)
    }

    /// Total number of pending requests
    pub fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
