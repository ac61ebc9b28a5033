//! Channel capability trait

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::config::{DEFAULT_MAX_PACKET, DEFAULT_WINDOW_SIZE};
use crate::handle::ChannelHandle;

/// Canonical form of a request-type name (`pty-req` -> `pty_req`)
pub fn canonical_name(name: &str) -> String {
    name.replace('-', "_")
}

/// Capabilities of one logical channel
///
/// The multiplexer owns the channel while it is registered and calls these
/// hooks as messages arrive. Every hook has a default that logs the event;
/// unhandled requests are rejected.
pub trait Channel: Send {
    /// Channel type sent in CHANNEL_OPEN (e.g. `session`)
    fn channel_type(&self) -> &str;

    /// Receive window this side advertises to the peer
    fn window_size(&self) -> u32 {
        DEFAULT_WINDOW_SIZE
    }

    /// Largest data payload this side accepts per message
    fn max_packet(&self) -> u32 {
        DEFAULT_MAX_PACKET
    }

    /// Whether the multiplexer refills the receive window as data arrives
    ///
    /// Channels that buffer or forward data elsewhere return false and grant
    /// credit themselves with [`ChannelHandle::adjust_window`] once the data
    /// has been consumed.
    fn replenishes_window(&self) -> bool {
        true
    }

    /// Type-specific trailer for our OPEN_CONFIRMATION
    fn confirmation_data(&self) -> Bytes {
        Bytes::new()
    }

    /// The channel is open; `data` is the peer's type-specific trailer
    fn opened(&mut self, handle: ChannelHandle, data: Bytes) {
        let _ = data;
        tracing::debug!("{} ({}) open", handle.id(), self.channel_type());
    }

    /// The peer refused to open the channel; it is dropped after this call
    fn open_failed(&mut self, reason_code: u32, description: &str) {
        tracing::debug!(
            "{} channel refused (reason {}): {}",
            self.channel_type(),
            reason_code,
            description
        );
    }

    /// Data arrived from the peer
    fn data_received(&mut self, data: Bytes) {
        tracing::debug!(
            "{} channel got {} bytes of unhandled data",
            self.channel_type(),
            data.len()
        );
    }

    /// Typed data (e.g. stderr) arrived from the peer
    fn extended_data_received(&mut self, data_type: u32, data: Bytes) {
        tracing::debug!(
            "{} channel got {} bytes of unhandled extended data (type {})",
            self.channel_type(),
            data.len(),
            data_type
        );
    }

    /// The peer will send no more data
    fn eof_received(&mut self) {
        tracing::debug!("{} channel remote eof", self.channel_type());
    }

    /// The channel is gone; the multiplexer drops it right after this call
    fn closed(&mut self) {
        tracing::debug!("{} channel closed", self.channel_type());
    }

    /// A channel request arrived; `request_type` is already canonical
    ///
    /// Returns whether the request was accepted.
    fn request_received(&mut self, request_type: &str, data: Bytes) -> bool {
        let _ = data;
        tracing::debug!(
            "{} channel: unhandled request {}",
            self.channel_type(),
            request_type
        );
        false
    }
}

/// Handler for one request type on a channel variant `C`
pub type RequestHandler<C> = fn(&mut C, Bytes) -> bool;

/// Name-to-handler table used by channel variants to dispatch requests
///
/// Names are canonicalized on registration and lookup, so `pty-req` and
/// `pty_req` refer to the same entry. Unregistered names have no handler.
pub struct RequestHandlers<C> {
    handlers: HashMap<String, RequestHandler<C>>,
}

impl<C> RequestHandlers<C> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `name`, replacing any previous entry
    pub fn register(&mut self, name: &str, handler: RequestHandler<C>) -> &mut Self {
        self.handlers.insert(canonical_name(name), handler);
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, name: &str, handler: RequestHandler<C>) -> Self {
        self.register(name, handler);
        self
    }

    /// Look up the handler for `name`
    pub fn get(&self, name: &str) -> Option<RequestHandler<C>> {
        self.handlers.get(&canonical_name(name)).copied()
    }

    /// Whether a handler exists for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&canonical_name(name))
    }
}

impl<C> Default for RequestHandlers<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for RequestHandlers<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("RequestHandlers")
            .field("names", &names)
            .finish()
    }
}
